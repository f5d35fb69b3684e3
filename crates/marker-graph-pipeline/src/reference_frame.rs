//! World frame of marker poses, anchored at an origin marker.
//!
//! A marker `n` seen together with an already placed pivot `p` in one image
//! is placed at `T_WN = T_WP · T_CP⁻¹ · T_CN`. Breadth-first propagation
//! walks the co-observation graph from the origin; fixed-point propagation
//! rescans all images until a pass adds nothing.

use crate::error::{PipelineError, PipelineResult};
use crate::images::ImageId;
use crate::observer::{observe_checked, MarkerPose, ObserverContext, RelativePoseObserver};
use log::{debug, info, warn};
use marker_graph_core::{Iso3, NodeId, PoseError, PoseMap};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// How marker poses are chained outwards from the origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FramePropagation {
    /// Breadth-first over co-observations; each marker is placed from its
    /// parent, ties broken by image order then observation order.
    #[default]
    BreadthFirst,
    /// Repeated passes over all images; in each image the pivot is the first
    /// observed marker already placed.
    FixedPoint,
}

/// World poses of the markers reachable from the origin.
///
/// Deserialization rejects frames whose origin marker is missing or not at
/// identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StoredFrame")]
pub struct ReferenceFrame {
    origin: u32,
    poses: PoseMap,
}

#[derive(Deserialize)]
struct StoredFrame {
    origin: u32,
    poses: PoseMap,
}

impl TryFrom<StoredFrame> for ReferenceFrame {
    type Error = PipelineError;

    fn try_from(stored: StoredFrame) -> Result<Self, Self::Error> {
        let invalid = |reason: &str| PipelineError::InvalidReferenceFrame {
            origin: stored.origin,
            reason: reason.to_string(),
        };
        let origin_pose = stored
            .poses
            .get(&NodeId::marker(stored.origin))
            .ok_or_else(|| invalid("origin marker has no pose"))?;
        if !PoseError::between(origin_pose, &Iso3::identity()).within(1e-12, 1e-12) {
            return Err(invalid("origin marker pose is not identity"));
        }
        Ok(Self {
            origin: stored.origin,
            poses: stored.poses,
        })
    }
}

impl ReferenceFrame {
    /// Frame containing only `origin` at identity.
    pub fn new(origin: u32) -> Self {
        let mut poses = PoseMap::new();
        poses.insert(NodeId::marker(origin), Iso3::identity());
        Self { origin, poses }
    }

    pub fn origin(&self) -> NodeId {
        NodeId::marker(self.origin)
    }

    pub fn origin_marker(&self) -> u32 {
        self.origin
    }

    /// World pose of `marker`, if placed.
    pub fn get(&self, marker: u32) -> Option<Iso3> {
        self.poses.get(&NodeId::marker(marker)).copied()
    }

    pub fn contains(&self, marker: u32) -> bool {
        self.poses.contains_key(&NodeId::marker(marker))
    }

    /// Placed marker indices in ascending order.
    pub fn markers(&self) -> impl Iterator<Item = u32> + '_ {
        self.poses.keys().filter_map(NodeId::marker_index)
    }

    pub fn poses(&self) -> &PoseMap {
        &self.poses
    }

    pub fn len(&self) -> usize {
        self.poses.len()
    }

    /// Always false: the origin is part of every frame.
    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }

    fn place(&mut self, marker: u32, world_from_marker: Iso3) {
        debug_assert!(marker != self.origin);
        self.poses.insert(NodeId::marker(marker), world_from_marker);
    }
}

/// Non-fatal findings of a frame build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameReport {
    /// Markers that were detected but share no chain of images with the origin.
    pub unreachable_markers: Vec<u32>,
    /// Images with at least one detection.
    pub images_with_detections: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceFrameBuilder {
    pub origin: u32,
    pub propagation: FramePropagation,
}

impl ReferenceFrameBuilder {
    pub fn new(origin: u32) -> Self {
        Self {
            origin,
            propagation: FramePropagation::default(),
        }
    }

    pub fn with_propagation(mut self, propagation: FramePropagation) -> Self {
        self.propagation = propagation;
        self
    }

    /// Place every marker reachable from the origin through the detections of
    /// `images`.
    pub fn build<O: RelativePoseObserver + ?Sized>(
        &self,
        images: &[ImageId],
        observer: &O,
        context: &ObserverContext,
    ) -> PipelineResult<(ReferenceFrame, FrameReport)> {
        let detections = images
            .iter()
            .map(|image| observe_checked(observer, image, context))
            .collect::<PipelineResult<Vec<_>>>()?;

        let mut frame = ReferenceFrame::new(self.origin);
        match self.propagation {
            FramePropagation::BreadthFirst => propagate_breadth_first(&mut frame, &detections),
            FramePropagation::FixedPoint => {
                let passes = propagate_fixed_point(&mut frame, &detections);
                debug!("fixed-point propagation settled after {passes} passes");
            }
        }

        let observed: BTreeSet<u32> = detections.iter().flatten().map(|d| d.marker).collect();
        let unreachable_markers: Vec<u32> = observed
            .into_iter()
            .filter(|m| !frame.contains(*m))
            .collect();
        if !unreachable_markers.is_empty() {
            warn!(
                "markers {unreachable_markers:?} are not connected to origin marker [{}]; excluding them",
                self.origin
            );
        }

        let report = FrameReport {
            unreachable_markers,
            images_with_detections: detections.iter().filter(|d| !d.is_empty()).count(),
        };
        info!(
            "reference frame: {} markers placed from {} images with detections",
            frame.len(),
            report.images_with_detections
        );
        Ok((frame, report))
    }
}

fn propagate_breadth_first(frame: &mut ReferenceFrame, detections: &[Vec<MarkerPose>]) {
    // marker -> (image index, detection index), in image then observation order
    let mut occurrences: BTreeMap<u32, Vec<(usize, usize)>> = BTreeMap::new();
    for (img, dets) in detections.iter().enumerate() {
        for (idx, det) in dets.iter().enumerate() {
            occurrences.entry(det.marker).or_default().push((img, idx));
        }
    }

    let mut queue = VecDeque::from([frame.origin]);
    while let Some(pivot) = queue.pop_front() {
        let Some(world_from_pivot) = frame.get(pivot) else {
            continue;
        };
        let Some(seen_in) = occurrences.get(&pivot) else {
            continue;
        };
        for &(img, idx) in seen_in {
            let dets = &detections[img];
            let world_from_camera = world_from_pivot * dets[idx].camera_from_marker.inverse();
            for det in dets {
                if frame.contains(det.marker) {
                    continue;
                }
                frame.place(det.marker, world_from_camera * det.camera_from_marker);
                queue.push_back(det.marker);
            }
        }
    }
}

/// Returns the number of passes, including the final one that added nothing.
fn propagate_fixed_point(frame: &mut ReferenceFrame, detections: &[Vec<MarkerPose>]) -> usize {
    let mut passes = 0;
    loop {
        passes += 1;
        let mut added = false;
        for dets in detections {
            let Some((pivot, world_from_pivot)) = dets
                .iter()
                .find_map(|d| frame.get(d.marker).map(|pose| (d, pose)))
            else {
                continue;
            };
            let world_from_camera = world_from_pivot * pivot.camera_from_marker.inverse();
            for det in dets {
                if !frame.contains(det.marker) {
                    frame.place(det.marker, world_from_camera * det.camera_from_marker);
                    added = true;
                }
            }
        }
        if !added {
            return passes;
        }
    }
}
