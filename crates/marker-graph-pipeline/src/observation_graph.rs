//! Camera localization and the camera→marker / camera→object measurements.

use crate::error::{PipelineError, PipelineResult};
use crate::images::ImageId;
use crate::object_poses::ObjectPoseTable;
use crate::observer::{observe_checked, ObserverContext, RelativePoseObserver};
use crate::reference_frame::ReferenceFrame;
use log::{debug, info, warn};
use marker_graph_core::transform::{as_matrix, as_matrix_opt};
use marker_graph_core::{Iso3, NodeId, PoseMap};
use serde::{Deserialize, Serialize};

/// What to do with an image whose detections contain no placed marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnlocalizablePolicy {
    /// Abort with [`PipelineError::UnlocalizableImage`].
    #[default]
    Fail,
    /// Drop the image and list it in [`ObservationGraph::unlocalized_images`].
    Report,
}

/// One relative measurement `T_CX` from a camera to a marker or the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub target: NodeId,
    #[serde(with = "as_matrix")]
    pub camera_from_target: Iso3,
}

/// A localized camera and everything it measured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraView {
    pub image: ImageId,
    /// Marker the camera was localized through.
    pub pivot: u32,
    #[serde(with = "as_matrix")]
    pub world_from_camera: Iso3,
    pub measurements: Vec<Measurement>,
}

impl CameraView {
    pub fn node(&self) -> NodeId {
        NodeId::camera(self.image.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservationGraph {
    /// Localized cameras in image order.
    pub views: Vec<CameraView>,
    /// Initial model pose, from the first localized image with `T_CO`.
    #[serde(default, with = "as_matrix_opt")]
    pub world_from_model: Option<Iso3>,
    pub model_seed_image: Option<ImageId>,
    pub images_without_detections: Vec<ImageId>,
    pub unlocalized_images: Vec<ImageId>,
}

impl ObservationGraph {
    pub fn view(&self, image: &str) -> Option<&CameraView> {
        self.views.iter().find(|v| v.image == image)
    }

    pub fn num_measurements(&self) -> usize {
        self.views.iter().map(|v| v.measurements.len()).sum()
    }

    /// Initial estimates for every graph vertex: placed markers, localized
    /// cameras and (when seeded) the model.
    pub fn initial_poses(&self, frame: &ReferenceFrame) -> PoseMap {
        let mut poses = frame.poses().clone();
        for view in &self.views {
            poses.insert(view.node(), view.world_from_camera);
        }
        if let Some(model) = self.world_from_model {
            poses.insert(NodeId::Model, model);
        }
        poses
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ObservationGraphBuilder {
    pub policy: UnlocalizablePolicy,
}

impl ObservationGraphBuilder {
    pub fn new(policy: UnlocalizablePolicy) -> Self {
        Self { policy }
    }

    pub fn build<O: RelativePoseObserver + ?Sized>(
        &self,
        images: &[ImageId],
        observer: &O,
        context: &ObserverContext,
        frame: &ReferenceFrame,
        object_poses: &ObjectPoseTable,
    ) -> PipelineResult<ObservationGraph> {
        let mut graph = ObservationGraph::default();

        for image in images {
            let detections = observe_checked(observer, image, context)?;
            if detections.is_empty() {
                debug!("{image}: no detections");
                graph.images_without_detections.push(image.clone());
                continue;
            }

            let Some((pivot, world_from_pivot)) = detections
                .iter()
                .find_map(|d| frame.get(d.marker).map(|pose| (d, pose)))
            else {
                match self.policy {
                    UnlocalizablePolicy::Fail => {
                        return Err(PipelineError::UnlocalizableImage {
                            image: image.clone(),
                        })
                    }
                    UnlocalizablePolicy::Report => {
                        warn!("{image}: no detected marker is in the reference frame; skipping");
                        graph.unlocalized_images.push(image.clone());
                        continue;
                    }
                }
            };
            let world_from_camera = world_from_pivot * pivot.camera_from_marker.inverse();

            let mut measurements = Vec::with_capacity(detections.len() + 1);
            for det in &detections {
                if frame.contains(det.marker) {
                    measurements.push(Measurement {
                        target: NodeId::marker(det.marker),
                        camera_from_target: det.camera_from_marker,
                    });
                } else {
                    debug!("{image}: marker [{}] is unreachable, no edge", det.marker);
                }
            }
            if let Some(camera_from_object) = object_poses.get(image) {
                measurements.push(Measurement {
                    target: NodeId::Model,
                    camera_from_target: camera_from_object,
                });
                if graph.world_from_model.is_none() {
                    debug!("{image}: seeding model pose");
                    graph.world_from_model = Some(world_from_camera * camera_from_object);
                    graph.model_seed_image = Some(image.clone());
                }
            }
            debug!(
                "{image}: localized through [{}], {} measurements",
                pivot.marker,
                measurements.len()
            );

            graph.views.push(CameraView {
                image: image.clone(),
                pivot: pivot.marker,
                world_from_camera,
                measurements,
            });
        }

        info!(
            "observation graph: {} cameras, {} measurements, {} images without detections, {} unlocalized",
            graph.views.len(),
            graph.num_measurements(),
            graph.images_without_detections.len(),
            graph.unlocalized_images.len()
        );
        Ok(graph)
    }
}
