//! Marker-graph problem definition for the session framework.

use anyhow::{ensure, Result};
use marker_graph_core::transform::as_matrix;
use marker_graph_core::{isotropic_information, Iso3, NodeId, PoseError, Real};
use marker_graph_optim::{BackendSolveOptions, OptimizedGraph, RobustLoss, SolveStatus};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::graph_builder::EdgeModel;
use crate::images::ImageId;
use crate::object_poses::ObjectPoseTable;
use crate::observation_graph::{ObservationGraphBuilder, UnlocalizablePolicy};
use crate::observer::{DetectionTable, ObserverContext};
use crate::reference_frame::{FramePropagation, ReferenceFrameBuilder};
use crate::session::ProblemType;

use super::state::MarkerGraphState;

/// Marker pose-graph problem: world frame from markers, cameras and one
/// tracked object.
#[derive(Debug, Clone, Copy)]
pub struct MarkerGraphProblem;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerGraphConfig {
    /// Marker whose frame becomes the world frame.
    pub origin_marker: u32,
    pub propagation: FramePropagation,
    pub unlocalizable: UnlocalizablePolicy,
    /// Robust kernel on every edge.
    pub robust_loss: RobustLoss,
    /// Isotropic information weight of camera→marker edges.
    pub marker_information_weight: Real,
    /// Isotropic information weight of camera→model edges.
    pub model_information_weight: Real,
    pub solver: BackendSolveOptions,
}

impl Default for MarkerGraphConfig {
    fn default() -> Self {
        Self {
            origin_marker: 0,
            propagation: FramePropagation::BreadthFirst,
            unlocalizable: UnlocalizablePolicy::Fail,
            robust_loss: RobustLoss::default_huber(),
            marker_information_weight: 1.0,
            model_information_weight: 1.0,
            solver: BackendSolveOptions::default(),
        }
    }
}

impl MarkerGraphConfig {
    pub fn frame_builder(&self) -> ReferenceFrameBuilder {
        ReferenceFrameBuilder::new(self.origin_marker).with_propagation(self.propagation)
    }

    pub fn observation_builder(&self) -> ObservationGraphBuilder {
        ObservationGraphBuilder::new(self.unlocalizable)
    }

    pub fn edge_model(&self) -> EdgeModel {
        EdgeModel {
            marker_information: isotropic_information(self.marker_information_weight),
            model_information: isotropic_information(self.model_information_weight),
            loss: self.robust_loss,
        }
    }
}

/// Images to process and the observations available for them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkerGraphInput {
    /// Image ids in processing order.
    pub images: Vec<ImageId>,
    #[serde(default)]
    pub context: ObserverContext,
    pub detections: DetectionTable,
    #[serde(default)]
    pub object_poses: ObjectPoseTable,
}

impl MarkerGraphInput {
    pub fn new(
        images: Vec<ImageId>,
        detections: DetectionTable,
        object_poses: ObjectPoseTable,
    ) -> Self {
        Self {
            images,
            context: ObserverContext::default(),
            detections,
            object_poses,
        }
    }

    /// Input over every image named in either table, sorted by name.
    pub fn from_tables(detections: DetectionTable, object_poses: ObjectPoseTable) -> Self {
        let images: BTreeSet<ImageId> = detections
            .images()
            .chain(object_poses.images())
            .cloned()
            .collect();
        Self::new(images.into_iter().collect(), detections, object_poses)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkerGraphOutput {
    pub optimized: OptimizedGraph,
    /// Optimized `T_CO` per image that has a camera vertex.
    pub camera_from_object: BTreeMap<ImageId, Iso3>,
    /// Input images without an optimized `T_CO`.
    pub images_without_pose: Vec<ImageId>,
    /// Change of every vertex between initial and optimized estimate.
    pub displacements: BTreeMap<NodeId, PoseError>,
    pub unreachable_markers: Vec<u32>,
    pub unlocalized_images: Vec<ImageId>,
    pub images_without_detections: Vec<ImageId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagePoseExport {
    #[serde(rename = "T_CO_opt", with = "as_matrix")]
    pub camera_from_object: Iso3,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub status: SolveStatus,
    pub initial_cost: Real,
    pub final_cost: Real,
    pub vertices: usize,
    /// Largest vertex translation change in meters.
    pub max_translation_change: Real,
    /// Largest vertex rotation change in radians.
    pub max_rotation_change: Real,
    pub unreachable_markers: Vec<u32>,
    pub unlocalized_images: Vec<ImageId>,
    pub images_without_detections: Vec<ImageId>,
}

/// `{"images": {"<image>": {"T_CO_opt": 4×4}}, "summary": {..}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerGraphExport {
    pub images: BTreeMap<ImageId, ImagePoseExport>,
    pub summary: RunSummary,
}

impl ProblemType for MarkerGraphProblem {
    type Config = MarkerGraphConfig;
    type Input = MarkerGraphInput;
    type State = MarkerGraphState;
    type Output = MarkerGraphOutput;
    type Export = MarkerGraphExport;

    fn name() -> &'static str {
        "marker_graph"
    }

    fn validate_input(input: &MarkerGraphInput) -> Result<()> {
        ensure!(!input.images.is_empty(), "input has no images");
        let mut seen = BTreeSet::new();
        for image in &input.images {
            ensure!(seen.insert(image), "image {image} is listed twice");
        }
        ensure!(
            input.context.marker_size.is_finite() && input.context.marker_size > 0.0,
            "marker size must be positive"
        );
        Ok(())
    }

    fn validate_config(config: &MarkerGraphConfig) -> Result<()> {
        for (name, weight) in [
            ("marker_information_weight", config.marker_information_weight),
            ("model_information_weight", config.model_information_weight),
        ] {
            ensure!(
                weight.is_finite() && weight > 0.0,
                "{name} must be positive, got {weight}"
            );
        }
        match config.robust_loss {
            RobustLoss::None => {}
            RobustLoss::Huber { scale }
            | RobustLoss::Cauchy { scale }
            | RobustLoss::Arctan { scale } => {
                ensure!(scale > 0.0, "robust loss scale must be positive, got {scale}")
            }
        }
        ensure!(config.solver.max_iters > 0, "solver.max_iters must be at least 1");
        Ok(())
    }

    fn on_config_change() -> crate::session::InvalidationPolicy {
        crate::session::InvalidationPolicy::CLEAR_COMPUTED
    }

    fn export(output: &MarkerGraphOutput, _config: &MarkerGraphConfig) -> Result<MarkerGraphExport> {
        let images = output
            .camera_from_object
            .iter()
            .map(|(image, pose)| {
                (
                    image.clone(),
                    ImagePoseExport {
                        camera_from_object: *pose,
                    },
                )
            })
            .collect();

        let report = output.optimized.report();
        let max_translation_change = output
            .displacements
            .values()
            .map(|d| d.translation)
            .fold(0.0, Real::max);
        let max_rotation_change = output
            .displacements
            .values()
            .map(|d| d.rotation)
            .fold(0.0, Real::max);

        Ok(MarkerGraphExport {
            images,
            summary: RunSummary {
                status: report.status,
                initial_cost: report.initial_cost,
                final_cost: report.final_cost,
                vertices: output.optimized.poses().len(),
                max_translation_change,
                max_rotation_change,
                unreachable_markers: output.unreachable_markers.clone(),
                unlocalized_images: output.unlocalized_images.clone(),
                images_without_detections: output.images_without_detections.clone(),
            },
        })
    }
}
