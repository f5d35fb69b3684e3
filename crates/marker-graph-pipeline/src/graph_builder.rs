//! Assembly of the SE(3) pose graph from a reference frame and observations.

use crate::observation_graph::ObservationGraph;
use crate::reference_frame::ReferenceFrame;
use anyhow::Result;
use log::debug;
use marker_graph_core::{Mat6, NodeId};
use marker_graph_optim::{OptimBackend, PoseGraph, RobustLoss};

/// Information matrices and robust kernel assigned to graph edges.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeModel {
    pub marker_information: Mat6,
    pub model_information: Mat6,
    pub loss: RobustLoss,
}

impl Default for EdgeModel {
    fn default() -> Self {
        Self {
            marker_information: Mat6::identity(),
            model_information: Mat6::identity(),
            loss: RobustLoss::default_huber(),
        }
    }
}

impl EdgeModel {
    fn information_for(&self, target: &NodeId) -> Mat6 {
        match target {
            NodeId::Model => self.model_information,
            _ => self.marker_information,
        }
    }
}

/// Add every vertex and edge to `graph`.
///
/// Vertices are inserted in [`NodeId`] order: placed markers (origin fixed),
/// localized cameras, then the model. One edge per measurement, directed
/// camera → target.
pub fn build_pose_graph<B: OptimBackend>(
    mut graph: PoseGraph<B>,
    frame: &ReferenceFrame,
    observations: &ObservationGraph,
    edges: &EdgeModel,
) -> Result<PoseGraph<B>> {
    let origin = frame.origin();
    for (id, initial) in observations.initial_poses(frame) {
        let fixed = id == origin;
        graph.add_vertex(id, initial, fixed)?;
    }

    for view in &observations.views {
        let camera = view.node();
        for m in &view.measurements {
            graph.add_edge(
                &camera,
                &m.target,
                m.camera_from_target,
                edges.information_for(&m.target),
                edges.loss,
            )?;
        }
    }
    debug!(
        "pose graph assembled: {} vertices, {} edges",
        graph.num_vertices(),
        graph.num_edges()
    );
    Ok(graph)
}
