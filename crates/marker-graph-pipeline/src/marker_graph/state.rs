//! Intermediate results kept between marker-graph steps.

use marker_graph_core::PoseMap;
use serde::{Deserialize, Serialize};

use crate::observation_graph::ObservationGraph;
use crate::reference_frame::{FrameReport, ReferenceFrame};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarkerGraphState {
    pub reference_frame: Option<ReferenceFrame>,
    pub frame_report: Option<FrameReport>,
    pub observation_graph: Option<ObservationGraph>,
    /// Initial vertex estimates derived from the frame and observations.
    pub initial_poses: Option<PoseMap>,
}

impl MarkerGraphState {
    pub fn has_reference_frame(&self) -> bool {
        self.reference_frame.is_some()
    }

    pub fn has_observation_graph(&self) -> bool {
        self.observation_graph.is_some()
    }

    /// Drop everything derived from the reference frame.
    pub fn clear_observations(&mut self) {
        self.observation_graph = None;
        self.initial_poses = None;
    }
}
