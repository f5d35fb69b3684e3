//! Marker pose-graph problem: session types and step functions.

mod problem;
mod state;
mod steps;

pub use problem::{
    ImagePoseExport, MarkerGraphConfig, MarkerGraphExport, MarkerGraphInput, MarkerGraphOutput,
    MarkerGraphProblem, RunSummary,
};
pub use state::MarkerGraphState;
pub use steps::{
    run_pipeline, run_with_observer, step_observation_graph, step_optimize, step_reference_frame,
    OptimizeOptions,
};
