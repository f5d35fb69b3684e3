//! High-level entry crate for `marker-graph`.
//!
//! Given photographs of a scene scattered with fiducial markers, a per-image
//! marker detector and a rough per-image object pose, this crate builds one
//! world frame anchored at an origin marker, localizes every camera in it and
//! refines all poses jointly as an SE(3) pose graph. The result is a
//! consistent camera-from-object pose for every usable image.
//!
//! It offers **two complementary APIs**.
//!
//! ## 1. Session API (Structured Workflows)
//!
//! Use when you want:
//! - validated input and config,
//! - intermediate state that survives a JSON checkpoint,
//! - an operation log and a serializable export.
//!
//! ```no_run
//! use marker_graph::prelude::*;
//!
//! # fn main() -> anyhow::Result<()> {
//! let detections = DetectionTable::from_json_file("detections.json")?;
//! let object_poses = ObjectPoseTable::from_json_file("poses.json")?;
//! let input = MarkerGraphInput::from_tables(detections, object_poses);
//!
//! let mut session = PoseGraphSession::<MarkerGraphProblem>::with_input(input)?;
//!
//! // Step by step, inspecting state in between
//! step_reference_frame(&mut session)?;
//! step_observation_graph(&mut session)?;
//! std::fs::write("checkpoint.json", session.to_json()?)?;
//! step_optimize(&mut session, None)?;
//!
//! // or all at once: run_pipeline(&mut session, None)?;
//! let export = session.export()?;
//! println!("{}", serde_json::to_string_pretty(&export)?);
//! # Ok(())
//! # }
//! ```
//!
//! ## 2. Imperative Function API (Custom Workflows)
//!
//! Use when the detector runs live, or when you need to adjust the graph
//! before solving it.
//!
//! ```no_run
//! use marker_graph::prelude::*;
//!
//! # fn main() -> anyhow::Result<()> {
//! # let images: Vec<ImageId> = vec![];
//! # let detector = DetectionTable::new();
//! # let object_poses = ObjectPoseTable::new();
//! let context = ObserverContext::default();
//! let (frame, _report) = ReferenceFrameBuilder::new(0).build(&images, &detector, &context)?;
//! let observations = ObservationGraphBuilder::default()
//!     .build(&images, &detector, &context, &frame, &object_poses)?;
//!
//! let mut graph = build_pose_graph(PoseGraph::new(), &frame, &observations, &EdgeModel::default())?;
//! let report = graph.optimize(100)?;
//! println!("{:?}, final cost {:.3e}", report.status, report.final_cost);
//!
//! let optimized = graph.optimized_graph().expect("solved above");
//! let poses = extract(&optimized, &images)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Module Organization
//!
//! - [`core`]: SE(3) types, node ids, 4×4 conversion and synthetic scenes
//! - [`optim`]: the pose graph and its tiny-solver backend
//! - [`pipeline`]: observers, frame propagation, graph assembly, extraction
//! - [`session`]: the session framework and the marker-graph problem type
//! - [`prelude`]: the names most programs need

/// SE(3) primitives, node identifiers and synthetic scenes.
pub mod core {
    pub use marker_graph_core::*;
}

/// Pose-graph container, residual factors and solver backends.
pub mod optim {
    pub use marker_graph_optim::*;
}

/// Observation stages from detections to optimized object poses.
pub mod pipeline {
    pub use marker_graph_pipeline::*;
}

/// Session framework plus the marker-graph problem and its steps.
///
/// ```no_run
/// use marker_graph::session::{run_pipeline, MarkerGraphInput, MarkerGraphProblem, PoseGraphSession};
///
/// # fn main() -> anyhow::Result<()> {
/// # let input: MarkerGraphInput = todo!();
/// let mut session = PoseGraphSession::<MarkerGraphProblem>::with_input(input)?;
/// run_pipeline(&mut session, None)?;
/// let export = session.export()?;
/// # Ok(())
/// # }
/// ```
pub mod session {
    pub use marker_graph_pipeline::marker_graph::*;
    pub use marker_graph_pipeline::session::*;
}

/// Convenient re-exports for common use cases.
///
/// Import with `use marker_graph::prelude::*;`.
pub mod prelude {
    // Core types
    pub use crate::core::{Iso3, Mat6, NodeId, PoseError, PoseMap, Real};

    // Optimization
    pub use crate::optim::{BackendSolveOptions, PoseGraph, RobustLoss, SolveStatus};

    // Pipeline stages
    pub use crate::pipeline::{
        build_pose_graph, extract, extract_available, list_image_ids, DetectionTable, EdgeModel,
        FramePropagation, ImageId, MarkerPose, ObjectPoseTable, ObservationGraphBuilder,
        ObserverContext, ReferenceFrameBuilder, RelativePoseObserver, UnlocalizablePolicy,
    };

    // Session API
    pub use crate::session::{
        run_pipeline, run_with_observer, step_observation_graph, step_optimize,
        step_reference_frame, MarkerGraphConfig, MarkerGraphExport, MarkerGraphInput,
        MarkerGraphProblem, PoseGraphSession, ProblemType,
    };
}
