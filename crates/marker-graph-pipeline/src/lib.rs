//! From marker detections to a consistent world frame.
//!
//! The pipeline runs in three stages over a list of images:
//!
//! 1. [`reference_frame`]: chain marker-to-marker transforms from the origin
//!    marker to every reachable marker,
//! 2. [`observation_graph`]: localize each camera through a placed marker and
//!    record its marker and object measurements,
//! 3. [`graph_builder`] + [`extract`]: solve the SE(3) pose graph and read
//!    back `T_CO` per image.
//!
//! Detection is external; anything implementing
//! [`observer::RelativePoseObserver`] can feed the stages. The
//! [`marker_graph`] module wires the stages into a [`session::PoseGraphSession`].

pub mod error;
pub mod extract;
pub mod graph_builder;
pub mod images;
pub mod marker_graph;
pub mod object_poses;
pub mod observation_graph;
pub mod observer;
pub mod reference_frame;
pub mod session;

pub use error::{PipelineError, PipelineResult};
pub use extract::{camera_from_object, extract, extract_available};
pub use graph_builder::{build_pose_graph, EdgeModel};
pub use images::{image_id, list_image_ids, list_image_paths, ImageId};
pub use object_poses::ObjectPoseTable;
pub use observation_graph::{
    CameraView, Measurement, ObservationGraph, ObservationGraphBuilder, UnlocalizablePolicy,
};
pub use observer::{
    CachedObserver, DetectionTable, MarkerDictionarySpec, MarkerPose, ObserverContext,
    RelativePoseObserver,
};
pub use reference_frame::{FramePropagation, FrameReport, ReferenceFrame, ReferenceFrameBuilder};
