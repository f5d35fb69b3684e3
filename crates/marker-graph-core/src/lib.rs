//! Core SE(3) primitives for `marker-graph`.
//!
//! - linear algebra type aliases (`Real`, `Iso3`, `Mat6`, ...),
//! - validated conversion between 4×4 matrices and isometries,
//! - semantic node identifiers (`[k]`, `cam_<image>`, `model`),
//! - deterministic synthetic marker scenes for tests and demos.
//!
//! # Conventions
//!
//! `T_AB` is the pose of frame `B` expressed in frame `A`. Detector output
//! `T_CM` is marker-in-camera, object annotations `T_CO` are object-in-camera,
//! and world poses `T_WX` are expressed in the frame of the origin marker.

/// Linear algebra type aliases.
mod math;
/// Node identifiers and pose maps.
mod node;
/// Deterministic synthetic scene generation.
pub mod synthetic;
/// Rigid transform validation and serialization.
pub mod transform;

pub use math::*;
pub use node::*;
pub use transform::{
    iso3_from_matrix, iso3_from_rows, iso3_to_matrix, iso3_to_rows, relative_pose, MatrixRows,
    PoseError, TransformError,
};
