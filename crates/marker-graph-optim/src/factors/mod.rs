//! Residual functions shared by backends.

pub mod relative_pose;

pub use relative_pose::{mat6_to_rows, relative_pose_residual, sqrt_information};
