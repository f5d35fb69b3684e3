//! Parameter block conversions between domain types and solver vectors.

pub mod pose_se3;
