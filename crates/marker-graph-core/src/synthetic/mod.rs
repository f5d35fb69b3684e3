//! Deterministic synthetic marker scenes.
//!
//! Used by tests and demos across the workspace:
//! - ground-truth scenes of markers, cameras and an object,
//! - the `T_CM` / `T_CO` measurements those scenes produce,
//! - deterministic pseudo-random pose noise and explicit outliers.
//!
//! # Example
//!
//! ```
//! use marker_graph_core::synthetic::{noise::PoseNoise, scene::MarkerScene};
//!
//! let scene = MarkerScene::tabletop(6);
//! let detections = scene.marker_detections(&PoseNoise::new(1, 0.001, 0.005));
//! assert_eq!(detections.len(), 6);
//! ```

pub mod noise;
pub mod scene;
