//! Deterministic pose noise for synthetic detections.
//!
//! Avoids `thread_rng` so generated scenes are identical across runs and
//! platforms.

use crate::{Iso3, Real, Vec3};
use nalgebra::{Translation3, UnitQuaternion};

/// Uniform SE(3) perturbation: each translation axis in
/// `[-max_abs_translation, +max_abs_translation]` and each rotation-vector
/// component in `[-max_abs_rotation, +max_abs_rotation]`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PoseNoise {
    /// Base seed controlling the pseudo-random sequence.
    pub seed: u64,
    /// Maximum absolute per-axis translation noise (meters).
    pub max_abs_translation: Real,
    /// Maximum absolute per-axis rotation noise (radians).
    pub max_abs_rotation: Real,
}

impl PoseNoise {
    pub fn new(seed: u64, max_abs_translation: Real, max_abs_rotation: Real) -> Self {
        Self {
            seed,
            max_abs_translation,
            max_abs_rotation,
        }
    }

    /// Noise-free instance.
    pub fn none() -> Self {
        Self::default()
    }

    /// Sample a deterministic perturbation for a `(view_idx, item_idx)` key.
    pub fn sample(&self, view_idx: usize, item_idx: usize) -> Iso3 {
        let t_abs = self.max_abs_translation.abs();
        let r_abs = self.max_abs_rotation.abs();
        if t_abs == 0.0 && r_abs == 0.0 {
            return Iso3::identity();
        }

        let mut state = mix_key(self.seed, view_idx, item_idx);
        let mut draw = |scale: Real| {
            state = splitmix64(state);
            (u64_to_unit_f64(state) - 0.5) * 2.0 * scale
        };
        let t = Vec3::new(draw(t_abs), draw(t_abs), draw(t_abs));
        let r = Vec3::new(draw(r_abs), draw(r_abs), draw(r_abs));
        Iso3::from_parts(Translation3::from(t), UnitQuaternion::from_scaled_axis(r))
    }

    /// Right-multiply a measurement by its deterministic perturbation.
    pub fn apply(&self, view_idx: usize, item_idx: usize, pose: &Iso3) -> Iso3 {
        pose * self.sample(view_idx, item_idx)
    }
}

#[inline]
fn mix_key(seed: u64, view_idx: usize, item_idx: usize) -> u64 {
    seed ^ (view_idx as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (item_idx as u64).wrapping_mul(0xBF58_476D_1CE4_E5B9)
}

#[inline]
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[inline]
fn u64_to_unit_f64(x: u64) -> Real {
    // Top 53 bits -> [0, 1).
    let mantissa = x >> 11;
    (mantissa as Real) * (1.0 / ((1u64 << 53) as Real))
}
