//! SE(3) parameter packing for tiny-solver.
//!
//! Storage layout is `[qx, qy, qz, qw, tx, ty, tz]`, matching the ambient
//! representation of the solver's SE(3) manifold.

use anyhow::{ensure, Result};
use marker_graph_core::Iso3;
use nalgebra::{DVector, DVectorView, Quaternion, UnitQuaternion, Vector3};

/// Ambient dimension of a packed SE(3) pose.
pub const SE3_DIM: usize = 7;

/// Pack an `Iso3` into `[qx, qy, qz, qw, tx, ty, tz]`.
pub fn iso3_to_se3_array(pose: &Iso3) -> [f64; 7] {
    let q = pose.rotation.into_inner();
    let t = pose.translation.vector;
    [q.i, q.j, q.k, q.w, t.x, t.y, t.z]
}

/// Pack an `Iso3` into a 7D parameter vector.
pub fn iso3_to_se3_dvec(pose: &Iso3) -> DVector<f64> {
    DVector::from_row_slice(&iso3_to_se3_array(pose))
}

/// Unpack a 7D parameter vector into an `Iso3`.
///
/// The quaternion is renormalized; non-finite or degenerate quaternions are
/// rejected.
pub fn se3_dvec_to_iso3(v: DVectorView<'_, f64>) -> Result<Iso3> {
    ensure!(
        v.len() == SE3_DIM,
        "expected se3 vector of length 7, got {}",
        v.len()
    );
    ensure!(
        v.iter().all(|x| x.is_finite()),
        "se3 vector contains non-finite values: {:?}",
        v.as_slice()
    );
    let quat = Quaternion::new(v[3], v[0], v[1], v[2]);
    ensure!(quat.norm() > 1e-12, "se3 vector has a degenerate quaternion");
    let rot = UnitQuaternion::from_quaternion(quat);
    let trans = Vector3::new(v[4], v[5], v[6]);
    Ok(Iso3::from_parts(trans.into(), rot))
}
