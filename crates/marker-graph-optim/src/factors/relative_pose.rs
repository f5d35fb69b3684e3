//! Relative-pose (odometry-style) residual between two SE(3) vertices.

use crate::params::pose_se3::iso3_to_se3_array;
use anyhow::{ensure, Result};
use marker_graph_core::{Iso3, Mat6, Vec6};
use nalgebra::{DVectorView, Matrix6, Quaternion, RealField, SVector, UnitQuaternion, Vector3};

fn unpack_se3<T: RealField>(v: DVectorView<'_, T>) -> (UnitQuaternion<T>, Vector3<T>) {
    let q = UnitQuaternion::from_quaternion(Quaternion::new(
        v[3].clone(),
        v[0].clone(),
        v[1].clone(),
        v[2].clone(),
    ));
    let t = Vector3::new(v[4].clone(), v[5].clone(), v[6].clone());
    (q, t)
}

/// Residual of measuring `measurement = T_ab` between world poses `a` and `b`.
///
/// With `E = Z⁻¹ · (T_wa⁻¹ · T_wb)` the residual is
/// `sqrt_info · [t_E; 2·vec(q_E)]`, where `q_E` is flipped to `w ≥ 0` so the
/// error is continuous around identity.
///
/// # Parameters
/// - `a`, `b`: `[qx, qy, qz, qw, tx, ty, tz]` world poses
/// - `measurement`: measured `T_ab` in the same layout
/// - `sqrt_info`: row-major upper factor `Lᵀ` of the information `L·Lᵀ`
pub(crate) fn relative_pose_residual_generic<T: RealField>(
    a: DVectorView<'_, T>,
    b: DVectorView<'_, T>,
    measurement: &[f64; 7],
    sqrt_info: &[[f64; 6]; 6],
) -> SVector<T, 6> {
    let (qa, ta) = unpack_se3(a);
    let (qb, tb) = unpack_se3(b);

    // T_ab = T_wa⁻¹ · T_wb
    let q_ab = qa.inverse() * qb;
    let t_ab = qa.inverse_transform_vector(&(tb - ta));

    let qz = UnitQuaternion::from_quaternion(Quaternion::new(
        T::from_f64(measurement[3]).unwrap(),
        T::from_f64(measurement[0]).unwrap(),
        T::from_f64(measurement[1]).unwrap(),
        T::from_f64(measurement[2]).unwrap(),
    ));
    let tz = Vector3::new(
        T::from_f64(measurement[4]).unwrap(),
        T::from_f64(measurement[5]).unwrap(),
        T::from_f64(measurement[6]).unwrap(),
    );

    // E = Z⁻¹ · T_ab
    let q_err = qz.inverse() * q_ab;
    let t_err = qz.inverse_transform_vector(&(t_ab - tz));

    let two = T::from_f64(2.0).unwrap();
    let q_err = q_err.into_inner();
    let sign = if q_err.w.clone() < T::zero() {
        -two
    } else {
        two
    };
    let r_vec = q_err.imag() * sign;

    let err = SVector::<T, 6>::new(
        t_err.x.clone(),
        t_err.y.clone(),
        t_err.z.clone(),
        r_vec.x.clone(),
        r_vec.y.clone(),
        r_vec.z.clone(),
    );
    let s = Matrix6::<T>::from_fn(|r, c| T::from_f64(sqrt_info[r][c]).unwrap());
    s * err
}

/// `f64` evaluation of the relative-pose residual on isometries.
pub fn relative_pose_residual(
    world_a: &Iso3,
    world_b: &Iso3,
    measured: &Iso3,
    sqrt_info: &Mat6,
) -> Vec6 {
    let a = nalgebra::DVector::from_row_slice(&iso3_to_se3_array(world_a));
    let b = nalgebra::DVector::from_row_slice(&iso3_to_se3_array(world_b));
    relative_pose_residual_generic(
        a.as_view(),
        b.as_view(),
        &iso3_to_se3_array(measured),
        &mat6_to_rows(sqrt_info),
    )
}

/// Square-root information `Lᵀ` such that `information = L·Lᵀ`.
///
/// The information matrix must be symmetric positive definite.
pub fn sqrt_information(information: &Mat6) -> Result<Mat6> {
    ensure!(
        information.iter().all(|v| v.is_finite()),
        "information matrix contains non-finite entries"
    );
    let asym = (information - information.transpose()).amax();
    ensure!(
        asym <= 1e-9 * information.amax().max(1.0),
        "information matrix is not symmetric (max asymmetry {asym:.3e})"
    );
    let chol = information
        .cholesky()
        .ok_or_else(|| anyhow::anyhow!("information matrix is not positive definite"))?;
    Ok(chol.l().transpose())
}

/// Row-major arrays of a 6×6 matrix.
pub fn mat6_to_rows(m: &Mat6) -> [[f64; 6]; 6] {
    let mut rows = [[0.0; 6]; 6];
    for (r, row) in rows.iter_mut().enumerate() {
        for (c, v) in row.iter_mut().enumerate() {
            *v = m[(r, c)];
        }
    }
    rows
}
