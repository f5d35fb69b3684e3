//! Scalar and linear algebra type aliases.
//!
//! Everything in the workspace is expressed in `f64`; rigid transforms are
//! `nalgebra` isometries and measurement weights are 6×6 matrices over the
//! `[translation, rotation]` tangent ordering.

use nalgebra::{Isometry3, Matrix3, Matrix4, Matrix6, Point3, UnitQuaternion, Vector3, Vector6};

/// Scalar type used throughout the library (currently `f64`).
pub type Real = f64;

/// 3D vector with [`Real`] components.
pub type Vec3 = Vector3<Real>;
/// 6D vector, used for SE(3) tangent residuals `[t, r]`.
pub type Vec6 = Vector6<Real>;
/// 3D point with [`Real`] coordinates.
pub type Pt3 = Point3<Real>;
/// 3×3 matrix with [`Real`] entries.
pub type Mat3 = Matrix3<Real>;
/// 4×4 homogeneous matrix with [`Real`] entries.
pub type Mat4 = Matrix4<Real>;
/// 6×6 matrix, used for information (inverse covariance) matrices.
pub type Mat6 = Matrix6<Real>;
/// Unit quaternion rotation.
pub type UnitQuat = UnitQuaternion<Real>;
/// 3D rigid transform (SE(3)) using [`Real`].
///
/// `T_AB: Iso3` maps coordinates expressed in frame `B` into frame `A`, i.e. it
/// is the pose of `B` in `A`. Composition follows `T_AC = T_AB * T_BC`.
pub type Iso3 = Isometry3<Real>;

/// Isotropic information matrix `w · I₆`.
pub fn isotropic_information(weight: Real) -> Mat6 {
    Mat6::identity() * weight
}
