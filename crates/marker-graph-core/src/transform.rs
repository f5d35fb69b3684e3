//! Rigid transforms exchanged as homogeneous 4×4 matrices.
//!
//! External tools (detectors, annotation steps) hand over poses as row-major
//! 4×4 arrays. Parsing validates that the matrix really is a rigid transform;
//! nothing is re-orthogonalized beyond the quaternion normalization that a
//! valid rotation survives unchanged.

use crate::{Iso3, Mat3, Mat4, Real};
use nalgebra::{Rotation3, Translation3, UnitQuaternion};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum absolute deviation tolerated in `RᵀR - I` and in the bottom row.
pub const RIGIDITY_TOLERANCE: Real = 1e-6;

/// Row-major 4×4 matrix as it appears in JSON files.
pub type MatrixRows = [[Real; 4]; 4];

/// Reasons a 4×4 matrix is not a rigid transform.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransformError {
    #[error("transform contains non-finite entries")]
    NonFinite,
    #[error("bottom row must be [0, 0, 0, 1], got {0:?}")]
    NotHomogeneous([Real; 4]),
    #[error("rotation block is not orthonormal (max deviation {deviation:.3e})")]
    NotOrthonormal { deviation: Real },
    #[error("rotation block is a reflection (det = {det:.6})")]
    Reflection { det: Real },
}

/// Convert a homogeneous matrix into an isometry, validating rigidity.
pub fn iso3_from_matrix(m: &Mat4) -> Result<Iso3, TransformError> {
    if m.iter().any(|v| !v.is_finite()) {
        return Err(TransformError::NonFinite);
    }

    let bottom = [m[(3, 0)], m[(3, 1)], m[(3, 2)], m[(3, 3)]];
    let bottom_ok = bottom[..3].iter().all(|v| v.abs() <= RIGIDITY_TOLERANCE)
        && (bottom[3] - 1.0).abs() <= RIGIDITY_TOLERANCE;
    if !bottom_ok {
        return Err(TransformError::NotHomogeneous(bottom));
    }

    let r: Mat3 = m.fixed_view::<3, 3>(0, 0).into_owned();
    let deviation = (r.transpose() * r - Mat3::identity()).amax();
    if deviation > RIGIDITY_TOLERANCE {
        return Err(TransformError::NotOrthonormal { deviation });
    }
    let det = r.determinant();
    if det <= 0.0 {
        return Err(TransformError::Reflection { det });
    }

    let rotation = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r));
    let translation = Translation3::new(m[(0, 3)], m[(1, 3)], m[(2, 3)]);
    Ok(Iso3::from_parts(translation, rotation))
}

/// Homogeneous 4×4 matrix of an isometry.
pub fn iso3_to_matrix(pose: &Iso3) -> Mat4 {
    pose.to_homogeneous()
}

/// Row-major array view of a 4×4 matrix.
pub fn matrix_to_rows(m: &Mat4) -> MatrixRows {
    let mut rows = [[0.0; 4]; 4];
    for (r, row) in rows.iter_mut().enumerate() {
        for (c, v) in row.iter_mut().enumerate() {
            *v = m[(r, c)];
        }
    }
    rows
}

/// Build a 4×4 matrix from row-major arrays.
pub fn rows_to_matrix(rows: &MatrixRows) -> Mat4 {
    Mat4::from_fn(|r, c| rows[r][c])
}

/// Parse row-major arrays into a validated isometry.
pub fn iso3_from_rows(rows: &MatrixRows) -> Result<Iso3, TransformError> {
    iso3_from_matrix(&rows_to_matrix(rows))
}

/// Row-major arrays of an isometry.
pub fn iso3_to_rows(pose: &Iso3) -> MatrixRows {
    matrix_to_rows(&iso3_to_matrix(pose))
}

/// Relative transform `T_AB = T_WA⁻¹ · T_WB` between two world poses.
pub fn relative_pose(world_a: &Iso3, world_b: &Iso3) -> Iso3 {
    world_a.inverse() * world_b
}

/// Translation and rotation magnitude of the transform between two poses.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseError {
    /// Translation distance in the units of the poses (meters).
    pub translation: Real,
    /// Rotation angle in radians.
    pub rotation: Real,
}

impl PoseError {
    /// Difference between `a` and `b` measured as `a⁻¹ · b`.
    pub fn between(a: &Iso3, b: &Iso3) -> Self {
        let delta = relative_pose(a, b);
        // atan2 form stays accurate near zero where acos(w) does not
        let q = delta.rotation.quaternion();
        Self {
            translation: delta.translation.vector.norm(),
            rotation: 2.0 * q.imag().norm().atan2(q.w.abs()),
        }
    }

    pub fn within(&self, translation_tol: Real, rotation_tol: Real) -> bool {
        self.translation <= translation_tol && self.rotation <= rotation_tol
    }
}

/// Serde adapter storing an [`Iso3`] as a row-major 4×4 array.
///
/// Use with `#[serde(with = "marker_graph_core::transform::as_matrix")]`.
pub mod as_matrix {
    use super::{iso3_from_rows, iso3_to_rows, MatrixRows};
    use crate::Iso3;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(pose: &Iso3, serializer: S) -> Result<S::Ok, S::Error> {
        iso3_to_rows(pose).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Iso3, D::Error> {
        let rows = MatrixRows::deserialize(deserializer)?;
        iso3_from_rows(&rows).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for `Option<Iso3>` stored as an optional 4×4 array.
///
/// Combine with `#[serde(default)]` so that a missing key reads as `None`.
pub mod as_matrix_opt {
    use super::{iso3_from_rows, iso3_to_rows, MatrixRows};
    use crate::Iso3;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(pose: &Option<Iso3>, serializer: S) -> Result<S::Ok, S::Error> {
        pose.as_ref().map(iso3_to_rows).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Iso3>, D::Error> {
        Option::<MatrixRows>::deserialize(deserializer)?
            .map(|rows| iso3_from_rows(&rows).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn sample_pose() -> Iso3 {
        Iso3::from_parts(
            Translation3::new(0.3, -0.2, 1.4),
            UnitQuaternion::from_euler_angles(0.2, -0.4, 1.1),
        )
    }

    #[test]
    fn matrix_roundtrip_preserves_pose() {
        let pose = sample_pose();
        let back = iso3_from_matrix(&iso3_to_matrix(&pose)).unwrap();
        assert_relative_eq!(back.to_homogeneous(), pose.to_homogeneous(), epsilon = 1e-12);
    }

    #[test]
    fn rows_are_row_major() {
        let pose = Iso3::translation(1.0, 2.0, 3.0);
        let rows = iso3_to_rows(&pose);
        assert_eq!(rows[0][3], 1.0);
        assert_eq!(rows[1][3], 2.0);
        assert_eq!(rows[2][3], 3.0);
        assert_eq!(rows[3], [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn rejects_non_finite() {
        let mut m = Mat4::identity();
        m[(0, 3)] = Real::NAN;
        assert_eq!(iso3_from_matrix(&m), Err(TransformError::NonFinite));
    }

    #[test]
    fn rejects_projective_bottom_row() {
        let mut m = Mat4::identity();
        m[(3, 0)] = 0.5;
        assert!(matches!(
            iso3_from_matrix(&m),
            Err(TransformError::NotHomogeneous(_))
        ));
    }

    #[test]
    fn rejects_scaled_rotation() {
        let mut m = Mat4::identity();
        m[(0, 0)] = 2.0;
        assert!(matches!(
            iso3_from_matrix(&m),
            Err(TransformError::NotOrthonormal { .. })
        ));
    }

    #[test]
    fn rejects_reflection() {
        let mut m = Mat4::identity();
        m[(2, 2)] = -1.0;
        assert!(matches!(
            iso3_from_matrix(&m),
            Err(TransformError::Reflection { .. })
        ));
    }

    #[test]
    fn composing_with_inverse_gives_identity() {
        let pose = sample_pose();
        let err = PoseError::between(&(pose * pose.inverse()), &Iso3::identity());
        assert!(err.within(1e-12, 1e-12), "{err:?}");
    }

    #[test]
    fn pose_error_reports_translation_and_angle() {
        let a = Iso3::identity();
        let b = Iso3::from_parts(
            Translation3::new(0.0, 3.0, 4.0),
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 0.25),
        );
        let err = PoseError::between(&a, &b);
        assert_relative_eq!(err.translation, 5.0, epsilon = 1e-12);
        assert_relative_eq!(err.rotation, 0.25, epsilon = 1e-12);
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Record {
        #[serde(with = "as_matrix")]
        pose: Iso3,
        #[serde(default, with = "as_matrix_opt")]
        maybe: Option<Iso3>,
    }

    #[test]
    fn serde_adapters_use_nested_arrays() {
        let record = Record {
            pose: sample_pose(),
            maybe: None,
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.starts_with("{\"pose\":[["), "unexpected layout: {json}");

        let back: Record = serde_json::from_str(&json).unwrap();
        assert_relative_eq!(
            back.pose.to_homogeneous(),
            record.pose.to_homogeneous(),
            epsilon = 1e-12
        );
        assert!(back.maybe.is_none());

        let rows = serde_json::to_string(&iso3_to_rows(&record.pose)).unwrap();
        let missing: Record = serde_json::from_str(&format!("{{\"pose\":{rows}}}")).unwrap();
        assert!(missing.maybe.is_none());
    }

    #[test]
    fn serde_rejects_invalid_matrix() {
        let json = r#"{"pose":[[2,0,0,0],[0,1,0,0],[0,0,1,0],[0,0,0,1]]}"#;
        let err = serde_json::from_str::<Record>(json).unwrap_err();
        assert!(err.to_string().contains("orthonormal"), "{err}");
    }
}
