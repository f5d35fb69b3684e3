//! Ground-truth marker scenes and the detections they would produce.
//!
//! A scene holds world poses of markers, cameras and the tracked object.
//! Cameras follow the OpenCV convention (x right, y down, z forward) and the
//! world is z-up.

use super::noise::PoseNoise;
use crate::{relative_pose, Iso3, Mat3, Real, Vec3};
use nalgebra::{Rotation3, Translation3, UnitQuaternion};
use std::collections::BTreeMap;

/// Stream index used for object-pose noise, disjoint from marker indices.
const OBJECT_NOISE_STREAM: usize = 1 << 20;

/// One camera (image) of a synthetic scene.
#[derive(Debug, Clone)]
pub struct SceneCamera {
    pub image: String,
    pub world_from_camera: Iso3,
    /// Markers the camera detects, in detection order.
    pub visible_markers: Vec<u32>,
    /// Whether an object pose is available for this image.
    pub sees_object: bool,
}

#[derive(Debug, Clone)]
pub struct MarkerScene {
    pub markers: BTreeMap<u32, Iso3>,
    pub cameras: Vec<SceneCamera>,
    pub world_from_object: Iso3,
    /// Extra right-multiplied error on specific `(image, marker)` detections.
    pub corruptions: BTreeMap<(String, u32), Iso3>,
}

impl MarkerScene {
    pub fn new(world_from_object: Iso3) -> Self {
        Self {
            markers: BTreeMap::new(),
            cameras: Vec::new(),
            world_from_object,
            corruptions: BTreeMap::new(),
        }
    }

    pub fn with_marker(mut self, marker: u32, world_from_marker: Iso3) -> Self {
        self.markers.insert(marker, world_from_marker);
        self
    }

    pub fn with_camera(
        mut self,
        image: impl Into<String>,
        world_from_camera: Iso3,
        visible_markers: &[u32],
        sees_object: bool,
    ) -> Self {
        self.cameras.push(SceneCamera {
            image: image.into(),
            world_from_camera,
            visible_markers: visible_markers.to_vec(),
            sees_object,
        });
        self
    }

    /// Make one detection an outlier by `error` (applied in the marker frame).
    pub fn with_corruption(mut self, image: impl Into<String>, marker: u32, error: Iso3) -> Self {
        self.corruptions.insert((image.into(), marker), error);
        self
    }

    pub fn camera(&self, image: &str) -> Option<&SceneCamera> {
        self.cameras.iter().find(|c| c.image == image)
    }

    /// Exact `T_CM` for a camera/marker pair.
    pub fn camera_from_marker(&self, image: &str, marker: u32) -> Option<Iso3> {
        let cam = self.camera(image)?;
        let world_from_marker = self.markers.get(&marker)?;
        Some(relative_pose(&cam.world_from_camera, world_from_marker))
    }

    /// Exact `T_CO` for a camera.
    pub fn camera_from_object(&self, image: &str) -> Option<Iso3> {
        let cam = self.camera(image)?;
        Some(relative_pose(&cam.world_from_camera, &self.world_from_object))
    }

    /// Noisy `T_CM` detections per image, in camera order.
    ///
    /// Markers that are not part of the scene are skipped.
    pub fn marker_detections(&self, noise: &PoseNoise) -> Vec<(String, Vec<(u32, Iso3)>)> {
        self.cameras
            .iter()
            .enumerate()
            .map(|(view_idx, cam)| {
                let detections = cam
                    .visible_markers
                    .iter()
                    .filter_map(|&marker| {
                        let exact = self.camera_from_marker(&cam.image, marker)?;
                        let mut measured = noise.apply(view_idx, marker as usize, &exact);
                        if let Some(error) = self.corruptions.get(&(cam.image.clone(), marker)) {
                            measured = measured * error;
                        }
                        Some((marker, measured))
                    })
                    .collect();
                (cam.image.clone(), detections)
            })
            .collect()
    }

    /// Noisy `T_CO` per image; `None` where the object is not observed.
    pub fn object_observations(&self, noise: &PoseNoise) -> Vec<(String, Option<Iso3>)> {
        self.cameras
            .iter()
            .enumerate()
            .map(|(view_idx, cam)| {
                let pose = cam.sees_object.then(|| {
                    let exact = relative_pose(&cam.world_from_camera, &self.world_from_object);
                    noise.apply(view_idx, OBJECT_NOISE_STREAM, &exact)
                });
                (cam.image.clone(), pose)
            })
            .collect()
    }

    /// Four markers on a table around an object, watched by `num_cameras`
    /// cameras on a ring. Camera `i` sees markers `i % 4` and `(i + 1) % 4`
    /// plus the object, so every marker is reachable from marker 0 once
    /// `num_cameras >= 3`.
    pub fn tabletop(num_cameras: usize) -> Self {
        let world_from_object = Iso3::from_parts(
            Translation3::new(0.02, -0.01, 0.05),
            UnitQuaternion::from_euler_angles(0.0, 0.0, 0.3),
        );
        let corners = [(-0.3, -0.2), (0.3, -0.2), (0.3, 0.2), (-0.3, 0.2)];
        let mut scene = Self::new(world_from_object);
        for (idx, (x, y)) in corners.iter().enumerate() {
            let yaw = 0.2 * idx as Real;
            scene = scene.with_marker(
                idx as u32,
                Iso3::from_parts(
                    Translation3::new(*x, *y, 0.0),
                    UnitQuaternion::from_euler_angles(0.0, 0.0, yaw),
                ),
            );
        }

        for i in 0..num_cameras {
            let angle = std::f64::consts::TAU * i as Real / num_cameras.max(1) as Real;
            let eye = Vec3::new(0.8 * angle.cos(), 0.8 * angle.sin(), 0.6);
            let visible = [(i % 4) as u32, ((i + 1) % 4) as u32];
            scene = scene.with_camera(
                format!("img_{i:03}.png"),
                look_at(&eye, &Vec3::zeros()),
                &visible,
                true,
            );
        }
        scene
    }
}

/// World pose of an OpenCV-convention camera at `eye` looking at `target`,
/// with world +Z as up. `eye - target` must not be parallel to +Z.
pub fn look_at(eye: &Vec3, target: &Vec3) -> Iso3 {
    let z = (target - eye).normalize();
    let x = z.cross(&Vec3::z()).normalize();
    let y = z.cross(&x);
    let r = Mat3::from_columns(&[x, y, z]);
    let rotation = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r));
    Iso3::from_parts(Translation3::from(*eye), rotation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PoseError;
    use approx::assert_relative_eq;

    #[test]
    fn look_at_points_optical_axis_at_target() {
        let eye = Vec3::new(1.0, 0.5, 0.7);
        let pose = look_at(&eye, &Vec3::zeros());
        let target_in_cam = pose.inverse() * nalgebra::Point3::origin();
        assert_relative_eq!(target_in_cam.x, 0.0, epsilon = 1e-12);
        assert_relative_eq!(target_in_cam.y, 0.0, epsilon = 1e-12);
        assert_relative_eq!(target_in_cam.z, eye.norm(), epsilon = 1e-12);
        assert_relative_eq!(pose.rotation.to_rotation_matrix().matrix().determinant(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn exact_detections_match_relative_poses() {
        let scene = MarkerScene::tabletop(4);
        let dets = scene.marker_detections(&PoseNoise::none());
        assert_eq!(dets.len(), 4);
        let (image, markers) = &dets[1];
        assert_eq!(markers.iter().map(|(m, _)| *m).collect::<Vec<_>>(), vec![1, 2]);

        let cam = scene.camera(image).unwrap();
        for (marker, t_cm) in markers {
            let world = cam.world_from_camera * t_cm;
            let err = PoseError::between(&world, &scene.markers[marker]);
            assert!(err.within(1e-12, 1e-12));
        }
    }

    #[test]
    fn corruption_only_affects_its_detection() {
        let error = Iso3::translation(0.5, 0.0, 0.0);
        let scene = MarkerScene::tabletop(3).with_corruption("img_000.png", 1, error);
        let dets = scene.marker_detections(&PoseNoise::none());
        let exact_0 = scene.camera_from_marker("img_000.png", 0).unwrap();
        let exact_1 = scene.camera_from_marker("img_000.png", 1).unwrap();
        assert!(PoseError::between(&dets[0].1[0].1, &exact_0).within(1e-12, 1e-12));
        let err = PoseError::between(&dets[0].1[1].1, &exact_1);
        assert_relative_eq!(err.translation, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn object_observations_respect_visibility() {
        let scene = MarkerScene::tabletop(2).with_camera(
            "blind.png",
            look_at(&Vec3::new(0.0, -1.0, 1.0), &Vec3::zeros()),
            &[0],
            false,
        );
        let obs = scene.object_observations(&PoseNoise::none());
        assert!(obs[0].1.is_some());
        assert!(obs[2].1.is_none());
    }
}
