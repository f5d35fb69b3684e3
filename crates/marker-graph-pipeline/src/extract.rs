//! Reading object-in-camera transforms back from a solved graph.

use crate::error::{PipelineError, PipelineResult};
use crate::images::ImageId;
use marker_graph_core::{Iso3, NodeId};
use marker_graph_optim::OptimizedGraph;
use std::collections::BTreeMap;

/// `T_CO = T_WC⁻¹ · T_WO` for one image.
pub fn camera_from_object(graph: &OptimizedGraph, image: &str) -> PipelineResult<Iso3> {
    let world_from_model = graph
        .pose(&NodeId::Model)
        .ok_or(PipelineError::MissingObjectPose)?;
    let world_from_camera =
        graph
            .pose(&NodeId::camera(image))
            .ok_or_else(|| PipelineError::MissingCameraPose {
                image: image.to_string(),
            })?;
    Ok(world_from_camera.inverse() * world_from_model)
}

/// `T_CO` for every image; any image without a camera vertex is an error.
pub fn extract(graph: &OptimizedGraph, images: &[ImageId]) -> PipelineResult<BTreeMap<ImageId, Iso3>> {
    images
        .iter()
        .map(|image| Ok((image.clone(), camera_from_object(graph, image)?)))
        .collect()
}

/// `T_CO` for every image that has a camera vertex, plus the images that
/// have none.
///
/// A missing model vertex is still an error.
pub fn extract_available(
    graph: &OptimizedGraph,
    images: &[ImageId],
) -> PipelineResult<(BTreeMap<ImageId, Iso3>, Vec<ImageId>)> {
    let mut poses = BTreeMap::new();
    let mut missing = Vec::new();
    for image in images {
        match camera_from_object(graph, image) {
            Ok(pose) => {
                poses.insert(image.clone(), pose);
            }
            Err(PipelineError::MissingCameraPose { .. }) => missing.push(image.clone()),
            Err(err) => return Err(err),
        }
    }
    Ok((poses, missing))
}

#[cfg(test)]
mod tests {
    use super::*;
    use marker_graph_core::PoseMap;
    use marker_graph_optim::{SolveReport, SolveStatus};
    use nalgebra::{Translation3, UnitQuaternion};

    fn solved(poses: PoseMap) -> OptimizedGraph {
        OptimizedGraph::new(
            poses,
            SolveReport {
                initial_cost: 0.0,
                final_cost: 0.0,
                status: SolveStatus::Converged,
            },
        )
    }

    #[test]
    fn identity_camera_returns_model_pose_exactly() {
        let model = Iso3::from_parts(
            Translation3::new(0.3, -0.1, 0.7),
            UnitQuaternion::from_euler_angles(0.1, 0.2, 0.3),
        );
        let mut poses = PoseMap::new();
        poses.insert(NodeId::camera("a.png"), Iso3::identity());
        poses.insert(NodeId::Model, model);
        let graph = solved(poses);
        assert_eq!(camera_from_object(&graph, "a.png").unwrap(), model);
    }

    #[test]
    fn missing_vertices_are_typed_errors() {
        let mut poses = PoseMap::new();
        poses.insert(NodeId::camera("a.png"), Iso3::identity());
        let no_model = solved(poses.clone());
        assert!(matches!(
            camera_from_object(&no_model, "a.png"),
            Err(PipelineError::MissingObjectPose)
        ));

        poses.insert(NodeId::Model, Iso3::translation(0.0, 0.0, 1.0));
        let graph = solved(poses);
        let images = vec!["a.png".to_string(), "b.png".to_string()];
        assert!(matches!(
            extract(&graph, &images),
            Err(PipelineError::MissingCameraPose { ref image }) if image == "b.png"
        ));

        let (found, missing) = extract_available(&graph, &images).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(missing, vec!["b.png"]);
        assert!(extract_available(&no_model, &images).is_err());
    }
}
