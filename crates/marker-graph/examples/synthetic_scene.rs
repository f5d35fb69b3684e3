//! Marker pose-graph optimization on a synthetic tabletop scene.
//!
//! 1. Generate a scene of markers, cameras and one object
//! 2. Perturb every detection and object pose with bounded noise
//! 3. Run the session pipeline
//! 4. Compare the optimized `T_CO` with ground truth
//!
//! Run with: `cargo run -p marker-graph --example synthetic_scene`
//! (`RUST_LOG=debug` for per-step logging).

use anyhow::Result;
use log::info;
use marker_graph::core::synthetic::{noise::PoseNoise, scene::MarkerScene};
use marker_graph::prelude::*;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let scene = MarkerScene::tabletop(8);
    let noise = PoseNoise::new(7, 0.002, 0.005);

    let mut detections = DetectionTable::new();
    for (image, dets) in scene.marker_detections(&noise) {
        let poses = dets
            .into_iter()
            .map(|(marker, t_cm)| MarkerPose::new(marker, t_cm))
            .collect();
        detections.insert(image, poses);
    }
    let mut object_poses = ObjectPoseTable::new();
    for (image, t_co) in scene.object_observations(&noise) {
        object_poses.insert(image, t_co);
    }

    let images: Vec<ImageId> = scene.cameras.iter().map(|c| c.image.clone()).collect();
    let input = MarkerGraphInput::new(images, detections, object_poses);
    let mut session = PoseGraphSession::<MarkerGraphProblem>::with_description("synthetic tabletop");
    session.set_input(input)?;
    run_pipeline(&mut session, None)?;

    let output = session.require_output()?;
    info!(
        "{} images optimized, {} without pose",
        output.camera_from_object.len(),
        output.images_without_pose.len()
    );

    println!("{:<12} {:>14} {:>14}", "image", "|dt| [mm]", "|dR| [mrad]");
    for (image, t_co) in &output.camera_from_object {
        let Some(truth) = scene.camera_from_object(image) else {
            continue;
        };
        let err = PoseError::between(&truth, t_co);
        println!(
            "{:<12} {:>14.3} {:>14.3}",
            image,
            err.translation * 1e3,
            err.rotation * 1e3
        );
    }

    let export = session.export()?;
    println!("{}", serde_json::to_string_pretty(&export.summary)?);
    Ok(())
}
