//! Shared helpers turning synthetic scenes into pipeline inputs.
#![allow(dead_code)]

use marker_graph_core::synthetic::{noise::PoseNoise, scene::MarkerScene};
use marker_graph_pipeline::marker_graph::MarkerGraphInput;
use marker_graph_pipeline::{
    DetectionTable, MarkerPose, ObjectPoseTable, ObserverContext, PipelineResult,
    RelativePoseObserver,
};
use std::cell::Cell;

pub fn detection_table(scene: &MarkerScene, noise: &PoseNoise) -> DetectionTable {
    let mut table = DetectionTable::new();
    for (image, detections) in scene.marker_detections(noise) {
        let poses = detections
            .into_iter()
            .map(|(marker, t_cm)| MarkerPose::new(marker, t_cm))
            .collect();
        table.insert(image, poses);
    }
    table
}

pub fn object_table(scene: &MarkerScene, noise: &PoseNoise) -> ObjectPoseTable {
    let mut table = ObjectPoseTable::new();
    for (image, t_co) in scene.object_observations(noise) {
        table.insert(image, t_co);
    }
    table
}

pub fn scene_images(scene: &MarkerScene) -> Vec<String> {
    scene.cameras.iter().map(|c| c.image.clone()).collect()
}

pub fn scene_input(scene: &MarkerScene, noise: &PoseNoise) -> MarkerGraphInput {
    MarkerGraphInput::new(
        scene_images(scene),
        detection_table(scene, noise),
        object_table(scene, noise),
    )
}

/// Observer that counts how often it is asked.
pub struct CountingObserver {
    pub table: DetectionTable,
    pub calls: Cell<usize>,
}

impl CountingObserver {
    pub fn new(table: DetectionTable) -> Self {
        Self {
            table,
            calls: Cell::new(0),
        }
    }
}

impl RelativePoseObserver for CountingObserver {
    fn observe(&self, image: &str, context: &ObserverContext) -> PipelineResult<Vec<MarkerPose>> {
        self.calls.set(self.calls.get() + 1);
        self.table.observe(image, context)
    }
}
