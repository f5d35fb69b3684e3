//! End-to-end pose-graph solves on synthetic marker scenes.

use anyhow::Result;
use marker_graph_core::synthetic::{noise::PoseNoise, scene::MarkerScene};
use marker_graph_core::{isotropic_information, Iso3, Mat6, NodeId, PoseError, PoseMap};
use marker_graph_optim::ir::{ProblemIR, RobustLoss};
use marker_graph_optim::{
    BackendSolution, BackendSolveOptions, OptimBackend, PoseGraph, SolveStatus,
};
use nalgebra::DVector;
use std::cell::RefCell;
use std::collections::HashMap;

/// Build a graph for `scene` with ground-truth marker 0 fixed and every other
/// vertex initialized from a perturbed ground truth.
fn graph_for_scene<B: OptimBackend>(
    mut graph: PoseGraph<B>,
    scene: &MarkerScene,
    detector_noise: &PoseNoise,
    information: Mat6,
    loss: RobustLoss,
) -> Result<PoseGraph<B>> {
    let init_noise = PoseNoise::new(99, 0.02, 0.05);

    for (&marker, world_from_marker) in &scene.markers {
        let fixed = marker == 0;
        let init = if fixed {
            *world_from_marker
        } else {
            init_noise.apply(0, marker as usize, world_from_marker)
        };
        graph.add_vertex(NodeId::marker(marker), init, fixed)?;
    }
    for (idx, cam) in scene.cameras.iter().enumerate() {
        let init = init_noise.apply(idx + 1, 100, &cam.world_from_camera);
        graph.add_vertex(NodeId::camera(&cam.image), init, false)?;
    }
    graph.add_vertex(
        NodeId::Model,
        init_noise.apply(0, 200, &scene.world_from_object),
        false,
    )?;

    for (image, detections) in scene.marker_detections(detector_noise) {
        for (marker, t_cm) in detections {
            graph.add_edge(
                &NodeId::camera(&image),
                &NodeId::marker(marker),
                t_cm,
                information,
                loss,
            )?;
        }
    }
    for (image, t_co) in scene.object_observations(detector_noise) {
        if let Some(t_co) = t_co {
            graph.add_edge(&NodeId::camera(&image), &NodeId::Model, t_co, information, loss)?;
        }
    }
    Ok(graph)
}

#[test]
fn noise_free_scene_recovers_ground_truth() -> Result<()> {
    let scene = MarkerScene::tabletop(6);
    let mut graph = graph_for_scene(
        PoseGraph::new(),
        &scene,
        &PoseNoise::none(),
        Mat6::identity(),
        RobustLoss::default_huber(),
    )?;

    let report = graph.optimize(100)?;
    assert!(report.final_cost < report.initial_cost);
    assert!(report.final_cost < 1e-8, "final cost {}", report.final_cost);

    let model = graph.get_pose(&NodeId::Model).unwrap();
    let err = PoseError::between(&model, &scene.world_from_object);
    assert!(err.within(1e-4, 1e-4), "{err:?}");

    for (&marker, truth) in &scene.markers {
        let est = graph.get_pose(&NodeId::marker(marker)).unwrap();
        assert!(PoseError::between(&est, truth).within(1e-4, 1e-4));
    }
    Ok(())
}

#[test]
fn fixed_vertex_does_not_move() -> Result<()> {
    let scene = MarkerScene::tabletop(4);
    let mut graph = graph_for_scene(
        PoseGraph::new(),
        &scene,
        &PoseNoise::new(3, 0.002, 0.01),
        Mat6::identity(),
        RobustLoss::None,
    )?;
    graph.optimize(50)?;
    let origin = graph.get_pose(&NodeId::marker(0)).unwrap();
    assert_eq!(origin, scene.markers[&0]);
    Ok(())
}

#[test]
fn second_optimize_is_idempotent() -> Result<()> {
    let scene = MarkerScene::tabletop(6);
    let mut graph = graph_for_scene(
        PoseGraph::new(),
        &scene,
        &PoseNoise::new(5, 0.001, 0.005),
        Mat6::identity(),
        RobustLoss::default_huber(),
    )?;
    graph.optimize(100)?;
    let first: PoseMap = graph.poses();

    let report = graph.optimize(100)?;
    let snapshot = graph.optimized_graph().unwrap();
    assert_eq!(snapshot.report(), &report);
    for (id, change) in snapshot.displacements(&first) {
        assert!(change.within(1e-5, 1e-5), "{id} moved by {change:?}");
    }
    Ok(())
}

#[test]
fn estimates_stay_rigid() -> Result<()> {
    let scene = MarkerScene::tabletop(5);
    let mut graph = graph_for_scene(
        PoseGraph::new(),
        &scene,
        &PoseNoise::new(11, 0.003, 0.02),
        Mat6::identity(),
        RobustLoss::default_huber(),
    )?;
    graph.optimize(100)?;
    for (id, pose) in graph.poses() {
        let err = PoseError::between(&(pose * pose.inverse()), &Iso3::identity());
        assert!(err.within(1e-12, 1e-12), "{id}: {err:?}");
        let q = pose.rotation.into_inner();
        assert!((q.norm() - 1.0).abs() < 1e-12);
    }
    Ok(())
}

#[test]
fn huber_absorbs_gross_outlier() -> Result<()> {
    // With 5 mm / 5 mrad standard deviations the outlier's whitened error is
    // far above the Huber threshold while regular noise stays below it.
    let information = isotropic_information(1.0 / (0.005 * 0.005));
    let scene = MarkerScene::tabletop(6).with_corruption(
        "img_000.png",
        1,
        Iso3::translation(0.3, -0.2, 0.1),
    );
    let noise = PoseNoise::new(21, 0.001, 0.003);

    let mut robust = graph_for_scene(
        PoseGraph::new(),
        &scene,
        &noise,
        information,
        RobustLoss::default_huber(),
    )?;
    robust.optimize(100)?;
    let model = robust.get_pose(&NodeId::Model).unwrap();
    let robust_err = PoseError::between(&model, &scene.world_from_object);
    assert!(robust_err.within(0.01, 0.02), "robust model error {robust_err:?}");

    let mut plain = graph_for_scene(PoseGraph::new(), &scene, &noise, information, RobustLoss::None)?;
    plain.optimize(100)?;
    let model = plain.get_pose(&NodeId::Model).unwrap();
    let plain_err = PoseError::between(&model, &scene.world_from_object);
    assert!(
        plain_err.translation > 0.005 && plain_err.translation > 3.0 * robust_err.translation,
        "least squares {plain_err:?} vs Huber {robust_err:?}"
    );
    Ok(())
}

#[test]
fn iteration_cap_reports_best_effort() -> Result<()> {
    let scene = MarkerScene::tabletop(6);
    let mut graph = graph_for_scene(
        PoseGraph::new(),
        &scene,
        &PoseNoise::new(5, 0.001, 0.005),
        Mat6::identity(),
        RobustLoss::default_huber(),
    )?;
    let report = graph.optimize(1)?;
    assert_eq!(report.status, SolveStatus::BestEffort);
    assert!(!report.converged());
    assert!(report.final_cost.is_finite());
    assert!(
        report.final_cost < report.initial_cost,
        "cost {} -> {}",
        report.initial_cost,
        report.final_cost
    );
    Ok(())
}

#[test]
fn converged_solve_is_stationary() -> Result<()> {
    let scene = MarkerScene::tabletop(6);
    let mut graph = graph_for_scene(
        PoseGraph::new(),
        &scene,
        &PoseNoise::new(17, 0.002, 0.01),
        isotropic_information(1.0 / (0.005 * 0.005)),
        RobustLoss::None,
    )?;
    let report = graph.optimize(200)?;
    assert_eq!(report.status, SolveStatus::Converged);
    let first = graph.poses();

    graph.optimize(200)?;
    let snapshot = graph.optimized_graph().unwrap();
    for (id, change) in snapshot.displacements(&first) {
        assert!(change.within(1e-7, 1e-7), "{id} moved by {change:?}");
    }
    Ok(())
}

/// Backend that records what it was asked to solve and returns the input.
#[derive(Default)]
struct RecordingBackend {
    seen: RefCell<Vec<(usize, usize)>>,
}

impl OptimBackend for RecordingBackend {
    fn solve(
        &self,
        ir: &ProblemIR,
        initial: &HashMap<String, DVector<f64>>,
        _opts: &BackendSolveOptions,
    ) -> Result<BackendSolution> {
        ir.validate()?;
        self.seen
            .borrow_mut()
            .push((ir.params.len(), ir.residuals.len()));
        Ok(BackendSolution {
            params: initial.clone(),
            initial_cost: 1.0,
            final_cost: 1.0,
            status: SolveStatus::BestEffort,
        })
    }
}

#[test]
fn backend_is_swappable() -> Result<()> {
    let scene = MarkerScene::tabletop(3);
    let mut graph = graph_for_scene(
        PoseGraph::with_backend(RecordingBackend::default()),
        &scene,
        &PoseNoise::none(),
        Mat6::identity(),
        RobustLoss::None,
    )?;
    let before = graph.poses();
    let report = graph.optimize(10)?;

    assert_eq!(report.status, SolveStatus::BestEffort);
    assert!(!report.converged());
    for (id, pose) in graph.poses() {
        assert!(PoseError::between(&pose, &before[&id]).within(1e-12, 1e-12));
    }
    assert_eq!(graph.backend().seen.borrow().as_slice(), &[(8, 9)]);

    let (ir, _) = graph.build_ir()?;
    let fixed: Vec<_> = ir
        .params
        .iter()
        .filter(|p| p.fixed.is_all_fixed(p.dim))
        .map(|p| p.name.clone())
        .collect();
    assert_eq!(fixed, vec!["pose/[0]".to_string()]);
    Ok(())
}
