//! Step functions for the marker-graph problem.
//!
//! `step_reference_frame` → `step_observation_graph` → `step_optimize`, or
//! all three through [`run_pipeline`].

use anyhow::{anyhow, Result};
use log::info;
use marker_graph_optim::{BackendSolveOptions, PoseGraph};

use crate::extract::extract_available;
use crate::graph_builder::build_pose_graph;
use crate::images::ImageId;
use crate::object_poses::ObjectPoseTable;
use crate::observation_graph::ObservationGraph;
use crate::observer::{CachedObserver, ObserverContext, RelativePoseObserver};
use crate::reference_frame::{FrameReport, ReferenceFrame};
use crate::session::{PoseGraphSession, ProblemType};

use super::problem::{MarkerGraphConfig, MarkerGraphOutput, MarkerGraphProblem};

/// Per-call overrides of the configured solver options.
#[derive(Debug, Clone, Default)]
pub struct OptimizeOptions {
    pub max_iters: Option<usize>,
    pub verbosity: Option<usize>,
}

impl OptimizeOptions {
    fn apply(&self, base: &BackendSolveOptions) -> BackendSolveOptions {
        let mut opts = base.clone();
        if let Some(max_iters) = self.max_iters {
            opts.max_iters = max_iters;
        }
        if let Some(verbosity) = self.verbosity {
            opts.verbosity = verbosity;
        }
        opts
    }
}

fn optimize_observations(
    frame: &ReferenceFrame,
    frame_report: &FrameReport,
    observations: &ObservationGraph,
    images: &[ImageId],
    config: &MarkerGraphConfig,
    solver: &BackendSolveOptions,
) -> Result<MarkerGraphOutput> {
    let initial = observations.initial_poses(frame);
    let mut graph = build_pose_graph(PoseGraph::new(), frame, observations, &config.edge_model())?;
    graph.optimize_with(solver)?;
    let optimized = graph
        .optimized_graph()
        .ok_or_else(|| anyhow!("pose graph has no solution after optimization"))?;

    let (camera_from_object, images_without_pose) = extract_available(&optimized, images)?;
    let displacements = optimized.displacements(&initial);

    Ok(MarkerGraphOutput {
        optimized,
        camera_from_object,
        images_without_pose,
        displacements,
        unreachable_markers: frame_report.unreachable_markers.clone(),
        unlocalized_images: observations.unlocalized_images.clone(),
        images_without_detections: observations.images_without_detections.clone(),
    })
}

/// Place every reachable marker in the origin marker's frame.
pub fn step_reference_frame(session: &mut PoseGraphSession<MarkerGraphProblem>) -> Result<()> {
    session.validate()?;
    let input = session.require_input()?;

    let (frame, report) =
        session
            .config
            .frame_builder()
            .build(&input.images, &input.detections, &input.context)?;

    let notes = format!(
        "{} markers placed, unreachable {:?}",
        frame.len(),
        report.unreachable_markers
    );
    session.state.reference_frame = Some(frame);
    session.state.frame_report = Some(report);
    session.state.clear_observations();
    session.clear_output();
    session.log_success_with_notes("reference_frame", notes);
    Ok(())
}

/// Localize cameras and collect every camera→marker / camera→object
/// measurement.
pub fn step_observation_graph(session: &mut PoseGraphSession<MarkerGraphProblem>) -> Result<()> {
    session.validate()?;
    let input = session.require_input()?;
    let frame = session
        .state
        .reference_frame
        .as_ref()
        .ok_or_else(|| anyhow!("reference frame required before building the observation graph"))?;

    let result = session.config.observation_builder().build(
        &input.images,
        &input.detections,
        &input.context,
        frame,
        &input.object_poses,
    );
    let observations = match result {
        Ok(observations) => observations,
        Err(err) => {
            session.log_failure("observation_graph", err.to_string());
            return Err(err.into());
        }
    };

    let initial = observations.initial_poses(frame);
    let notes = format!(
        "{} cameras, {} measurements, {} unlocalized, {} without detections",
        observations.views.len(),
        observations.num_measurements(),
        observations.unlocalized_images.len(),
        observations.images_without_detections.len()
    );
    session.state.observation_graph = Some(observations);
    session.state.initial_poses = Some(initial);
    session.clear_output();
    session.log_success_with_notes("observation_graph", notes);
    Ok(())
}

/// Optimize the pose graph and extract `T_CO` for every localized image.
pub fn step_optimize(
    session: &mut PoseGraphSession<MarkerGraphProblem>,
    opts: Option<OptimizeOptions>,
) -> Result<()> {
    session.validate()?;
    let input = session.require_input()?;
    let state = &session.state;
    let (Some(frame), Some(report), Some(observations)) = (
        state.reference_frame.as_ref(),
        state.frame_report.as_ref(),
        state.observation_graph.as_ref(),
    ) else {
        return Err(anyhow!("observation graph required before optimization"));
    };

    let solver = opts.unwrap_or_default().apply(&session.config.solver);
    let output = optimize_observations(
        frame,
        report,
        observations,
        &input.images,
        &session.config,
        &solver,
    )?;

    let solve = *output.optimized.report();
    let notes = format!(
        "{:?}, cost {:.6e} -> {:.6e}, {} poses extracted",
        solve.status,
        solve.initial_cost,
        solve.final_cost,
        output.camera_from_object.len()
    );
    session.set_output(output);
    session.log_success_with_notes("optimize", notes);
    Ok(())
}

/// Run all steps, optionally replacing the config first.
pub fn run_pipeline(
    session: &mut PoseGraphSession<MarkerGraphProblem>,
    config: Option<MarkerGraphConfig>,
) -> Result<()> {
    if let Some(config) = config {
        session.set_config(config)?;
    }
    step_reference_frame(session)?;
    step_observation_graph(session)?;
    step_optimize(session, None)
}

/// Run the whole pipeline against a live detector.
///
/// The observer is wrapped in a [`CachedObserver`] so each image is
/// detected once although both graph passes visit it.
pub fn run_with_observer<O: RelativePoseObserver>(
    images: &[ImageId],
    observer: O,
    context: &ObserverContext,
    object_poses: &ObjectPoseTable,
    config: &MarkerGraphConfig,
) -> Result<MarkerGraphOutput> {
    MarkerGraphProblem::validate_config(config)?;
    let observer = CachedObserver::new(observer);

    let (frame, frame_report) = config.frame_builder().build(images, &observer, context)?;
    let observations =
        config
            .observation_builder()
            .build(images, &observer, context, &frame, object_poses)?;
    info!("detector queried for {} images", observer.cached_images());

    optimize_observations(
        &frame,
        &frame_report,
        &observations,
        images,
        config,
        &config.solver,
    )
}
