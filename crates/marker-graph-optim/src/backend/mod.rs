//! Backend adapters that compile the IR into solver-specific problems.
//!
//! Backends are responsible for translating the IR into solver-native graphs,
//! applying manifolds and fixed blocks, and returning a solved parameter map.

mod tiny_solver_backend;

use anyhow::Result;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::ir::ProblemIR;

pub use tiny_solver_backend::TinySolverBackend;

/// Backend-agnostic solver options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSolveOptions {
    /// Maximum number of iterations for the optimizer.
    pub max_iters: usize,
    /// Verbosity level (backend-specific).
    pub verbosity: usize,
    /// Optional linear solver selection.
    pub linear_solver: Option<LinearSolverKind>,
    /// Absolute cost decrease over a solver round below which the solve stops.
    pub min_abs_decrease: Option<f64>,
    /// Relative cost decrease over a solver round below which the solve stops.
    pub min_rel_decrease: Option<f64>,
    /// Squared residual norm below which the solve stops.
    pub min_error: Option<f64>,
    /// Largest tangent step (m or rad) a further solve may take from a
    /// solution reported as converged.
    pub step_tolerance: Option<f64>,
}

impl Default for BackendSolveOptions {
    fn default() -> Self {
        Self {
            max_iters: 100,
            verbosity: 0,
            linear_solver: Some(LinearSolverKind::SparseCholesky),
            min_abs_decrease: Some(1e-14),
            min_rel_decrease: Some(1e-12),
            min_error: Some(1e-20),
            step_tolerance: Some(1e-8),
        }
    }
}

/// Linear solver selection (backend-agnostic).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinearSolverKind {
    /// Sparse Cholesky decomposition.
    SparseCholesky,
    /// Sparse QR decomposition.
    SparseQR,
}

/// Whether the solver reached its termination criteria.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveStatus {
    /// The cost is below `min_error`, or a further solve would move no pose
    /// by more than `step_tolerance`.
    Converged,
    /// Iteration cap hit or the solver gave up; estimates are the best
    /// available but not guaranteed to be a local minimum.
    BestEffort,
}

/// Solver output from a backend.
///
/// The `params` map uses the IR parameter block names.
#[derive(Debug, Clone)]
pub struct BackendSolution {
    /// Optimized parameter vectors keyed by block name.
    pub params: HashMap<String, DVector<f64>>,
    /// Robustified cost at the initial values.
    pub initial_cost: f64,
    /// Robustified cost at the returned values.
    pub final_cost: f64,
    pub status: SolveStatus,
}

/// Backend interface implemented by solver adapters.
pub trait OptimBackend {
    /// Solve a compiled IR with the provided initial parameters.
    fn solve(
        &self,
        ir: &ProblemIR,
        initial: &HashMap<String, DVector<f64>>,
        opts: &BackendSolveOptions,
    ) -> Result<BackendSolution>;
}
