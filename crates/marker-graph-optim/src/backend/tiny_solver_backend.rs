use crate::backend::{
    BackendSolution, BackendSolveOptions, LinearSolverKind, OptimBackend, SolveStatus,
};
use crate::factors::relative_pose::relative_pose_residual_generic;
use crate::ir::{FactorKind, ManifoldKind, ProblemIR, ResidualBlock, RobustLoss};
use crate::params::pose_se3::se3_dvec_to_iso3;
use anyhow::{anyhow, bail, ensure, Result};
use log::{debug, warn};
use marker_graph_core::PoseError;
use nalgebra::DVector;
use std::collections::HashMap;
use std::sync::Arc;
use tiny_solver::factors::Factor;
use tiny_solver::loss_functions::{ArctanLoss, CauchyLoss, HuberLoss, Loss};
use tiny_solver::manifold::se3::SE3Manifold;
use tiny_solver::optimizer::{Optimizer, OptimizerOptions};
use tiny_solver::problem::Problem;
use tiny_solver::{linear::sparse::LinearSolverType, LevenbergMarquardtOptimizer};

/// Iterations per solver round; every round restarts the damping.
const ROUND_ITERS: usize = 10;
/// Iterations of the step taken from a finished solve to test stationarity.
const SETTLE_ITERS: usize = 3;

/// tiny-solver Levenberg-Marquardt backend adapter.
///
/// Fully fixed pose blocks are folded into their factors as constants, so the
/// solver only sees free blocks and the gauge stays out of the normal
/// equations. The solve runs in rounds of at most `ROUND_ITERS` iterations
/// until a round stops lowering the cost or `max_iters` is spent; a rejected
/// damped step therefore only ends its round. A solution is reported as
/// [`SolveStatus::Converged`] when it is below `min_error` or when a further
/// damped step from it moves no pose by more than `step_tolerance`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TinySolverBackend;

/// Free blocks are solver variables; fixed blocks stay in the IR's values.
struct Compiled {
    problem: Problem,
    free: HashMap<String, DVector<f64>>,
    fixed: HashMap<String, DVector<f64>>,
}

impl TinySolverBackend {
    fn compile(&self, ir: &ProblemIR, initial: &HashMap<String, DVector<f64>>) -> Result<Compiled> {
        ir.validate()?;

        let mut problem = Problem::new();
        let mut free = HashMap::new();
        let mut fixed = HashMap::new();

        for param in &ir.params {
            let init = initial.get(&param.name).ok_or_else(|| {
                anyhow!(
                    "initial values missing parameter {} (id {:?})",
                    param.name,
                    param.id
                )
            })?;
            ensure!(
                init.len() == param.dim,
                "initial dimension mismatch for {}: expected {}, got {}",
                param.name,
                param.dim,
                init.len()
            );
            ensure!(
                init.iter().all(|v| v.is_finite()),
                "initial values for {} are not finite",
                param.name
            );

            match param.manifold {
                ManifoldKind::SE3 => {
                    if param.fixed.is_empty() {
                        problem.set_variable_manifold(&param.name, Arc::new(SE3Manifold));
                        free.insert(param.name.clone(), init.clone());
                    } else if param.fixed.is_all_fixed(param.dim) {
                        fixed.insert(param.name.clone(), init.clone());
                    } else {
                        bail!(
                            "tiny-solver cannot partially fix SE3 manifold {}",
                            param.name
                        );
                    }
                }
            }
        }

        for (r_idx, residual) in ir.residuals.iter().enumerate() {
            let mut variables = Vec::new();
            let mut operands = Vec::with_capacity(residual.params.len());
            for id in &residual.params {
                let name = ir.params[id.0].name.as_str();
                match fixed.get(name) {
                    Some(value) => operands.push(PoseOperand::constant(value)?),
                    None => {
                        operands.push(PoseOperand::Variable(variables.len()));
                        variables.push(name);
                    }
                }
            }
            ensure!(
                !variables.is_empty(),
                "residual {r_idx} connects only fixed parameters"
            );
            let (factor, loss) = compile_factor(residual, operands)?;
            problem.add_residual_block(residual.residual_dim, &variables, factor, loss);
        }

        Ok(Compiled {
            problem,
            free,
            fixed,
        })
    }
}

impl OptimBackend for TinySolverBackend {
    fn solve(
        &self,
        ir: &ProblemIR,
        initial: &HashMap<String, DVector<f64>>,
        opts: &BackendSolveOptions,
    ) -> Result<BackendSolution> {
        let Compiled {
            problem,
            free,
            fixed,
        } = self.compile(ir, initial)?;
        debug!(
            "tiny-solver: {} free and {} fixed parameter blocks, {} residual blocks",
            free.len(),
            fixed.len(),
            ir.residuals.len()
        );

        let initial_cost = robust_cost(&problem, &free);
        ensure!(initial_cost.is_finite(), "initial cost is not finite");
        let optimizer = LevenbergMarquardtOptimizer::default();

        let mut params = free;
        let mut cost = initial_cost;
        let mut remaining = opts.max_iters;
        let mut solver_failed = false;
        while remaining > 0 && !below_min_error(cost, opts) {
            let iters = remaining.min(ROUND_ITERS);
            remaining -= iters;

            let Some(mut next) =
                optimizer.optimize(&problem, &params, Some(round_options(opts, iters)))
            else {
                warn!("tiny-solver returned no solution; keeping the last estimates");
                solver_failed = true;
                break;
            };
            for (name, value) in &next {
                ensure!(
                    value.iter().all(|v| v.is_finite()),
                    "tiny-solver produced non-finite estimate for {}",
                    name
                );
            }
            normalize_rotations(&mut next);
            let next_cost = robust_cost(&problem, &next);
            ensure!(
                next_cost.is_finite(),
                "tiny-solver produced a non-finite cost"
            );

            let decrease = cost - next_cost;
            if next_cost <= cost {
                params = next;
                cost = next_cost;
            }
            if decrease <= opts.min_abs_decrease.unwrap_or(0.0)
                || decrease <= opts.min_rel_decrease.unwrap_or(0.0) * (cost + decrease)
            {
                break;
            }
        }

        let status = if solver_failed {
            SolveStatus::BestEffort
        } else if below_min_error(cost, opts) {
            SolveStatus::Converged
        } else {
            let step = settle_step(&optimizer, &problem, &params, opts)?;
            let tol = opts.step_tolerance.unwrap_or(0.0);
            debug!(
                "tiny-solver: remaining step {:.3e} m / {:.3e} rad",
                step.translation, step.rotation
            );
            if step.within(tol, tol) {
                SolveStatus::Converged
            } else {
                SolveStatus::BestEffort
            }
        };
        debug!("tiny-solver: cost {initial_cost:.6e} -> {cost:.6e} ({status:?})");

        params.extend(fixed);
        Ok(BackendSolution {
            params,
            initial_cost,
            final_cost: cost,
            status,
        })
    }
}

fn below_min_error(cost: f64, opts: &BackendSolveOptions) -> bool {
    // tiny-solver thresholds compare the squared norm, twice the cost
    2.0 * cost <= opts.min_error.unwrap_or(0.0)
}

/// Largest pose change of a short damped solve started at `params`.
fn settle_step(
    optimizer: &LevenbergMarquardtOptimizer,
    problem: &Problem,
    params: &HashMap<String, DVector<f64>>,
    opts: &BackendSolveOptions,
) -> Result<PoseError> {
    let settle_options = OptimizerOptions {
        verbosity_level: 0,
        ..round_options(opts, SETTLE_ITERS)
    };
    let Some(settled) = optimizer.optimize(problem, params, Some(settle_options)) else {
        return Ok(PoseError {
            translation: f64::INFINITY,
            rotation: f64::INFINITY,
        });
    };

    let mut largest = PoseError {
        translation: 0.0,
        rotation: 0.0,
    };
    for (name, value) in params {
        let Some(moved) = settled.get(name) else {
            continue;
        };
        let change = PoseError::between(
            &se3_dvec_to_iso3(value.as_view())?,
            &se3_dvec_to_iso3(moved.as_view())?,
        );
        largest.translation = largest.translation.max(change.translation);
        largest.rotation = largest.rotation.max(change.rotation);
    }
    Ok(largest)
}

/// Renormalize the quaternion part of every `[qx, qy, qz, qw, t]` block.
fn normalize_rotations(params: &mut HashMap<String, DVector<f64>>) {
    for value in params.values_mut() {
        let norm = value.rows(0, 4).norm();
        if norm > 0.0 {
            value.rows_mut(0, 4).unscale_mut(norm);
        }
    }
}

fn robust_cost(problem: &Problem, params: &HashMap<String, DVector<f64>>) -> f64 {
    let param_blocks = problem.initialize_parameter_blocks(params);
    let residuals = problem.compute_residuals(&param_blocks, true);
    0.5 * residuals.as_ref().squared_norm_l2()
}

/// Options for one round. Decrease thresholds are disabled inside the round
/// so that a rejected step raises the damping instead of ending the solve.
fn round_options(opts: &BackendSolveOptions, max_iteration: usize) -> OptimizerOptions {
    let mut options = OptimizerOptions {
        max_iteration,
        verbosity_level: opts.verbosity,
        min_abs_error_decrease_threshold: 0.0,
        min_rel_error_decrease_threshold: 0.0,
        ..OptimizerOptions::default()
    };
    if let Some(solver) = opts.linear_solver {
        options.linear_solver_type = match solver {
            LinearSolverKind::SparseCholesky => LinearSolverType::SparseCholesky,
            LinearSolverKind::SparseQR => LinearSolverType::SparseQR,
        };
    }
    options.min_error_threshold = opts.min_error.unwrap_or(0.0);
    options
}

fn compile_loss(loss: RobustLoss) -> Result<Option<Box<dyn Loss + Send>>> {
    match loss {
        RobustLoss::None => Ok(None),
        RobustLoss::Huber { scale } => {
            ensure!(scale > 0.0, "Huber scale must be positive");
            Ok(Some(Box::new(HuberLoss::new(scale))))
        }
        RobustLoss::Cauchy { scale } => {
            ensure!(scale > 0.0, "Cauchy scale must be positive");
            Ok(Some(Box::new(CauchyLoss::new(scale))))
        }
        RobustLoss::Arctan { scale } => {
            ensure!(scale > 0.0, "Arctan scale must be positive");
            Ok(Some(Box::new(ArctanLoss::new(scale))))
        }
    }
}

type CompiledFactor = (
    Box<dyn tiny_solver::factors::FactorImpl + Send>,
    Option<Box<dyn Loss + Send>>,
);

fn compile_factor(residual: &ResidualBlock, operands: Vec<PoseOperand>) -> Result<CompiledFactor> {
    let loss = compile_loss(residual.loss)?;
    match &residual.factor {
        FactorKind::RelativePoseSe3 {
            measurement,
            sqrt_info,
        } => {
            let [a, b]: [PoseOperand; 2] = operands
                .try_into()
                .map_err(|_| anyhow!("relative pose factor requires 2 params [a, b]"))?;
            let factor = TinyRelativePoseFactor {
                a,
                b,
                measurement: *measurement,
                sqrt_info: *sqrt_info,
            };
            Ok((Box::new(factor), loss))
        }
    }
}

/// Pose argument of a factor: a solver variable by position, or a constant.
#[derive(Debug, Clone)]
enum PoseOperand {
    Variable(usize),
    Constant([f64; 7]),
}

impl PoseOperand {
    fn constant(value: &DVector<f64>) -> Result<Self> {
        let packed: [f64; 7] = value
            .as_slice()
            .try_into()
            .map_err(|_| anyhow!("fixed pose must have 7 entries, got {}", value.len()))?;
        Ok(Self::Constant(packed))
    }

    fn resolve<T: nalgebra::RealField>(&self, params: &[DVector<T>]) -> DVector<T> {
        match self {
            Self::Variable(idx) => params[*idx].clone(),
            Self::Constant(packed) => {
                DVector::from_iterator(7, packed.iter().map(|&v| T::from_f64(v).unwrap()))
            }
        }
    }
}

#[derive(Debug, Clone)]
struct TinyRelativePoseFactor {
    a: PoseOperand,
    b: PoseOperand,
    measurement: [f64; 7],
    sqrt_info: [[f64; 6]; 6],
}

impl<T: nalgebra::RealField> Factor<T> for TinyRelativePoseFactor {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        let a = self.a.resolve(params);
        let b = self.b.resolve(params);
        let r = relative_pose_residual_generic(
            a.as_view(),
            b.as_view(),
            &self.measurement,
            &self.sqrt_info,
        );
        DVector::from_row_slice(r.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factors::mat6_to_rows;
    use crate::ir::FixedMask;
    use crate::params::pose_se3::{iso3_to_se3_array, iso3_to_se3_dvec};
    use marker_graph_core::{Iso3, Mat6};
    use nalgebra::{Translation3, UnitQuaternion};

    fn chain_ir(measured: &Iso3) -> ProblemIR {
        let mut ir = ProblemIR::new();
        let a = ir.add_param_block("a", 7, ManifoldKind::SE3, FixedMask::all_fixed(7));
        let b = ir.add_param_block("b", 7, ManifoldKind::SE3, FixedMask::all_free());
        ir.add_residual_block(ResidualBlock {
            params: vec![a, b],
            loss: RobustLoss::None,
            factor: FactorKind::RelativePoseSe3 {
                measurement: iso3_to_se3_array(measured),
                sqrt_info: mat6_to_rows(&Mat6::identity()),
            },
            residual_dim: 6,
        });
        ir
    }

    #[test]
    fn single_edge_recovers_measurement() {
        let measured = Iso3::from_parts(
            Translation3::new(0.5, -0.2, 1.0),
            UnitQuaternion::from_euler_angles(0.1, 0.2, 0.3),
        );
        let ir = chain_ir(&measured);
        let mut initial = HashMap::new();
        initial.insert("a".to_string(), iso3_to_se3_dvec(&Iso3::identity()));
        initial.insert("b".to_string(), iso3_to_se3_dvec(&Iso3::translation(0.4, 0.0, 0.9)));

        let solution = TinySolverBackend
            .solve(&ir, &initial, &BackendSolveOptions::default())
            .unwrap();
        let b = se3_dvec_to_iso3(solution.params["b"].as_view()).unwrap();
        let a = se3_dvec_to_iso3(solution.params["a"].as_view()).unwrap();

        assert!(PoseError::between(&a, &Iso3::identity()).within(1e-12, 1e-12));
        assert!(
            PoseError::between(&b, &measured).within(1e-6, 1e-6),
            "b = {b:?}"
        );
        assert!(solution.final_cost < solution.initial_cost);
        assert!(solution.final_cost < 1e-10);
    }

    #[test]
    fn missing_initial_value_is_an_error() {
        let ir = chain_ir(&Iso3::identity());
        let mut initial = HashMap::new();
        initial.insert("a".to_string(), iso3_to_se3_dvec(&Iso3::identity()));
        let err = TinySolverBackend
            .solve(&ir, &initial, &BackendSolveOptions::default())
            .unwrap_err();
        assert!(err.to_string().contains("missing parameter b"));
    }

    #[test]
    fn round_options_keep_rejected_steps_inside_the_round() {
        let opts = BackendSolveOptions {
            max_iters: 7,
            linear_solver: Some(LinearSolverKind::SparseQR),
            min_rel_decrease: Some(1e-9),
            min_error: Some(1e-16),
            ..BackendSolveOptions::default()
        };
        let mapped = round_options(&opts, 5);
        assert_eq!(mapped.max_iteration, 5);
        assert!(matches!(mapped.linear_solver_type, LinearSolverType::SparseQR));
        assert_eq!(mapped.min_abs_error_decrease_threshold, 0.0);
        assert_eq!(mapped.min_rel_error_decrease_threshold, 0.0);
        assert_eq!(mapped.min_error_threshold, 1e-16);
    }

    #[test]
    fn fixed_block_is_folded_into_the_factor() {
        let ir = chain_ir(&Iso3::translation(0.1, 0.0, 0.0));
        let mut initial = HashMap::new();
        initial.insert("a".to_string(), iso3_to_se3_dvec(&Iso3::identity()));
        initial.insert("b".to_string(), iso3_to_se3_dvec(&Iso3::identity()));

        let compiled = TinySolverBackend.compile(&ir, &initial).unwrap();
        assert!(compiled.problem.fixed_variable_indexes.is_empty());
        assert!(!compiled.problem.variable_manifold.contains_key("a"));
        assert!(compiled.problem.variable_manifold.contains_key("b"));
        assert_eq!(compiled.free.len(), 1);
        assert!(compiled.fixed.contains_key("a"));
    }

    #[test]
    fn exhausted_iterations_are_best_effort() {
        let measured = Iso3::from_parts(
            Translation3::new(0.5, -0.2, 1.0),
            UnitQuaternion::from_euler_angles(0.2, -0.1, 0.3),
        );
        let ir = chain_ir(&measured);
        let mut initial = HashMap::new();
        initial.insert("a".to_string(), iso3_to_se3_dvec(&Iso3::identity()));
        initial.insert("b".to_string(), iso3_to_se3_dvec(&Iso3::identity()));

        let opts = BackendSolveOptions {
            max_iters: 1,
            ..BackendSolveOptions::default()
        };
        let solution = TinySolverBackend.solve(&ir, &initial, &opts).unwrap();
        assert_eq!(solution.status, SolveStatus::BestEffort);
        assert!(solution.final_cost.is_finite());
        assert!(solution.final_cost < solution.initial_cost);
    }

    #[test]
    fn non_positive_loss_scale_is_rejected() {
        assert!(compile_loss(RobustLoss::Huber { scale: 0.0 }).is_err());
        assert!(compile_loss(RobustLoss::None).unwrap().is_none());
    }
}
