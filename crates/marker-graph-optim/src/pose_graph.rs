//! SE(3) pose graph with an injected solver backend.
//!
//! Vertices are world poses keyed by [`NodeId`]; edges are measured relative
//! transforms `T_ab` with a 6×6 information matrix and an optional robust
//! kernel. Exactly one vertex is held fixed to remove the gauge freedom.
//!
//! Lifecycle: vertices and edges are added while the graph is being built,
//! then [`PoseGraph::optimize`] refines every free estimate. Re-optimizing is
//! allowed; adding vertices or edges after a solve is rejected.

use crate::backend::{BackendSolveOptions, OptimBackend, SolveStatus, TinySolverBackend};
use crate::factors::{mat6_to_rows, sqrt_information};
use crate::ir::{FactorKind, FixedMask, ManifoldKind, ProblemIR, ResidualBlock, RobustLoss};
use crate::params::pose_se3::{iso3_to_se3_array, iso3_to_se3_dvec, se3_dvec_to_iso3, SE3_DIM};
use crate::registry::{VertexIndex, VertexRegistry};
use anyhow::{anyhow, bail, ensure, Context, Result};
use log::{debug, info, warn};
use marker_graph_core::{Iso3, Mat6, NodeId, PoseError, PoseMap, Real};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};

#[derive(Debug, Clone)]
pub struct Vertex {
    pub estimate: Iso3,
    pub fixed: bool,
}

#[derive(Debug, Clone)]
pub struct Edge {
    pub from: VertexIndex,
    pub to: VertexIndex,
    /// Measured `T_from_to`.
    pub measured: Iso3,
    pub information: Mat6,
    pub loss: RobustLoss,
    sqrt_info: Mat6,
}

/// Costs and termination status of one solve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolveReport {
    pub initial_cost: Real,
    pub final_cost: Real,
    pub status: SolveStatus,
}

impl SolveReport {
    pub fn converged(&self) -> bool {
        self.status == SolveStatus::Converged
    }
}

/// Read-only snapshot of a solved graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizedGraph {
    poses: PoseMap,
    report: SolveReport,
}

impl OptimizedGraph {
    pub fn new(poses: PoseMap, report: SolveReport) -> Self {
        Self { poses, report }
    }

    pub fn pose(&self, id: &NodeId) -> Option<&Iso3> {
        self.poses.get(id)
    }

    pub fn poses(&self) -> &PoseMap {
        &self.poses
    }

    pub fn report(&self) -> &SolveReport {
        &self.report
    }

    /// Per-node change between `initial` and the optimized estimates.
    ///
    /// Nodes missing from either map are skipped.
    pub fn displacements(&self, initial: &PoseMap) -> BTreeMap<NodeId, PoseError> {
        self.poses
            .iter()
            .filter_map(|(id, optimized)| {
                let before = initial.get(id)?;
                Some((id.clone(), PoseError::between(before, optimized)))
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct PoseGraph<B: OptimBackend = TinySolverBackend> {
    backend: B,
    registry: VertexRegistry,
    vertices: Vec<Vertex>,
    edges: Vec<Edge>,
    last_report: Option<SolveReport>,
}

impl PoseGraph<TinySolverBackend> {
    pub fn new() -> Self {
        Self::with_backend(TinySolverBackend)
    }
}

impl Default for PoseGraph<TinySolverBackend> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: OptimBackend> PoseGraph<B> {
    pub fn with_backend(backend: B) -> Self {
        Self {
            backend,
            registry: VertexRegistry::new(),
            vertices: Vec::new(),
            edges: Vec::new(),
            last_report: None,
        }
    }

    fn ensure_building(&self) -> Result<()> {
        ensure!(
            self.last_report.is_none(),
            "pose graph was already optimized; it cannot be extended"
        );
        Ok(())
    }

    /// Add a vertex with an initial world pose.
    pub fn add_vertex(&mut self, id: NodeId, initial: Iso3, fixed: bool) -> Result<VertexIndex> {
        self.ensure_building()?;
        let idx = self.registry.insert(id)?;
        self.vertices.push(Vertex {
            estimate: initial,
            fixed,
        });
        Ok(idx)
    }

    /// Add a relative-pose edge measuring `T_from_to`.
    ///
    /// `information` must be symmetric positive definite.
    pub fn add_edge(
        &mut self,
        from: &NodeId,
        to: &NodeId,
        measured: Iso3,
        information: Mat6,
        loss: RobustLoss,
    ) -> Result<()> {
        self.ensure_building()?;
        let from_idx = self
            .registry
            .index_of(from)
            .ok_or_else(|| anyhow!("edge references unknown vertex {from}"))?;
        let to_idx = self
            .registry
            .index_of(to)
            .ok_or_else(|| anyhow!("edge references unknown vertex {to}"))?;
        ensure!(from_idx != to_idx, "edge connects vertex {from} to itself");
        let sqrt_info =
            sqrt_information(&information).with_context(|| format!("edge {from} -> {to}"))?;

        self.edges.push(Edge {
            from: from_idx,
            to: to_idx,
            measured,
            information,
            loss,
            sqrt_info,
        });
        Ok(())
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.registry.contains(id)
    }

    pub fn is_optimized(&self) -> bool {
        self.last_report.is_some()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn registry(&self) -> &VertexRegistry {
        &self.registry
    }

    /// Edges incident to `id` as `(other endpoint, edge)` pairs.
    pub fn edges_of<'a>(&'a self, id: &NodeId) -> impl Iterator<Item = (&'a NodeId, &'a Edge)> + 'a {
        let idx = self.registry.index_of(id);
        self.edges.iter().filter_map(move |edge| {
            let idx = idx?;
            let other = if edge.from == idx {
                edge.to
            } else if edge.to == idx {
                edge.from
            } else {
                return None;
            };
            Some((self.registry.id_of(other)?, edge))
        })
    }

    /// Current estimate (initial estimate before any solve).
    pub fn get_pose(&self, id: &NodeId) -> Option<Iso3> {
        let idx = self.registry.index_of(id)?;
        self.vertices.get(idx.0).map(|v| v.estimate)
    }

    /// All current estimates keyed by id.
    pub fn poses(&self) -> PoseMap {
        self.registry
            .iter()
            .map(|(idx, id)| (id.clone(), self.vertices[idx.0].estimate))
            .collect()
    }

    /// Snapshot of the graph after the most recent solve.
    pub fn optimized_graph(&self) -> Option<OptimizedGraph> {
        self.last_report
            .map(|report| OptimizedGraph::new(self.poses(), report))
    }

    fn param_name(id: &NodeId) -> String {
        format!("pose/{id}")
    }

    fn fixed_vertex(&self) -> Result<VertexIndex> {
        let fixed: Vec<VertexIndex> = self
            .vertices
            .iter()
            .enumerate()
            .filter(|(_, v)| v.fixed)
            .map(|(i, _)| VertexIndex(i))
            .collect();
        ensure!(
            fixed.len() == 1,
            "pose graph needs exactly one fixed vertex, found {}",
            fixed.len()
        );
        Ok(fixed[0])
    }

    /// Every vertex that has edges must be connected to the fixed vertex.
    fn check_anchored(&self, anchor: VertexIndex) -> Result<()> {
        let mut adjacency = vec![Vec::new(); self.vertices.len()];
        for edge in &self.edges {
            adjacency[edge.from.0].push(edge.to.0);
            adjacency[edge.to.0].push(edge.from.0);
        }
        let mut seen = vec![false; self.vertices.len()];
        let mut queue = VecDeque::from([anchor.0]);
        seen[anchor.0] = true;
        while let Some(v) = queue.pop_front() {
            for &n in &adjacency[v] {
                if !seen[n] {
                    seen[n] = true;
                    queue.push_back(n);
                }
            }
        }
        for (idx, id) in self.registry.iter() {
            if !adjacency[idx.0].is_empty() && !seen[idx.0] {
                bail!("vertex {id} is not connected to the fixed vertex");
            }
        }
        Ok(())
    }

    /// Backend-independent problem and initial values for the current graph.
    ///
    /// Vertices without edges are left out and keep their estimates.
    pub fn build_ir(&self) -> Result<(ProblemIR, HashMap<String, DVector<f64>>)> {
        let anchor = self.fixed_vertex()?;
        self.check_anchored(anchor)?;

        let mut used = vec![false; self.vertices.len()];
        for edge in &self.edges {
            used[edge.from.0] = true;
            used[edge.to.0] = true;
        }

        let mut ir = ProblemIR::new();
        let mut initial = HashMap::new();
        let mut param_ids = HashMap::new();
        for (idx, id) in self.registry.iter() {
            if !used[idx.0] {
                debug!("vertex {id} has no edges; leaving it out of the solve");
                continue;
            }
            let vertex = &self.vertices[idx.0];
            let name = Self::param_name(id);
            let fixed = if vertex.fixed {
                FixedMask::all_fixed(SE3_DIM)
            } else {
                FixedMask::all_free()
            };
            let pid = ir.add_param_block(name.clone(), SE3_DIM, ManifoldKind::SE3, fixed);
            param_ids.insert(idx, pid);
            initial.insert(name, iso3_to_se3_dvec(&vertex.estimate));
        }

        for edge in &self.edges {
            ir.add_residual_block(ResidualBlock {
                params: vec![param_ids[&edge.from], param_ids[&edge.to]],
                loss: edge.loss,
                factor: FactorKind::RelativePoseSe3 {
                    measurement: iso3_to_se3_array(&edge.measured),
                    sqrt_info: mat6_to_rows(&edge.sqrt_info),
                },
                residual_dim: 6,
            });
        }
        Ok((ir, initial))
    }

    /// Optimize with default solver options and the given iteration cap.
    pub fn optimize(&mut self, max_iterations: usize) -> Result<SolveReport> {
        let opts = BackendSolveOptions {
            max_iters: max_iterations,
            ..BackendSolveOptions::default()
        };
        self.optimize_with(&opts)
    }

    /// Optimize every free vertex through the backend.
    pub fn optimize_with(&mut self, opts: &BackendSolveOptions) -> Result<SolveReport> {
        let (ir, initial) = self.build_ir()?;

        let report = if ir.residuals.is_empty() {
            debug!("pose graph has no edges; nothing to optimize");
            SolveReport {
                initial_cost: 0.0,
                final_cost: 0.0,
                status: SolveStatus::Converged,
            }
        } else {
            let solution = self.backend.solve(&ir, &initial, opts)?;
            for (idx, id) in self.registry.iter() {
                let Some(values) = solution.params.get(&Self::param_name(id)) else {
                    continue;
                };
                let vertex = &mut self.vertices[idx.0];
                if vertex.fixed {
                    continue;
                }
                vertex.estimate = se3_dvec_to_iso3(values.as_view())
                    .with_context(|| format!("solver output for vertex {id}"))?;
            }
            SolveReport {
                initial_cost: solution.initial_cost,
                final_cost: solution.final_cost,
                status: solution.status,
            }
        };

        match report.status {
            SolveStatus::Converged => info!(
                "pose graph: {} vertices, {} edges, cost {:.6e} -> {:.6e}",
                self.vertices.len(),
                self.edges.len(),
                report.initial_cost,
                report.final_cost
            ),
            SolveStatus::BestEffort => warn!(
                "pose graph solve did not converge (cost {:.6e} -> {:.6e}); using best-effort estimates",
                report.initial_cost, report.final_cost
            ),
        }
        self.last_report = Some(report);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Translation3, UnitQuaternion};

    fn pose(t: [f64; 3], yaw: f64) -> Iso3 {
        Iso3::from_parts(
            Translation3::new(t[0], t[1], t[2]),
            UnitQuaternion::from_euler_angles(0.0, 0.0, yaw),
        )
    }

    #[test]
    fn duplicate_vertices_are_rejected() {
        let mut graph = PoseGraph::new();
        graph.add_vertex(NodeId::marker(0), Iso3::identity(), true).unwrap();
        assert!(graph
            .add_vertex(NodeId::marker(0), Iso3::identity(), false)
            .is_err());
        assert_eq!(graph.num_vertices(), 1);
    }

    #[test]
    fn edges_need_known_distinct_vertices() {
        let mut graph = PoseGraph::new();
        graph.add_vertex(NodeId::marker(0), Iso3::identity(), true).unwrap();
        let info = Mat6::identity();
        assert!(graph
            .add_edge(&NodeId::marker(0), &NodeId::Model, Iso3::identity(), info, RobustLoss::None)
            .is_err());
        assert!(graph
            .add_edge(&NodeId::marker(0), &NodeId::marker(0), Iso3::identity(), info, RobustLoss::None)
            .is_err());
    }

    #[test]
    fn non_positive_definite_information_is_rejected() {
        let mut graph = PoseGraph::new();
        graph.add_vertex(NodeId::marker(0), Iso3::identity(), true).unwrap();
        graph.add_vertex(NodeId::Model, Iso3::identity(), false).unwrap();
        let err = graph
            .add_edge(&NodeId::marker(0), &NodeId::Model, Iso3::identity(), Mat6::zeros(), RobustLoss::None)
            .unwrap_err();
        assert!(format!("{err:#}").contains("positive definite"));
    }

    #[test]
    fn exactly_one_fixed_vertex_is_required() {
        let mut none_fixed = PoseGraph::new();
        none_fixed.add_vertex(NodeId::marker(0), Iso3::identity(), false).unwrap();
        assert!(none_fixed.optimize(10).is_err());

        let mut two_fixed = PoseGraph::new();
        two_fixed.add_vertex(NodeId::marker(0), Iso3::identity(), true).unwrap();
        two_fixed.add_vertex(NodeId::marker(1), Iso3::identity(), true).unwrap();
        let err = two_fixed.optimize(10).unwrap_err();
        assert!(err.to_string().contains("exactly one fixed vertex"));
    }

    #[test]
    fn disconnected_component_is_rejected() {
        let mut graph = PoseGraph::new();
        graph.add_vertex(NodeId::marker(0), Iso3::identity(), true).unwrap();
        graph.add_vertex(NodeId::marker(1), Iso3::identity(), false).unwrap();
        graph.add_vertex(NodeId::marker(2), Iso3::identity(), false).unwrap();
        graph
            .add_edge(&NodeId::marker(1), &NodeId::marker(2), pose([1.0, 0.0, 0.0], 0.0), Mat6::identity(), RobustLoss::None)
            .unwrap();
        let err = graph.optimize(10).unwrap_err();
        assert!(err.to_string().contains("not connected"));
    }

    #[test]
    fn empty_edge_set_is_trivially_converged_and_freezes_graph() {
        let mut graph = PoseGraph::new();
        graph.add_vertex(NodeId::marker(0), Iso3::identity(), true).unwrap();
        let report = graph.optimize(10).unwrap();
        assert!(report.converged());
        assert!(graph.is_optimized());
        assert!(graph
            .add_vertex(NodeId::Model, Iso3::identity(), false)
            .is_err());
    }

    #[test]
    fn get_pose_returns_initial_before_solve() {
        let mut graph = PoseGraph::new();
        let p = pose([0.1, 0.2, 0.3], 0.4);
        graph.add_vertex(NodeId::camera("a.png"), p, false).unwrap();
        assert_eq!(graph.get_pose(&NodeId::camera("a.png")), Some(p));
        assert_eq!(graph.get_pose(&NodeId::Model), None);
        assert!(graph.optimized_graph().is_none());
    }

    #[test]
    fn edges_of_lists_neighbors() {
        let mut graph = PoseGraph::new();
        graph.add_vertex(NodeId::marker(0), Iso3::identity(), true).unwrap();
        graph.add_vertex(NodeId::camera("a"), Iso3::identity(), false).unwrap();
        graph.add_vertex(NodeId::Model, Iso3::identity(), false).unwrap();
        let info = Mat6::identity();
        graph
            .add_edge(&NodeId::camera("a"), &NodeId::marker(0), Iso3::identity(), info, RobustLoss::None)
            .unwrap();
        graph
            .add_edge(&NodeId::camera("a"), &NodeId::Model, Iso3::identity(), info, RobustLoss::None)
            .unwrap();
        let neighbors: Vec<_> = graph.edges_of(&NodeId::camera("a")).map(|(id, _)| id.clone()).collect();
        assert_eq!(neighbors, vec![NodeId::marker(0), NodeId::Model]);
        assert_eq!(graph.edges_of(&NodeId::Model).count(), 1);
    }

    #[test]
    fn displacements_measure_change() {
        let mut initial = PoseMap::new();
        initial.insert(NodeId::Model, Iso3::identity());
        initial.insert(NodeId::marker(0), Iso3::identity());
        let mut optimized = PoseMap::new();
        optimized.insert(NodeId::Model, pose([0.0, 0.3, 0.4], 0.0));
        optimized.insert(NodeId::marker(0), Iso3::identity());
        let graph = OptimizedGraph::new(
            optimized,
            SolveReport {
                initial_cost: 1.0,
                final_cost: 0.5,
                status: SolveStatus::Converged,
            },
        );
        let d = graph.displacements(&initial);
        assert!((d[&NodeId::Model].translation - 0.5).abs() < 1e-12);
        assert_eq!(d[&NodeId::marker(0)].translation, 0.0);
    }
}
