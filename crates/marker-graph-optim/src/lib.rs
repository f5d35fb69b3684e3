//! SE(3) pose-graph optimization built on tiny-solver.
//!
//! The crate is layered the same way for every problem it solves:
//!
//! - [`ir`]: a backend-independent description of parameter blocks and
//!   residual blocks,
//! - [`factors`]: residual functions, generic over the scalar type so the
//!   backend can differentiate them automatically,
//! - [`backend`]: solver adapters compiling the IR ([`TinySolverBackend`]),
//! - [`pose_graph`]: a vertex/edge container over [`NodeId`]s that builds the
//!   IR, calls the injected backend and writes the estimates back.
//!
//! # Example
//!
//! ```no_run
//! use marker_graph_core::{Iso3, Mat6, NodeId};
//! use marker_graph_optim::{PoseGraph, RobustLoss};
//!
//! let mut graph = PoseGraph::new();
//! graph.add_vertex(NodeId::marker(0), Iso3::identity(), true)?;
//! graph.add_vertex(NodeId::camera("a.png"), Iso3::translation(0.0, 0.0, 1.0), false)?;
//! graph.add_edge(
//!     &NodeId::camera("a.png"),
//!     &NodeId::marker(0),
//!     Iso3::translation(0.0, 0.0, -1.1),
//!     Mat6::identity(),
//!     RobustLoss::default_huber(),
//! )?;
//! let report = graph.optimize(100)?;
//! println!("{report:?}");
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! [`NodeId`]: marker_graph_core::NodeId

pub mod backend;
pub mod factors;
pub mod ir;
pub mod params;
pub mod pose_graph;
pub mod registry;

pub use backend::{
    BackendSolution, BackendSolveOptions, LinearSolverKind, OptimBackend, SolveStatus,
    TinySolverBackend,
};
pub use ir::{RobustLoss, CHI2_95_6DOF};
pub use pose_graph::{Edge, OptimizedGraph, PoseGraph, SolveReport, Vertex};
pub use registry::{VertexIndex, VertexRegistry};
