use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Identifier for a parameter block in the IR.
///
/// This is stable within a `ProblemIR` instance and is used by residual blocks
/// to reference their parameter dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamId(pub usize);

/// Supported manifold types for parameter blocks.
///
/// Each variant implies an expected ambient parameter dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifoldKind {
    /// SE(3) pose stored as `[qx, qy, qz, qw, tx, ty, tz]`.
    SE3,
}

impl ManifoldKind {
    /// Returns `true` if the given ambient dimension matches the manifold storage.
    pub fn compatible_dim(self, dim: usize) -> bool {
        match self {
            ManifoldKind::SE3 => dim == 7,
        }
    }
}

/// Fixed parameter mask for a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedMask {
    fixed_indices: HashSet<usize>,
}

impl FixedMask {
    /// Creates a mask with no fixed indices.
    pub fn all_free() -> Self {
        Self {
            fixed_indices: HashSet::new(),
        }
    }

    /// Creates a mask with all indices fixed.
    pub fn all_fixed(dim: usize) -> Self {
        Self {
            fixed_indices: (0..dim).collect(),
        }
    }

    /// Returns `true` if all indices `[0, dim)` are fixed.
    pub fn is_all_fixed(&self, dim: usize) -> bool {
        self.fixed_indices.len() == dim
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.fixed_indices.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.fixed_indices.is_empty()
    }
}

/// Robust loss applied to a residual block.
///
/// `scale` is the threshold on the residual norm: blocks whose whitened error
/// norm exceeds it are down-weighted.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RobustLoss {
    #[default]
    None,
    Huber {
        scale: f64,
    },
    Cauchy {
        scale: f64,
    },
    Arctan {
        scale: f64,
    },
}

/// χ² 95 % quantile for 6 degrees of freedom.
pub const CHI2_95_6DOF: f64 = 5.991;

impl RobustLoss {
    /// Huber kernel with threshold `√5.991`, the default for SE(3) edges.
    pub fn default_huber() -> Self {
        RobustLoss::Huber {
            scale: CHI2_95_6DOF.sqrt(),
        }
    }
}

/// Backend-agnostic factor kinds.
///
/// Each factor kind implies its parameter layout and residual dimension.
#[derive(Debug, Clone, PartialEq)]
pub enum FactorKind {
    /// Relative pose between two SE(3) vertices.
    ///
    /// Parameters: `[world_from_a, world_from_b]`.
    /// Residual: `sqrt_info · [t_err; 2·q_err.vec]` of
    /// `E = Z⁻¹ · (T_wa⁻¹ · T_wb)`, quaternion sign canonicalized to `w ≥ 0`.
    /// `measurement` uses the SE(3) storage layout, `sqrt_info` is row-major.
    RelativePoseSe3 {
        measurement: [f64; 7],
        sqrt_info: [[f64; 6]; 6],
    },
}

impl FactorKind {
    /// Residual dimension implied by the factor.
    pub fn residual_dim(&self) -> usize {
        match self {
            FactorKind::RelativePoseSe3 { .. } => 6,
        }
    }
}

/// Parameter block definition in the IR.
#[derive(Debug, Clone)]
pub struct ParamBlock {
    pub id: ParamId,
    pub name: String,
    pub dim: usize,
    pub manifold: ManifoldKind,
    pub fixed: FixedMask,
}

/// Residual block definition in the IR.
///
/// The order of `params` must match the factor's expected parameter order.
#[derive(Debug, Clone)]
pub struct ResidualBlock {
    pub params: Vec<ParamId>,
    pub loss: RobustLoss,
    pub factor: FactorKind,
    pub residual_dim: usize,
}

/// Backend-agnostic optimization problem representation.
///
/// Backends compile this IR into solver-specific problems.
#[derive(Debug, Default, Clone)]
pub struct ProblemIR {
    pub params: Vec<ParamBlock>,
    pub residuals: Vec<ResidualBlock>,
}

impl ProblemIR {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a parameter block and returns its `ParamId`.
    pub fn add_param_block(
        &mut self,
        name: impl Into<String>,
        dim: usize,
        manifold: ManifoldKind,
        fixed: FixedMask,
    ) -> ParamId {
        let id = ParamId(self.params.len());
        self.params.push(ParamBlock {
            id,
            name: name.into(),
            dim,
            manifold,
            fixed,
        });
        id
    }

    pub fn add_residual_block(&mut self, residual: ResidualBlock) {
        self.residuals.push(residual);
    }

    /// Validates internal consistency and factor expectations.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for (idx, param) in self.params.iter().enumerate() {
            ensure!(
                param.id.0 == idx,
                "param id mismatch: expected {}, got {:?}",
                idx,
                param.id
            );
            ensure!(
                names.insert(param.name.as_str()),
                "duplicate param name {}",
                param.name
            );
            ensure!(
                param.manifold.compatible_dim(param.dim),
                "param {} manifold {:?} incompatible with dim {}",
                param.name,
                param.manifold,
                param.dim
            );
            for fixed_idx in param.fixed.iter() {
                ensure!(
                    fixed_idx < param.dim,
                    "param {} fixed index {} out of range",
                    param.name,
                    fixed_idx
                );
            }
        }

        for (r_idx, residual) in self.residuals.iter().enumerate() {
            ensure!(
                residual.residual_dim == residual.factor.residual_dim(),
                "residual {} dim {} does not match factor expectation {}",
                r_idx,
                residual.residual_dim,
                residual.factor.residual_dim()
            );
            for param in &residual.params {
                ensure!(
                    param.0 < self.params.len(),
                    "residual {} references missing param {:?}",
                    r_idx,
                    param
                );
            }

            match &residual.factor {
                FactorKind::RelativePoseSe3 { sqrt_info, .. } => {
                    ensure!(
                        residual.params.len() == 2,
                        "relative pose factor requires 2 params [a, b]"
                    );
                    ensure!(
                        residual.params[0] != residual.params[1],
                        "relative pose factor {} connects a vertex to itself",
                        r_idx
                    );
                    for id in &residual.params {
                        let pose = &self.params[id.0];
                        ensure!(
                            pose.dim == 7 && pose.manifold == ManifoldKind::SE3,
                            "relative pose factor expects 7D SE3 poses, got dim={} manifold={:?}",
                            pose.dim,
                            pose.manifold
                        );
                    }
                    ensure!(
                        sqrt_info.iter().flatten().all(|v| v.is_finite()),
                        "relative pose factor {} has non-finite information",
                        r_idx
                    );
                }
            }
        }

        Ok(())
    }
}
