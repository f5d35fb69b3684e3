//! Backend-independent intermediate representation of optimization problems.

mod types;

pub use types::{
    FactorKind, FixedMask, ManifoldKind, ParamBlock, ParamId, ProblemIR, ResidualBlock,
    RobustLoss, CHI2_95_6DOF,
};
