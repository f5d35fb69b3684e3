//! The problem-type interface a [`PoseGraphSession`](super::PoseGraphSession)
//! is parameterized over.

use anyhow::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;

/// Which session fields to clear when input or config changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InvalidationPolicy {
    pub clear_state: bool,
    pub clear_output: bool,
    pub clear_exports: bool,
}

impl InvalidationPolicy {
    pub const KEEP_ALL: Self = Self {
        clear_state: false,
        clear_output: false,
        clear_exports: false,
    };

    /// Clear intermediate state and output, keep exports.
    pub const CLEAR_COMPUTED: Self = Self {
        clear_state: true,
        clear_output: true,
        clear_exports: false,
    };

    pub const CLEAR_ALL: Self = Self {
        clear_state: true,
        clear_output: true,
        clear_exports: true,
    };
}

/// Types and hooks of one problem solved through a session.
///
/// The behavior lives in step functions over `&mut PoseGraphSession<P>`; the
/// trait only fixes the data model, validation and export.
///
/// - `Config`: tuning knobs (origin, propagation, weights, solver options).
/// - `Input`: observations the steps consume.
/// - `State`: intermediate results kept between steps.
/// - `Output`: the single final result.
/// - `Export`: what is handed to downstream tools.
pub trait ProblemType: Sized + 'static {
    type Config: Clone + Default + Serialize + DeserializeOwned + Debug;
    type Input: Clone + Serialize + DeserializeOwned + Debug;
    type State: Clone + Default + Serialize + DeserializeOwned + Debug;
    type Output: Clone + Serialize + DeserializeOwned + Debug;
    type Export: Clone + Serialize + DeserializeOwned + Debug;

    /// Stable snake_case identifier written into session files.
    fn name() -> &'static str;

    /// Bump when a serialized associated type changes incompatibly. Sessions
    /// with a newer version are rejected on load.
    fn schema_version() -> u32 {
        1
    }

    fn validate_input(_input: &Self::Input) -> Result<()> {
        Ok(())
    }

    fn validate_config(_config: &Self::Config) -> Result<()> {
        Ok(())
    }

    fn validate_input_config(_input: &Self::Input, _config: &Self::Config) -> Result<()> {
        Ok(())
    }

    fn on_input_change() -> InvalidationPolicy {
        InvalidationPolicy::CLEAR_COMPUTED
    }

    fn on_config_change() -> InvalidationPolicy {
        InvalidationPolicy::KEEP_ALL
    }

    fn export(output: &Self::Output, config: &Self::Config) -> Result<Self::Export>;
}
