//! Mutable session container for step-wise pose-graph runs.

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};

use super::problem_type::{InvalidationPolicy, ProblemType};
use super::types::{ExportRecord, LogEntry, SessionMetadata};

/// Configuration, input, intermediate state and output of one problem.
///
/// Step functions take `&mut PoseGraphSession<P>` and advance it. The session
/// keeps a single output, any number of exports, and a log of the steps
/// that ran. What a change of input or config discards is decided by
/// [`ProblemType::on_input_change`] and [`ProblemType::on_config_change`];
/// the marker-graph problem clears computed results on both.
///
/// ```no_run
/// use marker_graph_pipeline::marker_graph::{run_pipeline, MarkerGraphProblem};
/// use marker_graph_pipeline::session::PoseGraphSession;
/// # fn main() -> anyhow::Result<()> {
/// # let input = unimplemented!();
/// let mut session = PoseGraphSession::<MarkerGraphProblem>::with_input(input)?;
/// run_pipeline(&mut session, None)?;
/// let export = session.export()?;
/// println!("{}", serde_json::to_string_pretty(&export)?);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "P: ProblemType")]
pub struct PoseGraphSession<P: ProblemType> {
    pub metadata: SessionMetadata,
    pub config: P::Config,
    input: Option<P::Input>,
    pub state: P::State,
    output: Option<P::Output>,
    pub exports: Vec<ExportRecord<P::Export>>,
    pub log: Vec<LogEntry>,
}

impl<P: ProblemType> PoseGraphSession<P> {
    pub fn new() -> Self {
        Self::from_metadata(SessionMetadata::new(P::name(), P::schema_version()))
    }

    pub fn with_description(description: impl Into<String>) -> Self {
        Self::from_metadata(SessionMetadata::with_description(
            P::name(),
            P::schema_version(),
            description,
        ))
    }

    fn from_metadata(metadata: SessionMetadata) -> Self {
        Self {
            metadata,
            config: P::Config::default(),
            input: None,
            state: P::State::default(),
            output: None,
            exports: Vec::new(),
            log: Vec::new(),
        }
    }

    pub fn with_input(input: P::Input) -> Result<Self> {
        let mut session = Self::new();
        session.set_input(input)?;
        Ok(session)
    }

    fn invalidate(&mut self, policy: InvalidationPolicy) {
        if policy.clear_state {
            self.state = P::State::default();
        }
        if policy.clear_output {
            self.output = None;
        }
        if policy.clear_exports {
            self.exports.clear();
        }
    }

    // ── input ──────────────────────────────────────────────────────────────

    pub fn set_input(&mut self, input: P::Input) -> Result<()> {
        P::validate_input(&input)?;
        self.invalidate(P::on_input_change());
        self.input = Some(input);
        self.metadata.touch();
        Ok(())
    }

    pub fn input(&self) -> Option<&P::Input> {
        self.input.as_ref()
    }

    pub fn require_input(&self) -> Result<&P::Input> {
        self.input.as_ref().ok_or_else(|| anyhow!("input not set"))
    }

    pub fn has_input(&self) -> bool {
        self.input.is_some()
    }

    pub fn clear_input(&mut self) {
        self.invalidate(P::on_input_change());
        self.input = None;
        self.metadata.touch();
    }

    // ── config ─────────────────────────────────────────────────────────────

    pub fn set_config(&mut self, config: P::Config) -> Result<()> {
        P::validate_config(&config)?;
        self.invalidate(P::on_config_change());
        self.config = config;
        self.metadata.touch();
        Ok(())
    }

    /// Edit a copy of the config and apply it through [`Self::set_config`].
    pub fn update_config<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut P::Config),
    {
        let mut config = self.config.clone();
        f(&mut config);
        self.set_config(config)
    }

    // ── output ─────────────────────────────────────────────────────────────

    pub fn output(&self) -> Option<&P::Output> {
        self.output.as_ref()
    }

    pub fn require_output(&self) -> Result<&P::Output> {
        self.output
            .as_ref()
            .ok_or_else(|| anyhow!("output not computed"))
    }

    pub fn set_output(&mut self, output: P::Output) {
        self.output = Some(output);
        self.metadata.touch();
    }

    pub fn has_output(&self) -> bool {
        self.output.is_some()
    }

    pub fn clear_output(&mut self) {
        self.output = None;
        self.metadata.touch();
    }

    // ── export ─────────────────────────────────────────────────────────────

    /// Convert the output and append it to [`Self::exports`].
    pub fn export(&mut self) -> Result<P::Export> {
        let export = self.export_peek()?;
        self.exports.push(ExportRecord::new(export.clone()));
        self.metadata.touch();
        Ok(export)
    }

    pub fn export_with_notes(&mut self, notes: impl Into<String>) -> Result<P::Export> {
        let export = self.export_peek()?;
        self.exports
            .push(ExportRecord::with_notes(export.clone(), notes));
        self.metadata.touch();
        Ok(export)
    }

    /// Convert the output without recording an export.
    pub fn export_peek(&self) -> Result<P::Export> {
        P::export(self.require_output()?, &self.config)
    }

    // ── validation / log / reset ───────────────────────────────────────────

    /// Input present, input and config valid on their own and together.
    pub fn validate(&self) -> Result<()> {
        let input = self.require_input()?;
        P::validate_input(input)?;
        P::validate_config(&self.config)?;
        P::validate_input_config(input, &self.config)
    }

    pub fn log_success(&mut self, operation: impl Into<String>) {
        self.log.push(LogEntry::success(operation));
        self.metadata.touch();
    }

    pub fn log_success_with_notes(
        &mut self,
        operation: impl Into<String>,
        notes: impl Into<String>,
    ) {
        self.log.push(LogEntry::success_with_notes(operation, notes));
        self.metadata.touch();
    }

    pub fn log_failure(&mut self, operation: impl Into<String>, error: impl Into<String>) {
        self.log.push(LogEntry::failure(operation, error));
        self.metadata.touch();
    }

    pub fn reset_state(&mut self) {
        self.state = P::State::default();
        self.metadata.touch();
    }

    /// Drop input, state, output, exports and log; keep config and metadata.
    pub fn reset(&mut self) {
        self.input = None;
        self.invalidate(InvalidationPolicy::CLEAR_ALL);
        self.log.clear();
        self.metadata.touch();
    }

    // ── checkpointing ──────────────────────────────────────────────────────

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Restore a session written by [`Self::to_json`].
    ///
    /// Rejects sessions of another problem type or a newer schema version.
    pub fn from_json(json: &str) -> Result<Self> {
        let session: Self = serde_json::from_str(json)?;
        if session.metadata.problem_type != P::name() {
            bail!(
                "session was saved for problem type {:?}, expected {:?}",
                session.metadata.problem_type,
                P::name()
            );
        }
        if session.metadata.schema_version > P::schema_version() {
            bail!(
                "session schema version {} is newer than supported version {}",
                session.metadata.schema_version,
                P::schema_version()
            );
        }
        Ok(session)
    }
}

impl<P: ProblemType> Default for PoseGraphSession<P> {
    fn default() -> Self {
        Self::new()
    }
}
