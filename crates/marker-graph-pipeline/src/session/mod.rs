//! Session framework: a mutable container advanced by step functions.

pub mod graph_session;
pub mod problem_type;
pub mod types;

pub use graph_session::PoseGraphSession;
pub use problem_type::{InvalidationPolicy, ProblemType};
pub use types::{current_timestamp, ExportRecord, LogEntry, SessionMetadata};
