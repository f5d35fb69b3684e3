//! Bookkeeping records stored alongside a session.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// `ProblemType::name()` of the session's problem.
    pub problem_type: String,
    pub schema_version: u32,
    /// Seconds since the Unix epoch.
    pub created_at: u64,
    /// Seconds since the Unix epoch.
    pub last_modified: u64,
    pub description: Option<String>,
}

impl SessionMetadata {
    pub fn new(problem_type: impl Into<String>, schema_version: u32) -> Self {
        let now = current_timestamp();
        Self {
            problem_type: problem_type.into(),
            schema_version,
            created_at: now,
            last_modified: now,
            description: None,
        }
    }

    pub fn with_description(
        problem_type: impl Into<String>,
        schema_version: u32,
        description: impl Into<String>,
    ) -> Self {
        Self {
            description: Some(description.into()),
            ..Self::new(problem_type, schema_version)
        }
    }

    pub fn touch(&mut self) {
        self.last_modified = current_timestamp();
    }
}

/// One entry of the session's operation log.
///
/// An audit trail of which steps ran and how they ended; not replayable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: u64,
    /// Step name, e.g. `"reference_frame"` or `"optimize"`.
    pub operation: String,
    pub success: bool,
    /// Summary on success, error message on failure.
    pub notes: Option<String>,
}

impl LogEntry {
    pub fn success(operation: impl Into<String>) -> Self {
        Self {
            timestamp: current_timestamp(),
            operation: operation.into(),
            success: true,
            notes: None,
        }
    }

    pub fn success_with_notes(operation: impl Into<String>, notes: impl Into<String>) -> Self {
        Self {
            notes: Some(notes.into()),
            ..Self::success(operation)
        }
    }

    pub fn failure(operation: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            timestamp: current_timestamp(),
            operation: operation.into(),
            success: false,
            notes: Some(error.into()),
        }
    }
}

/// An export produced from the session output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRecord<E> {
    pub timestamp: u64,
    pub export: E,
    pub notes: Option<String>,
}

impl<E> ExportRecord<E> {
    pub fn new(export: E) -> Self {
        Self {
            timestamp: current_timestamp(),
            export,
            notes: None,
        }
    }

    pub fn with_notes(export: E, notes: impl Into<String>) -> Self {
        Self {
            timestamp: current_timestamp(),
            export,
            notes: Some(notes.into()),
        }
    }
}

/// Seconds since the Unix epoch; 0 if the clock is before it.
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
