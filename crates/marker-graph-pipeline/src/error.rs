//! Error kinds of the marker-graph pipeline.

use marker_graph_core::TransformError;
use std::path::PathBuf;
use thiserror::Error;

/// Failures of the reference-frame, observation-graph and extraction stages.
///
/// Unreachable markers and non-converged solves are not errors; they are
/// reported in the frame report and the solve status respectively.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("image {image} has detections but none of its markers is in the reference frame")]
    UnlocalizableImage { image: String },

    #[error("optimized graph has no model vertex; no image provided an object pose for a localized camera")]
    MissingObjectPose,

    #[error("optimized graph has no camera vertex for image {image}")]
    MissingCameraPose { image: String },

    #[error("observer reported marker {marker} more than once in image {image}")]
    DuplicateMarker { image: String, marker: u32 },

    #[error("invalid reference frame anchored at marker {origin}: {reason}")]
    InvalidReferenceFrame { origin: u32, reason: String },

    #[error("invalid transform in {context}")]
    Transform {
        context: String,
        #[source]
        source: TransformError,
    },

    #[error(transparent)]
    Solver(#[from] anyhow::Error),

    #[error("failed to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {what}")]
    Json {
        what: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(what: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Json {
            what: what.into(),
            source,
        }
    }
}

/// Read a JSON document from `path` into `T`.
pub(crate) fn read_json_file<T: serde::de::DeserializeOwned>(
    path: impl AsRef<std::path::Path>,
) -> PipelineResult<T> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
    serde_json::from_str(&text).map_err(|e| PipelineError::json(path.display().to_string(), e))
}
