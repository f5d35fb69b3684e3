//! Per-image object annotations `T_CO`.

use crate::error::{read_json_file, PipelineError, PipelineResult};
use crate::images::ImageId;
use marker_graph_core::transform::as_matrix_opt;
use marker_graph_core::Iso3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectPoseEntry {
    /// Object pose in the camera frame, `null` when the image has none.
    #[serde(rename = "T_CO", default, with = "as_matrix_opt")]
    pub camera_from_object: Option<Iso3>,
}

/// Object poses keyed by image file name.
///
/// JSON form: `{"<image>": {"T_CO": [[..4..], ..] | null}, ..}`. Extra keys
/// in an entry are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectPoseTable {
    entries: BTreeMap<ImageId, ObjectPoseEntry>,
}

impl ObjectPoseTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(json: &str) -> PipelineResult<Self> {
        serde_json::from_str(json).map_err(|e| PipelineError::json("object pose table", e))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> PipelineResult<Self> {
        read_json_file(path)
    }

    pub fn insert(&mut self, image: impl Into<ImageId>, camera_from_object: Option<Iso3>) {
        self.entries
            .insert(image.into(), ObjectPoseEntry { camera_from_object });
    }

    /// `T_CO` of `image`, if annotated.
    pub fn get(&self, image: &str) -> Option<Iso3> {
        self.entries.get(image)?.camera_from_object
    }

    pub fn images(&self) -> impl Iterator<Item = &ImageId> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
