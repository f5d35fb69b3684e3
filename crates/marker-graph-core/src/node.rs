//! Semantic identifiers of pose-graph nodes.

use crate::Iso3;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Prefix of camera identifiers derived from image names.
pub const CAMERA_PREFIX: &str = "cam_";
/// Identifier of the tracked object.
pub const MODEL_LABEL: &str = "model";

/// Identifier of a node in the reference frame / pose graph.
///
/// The string form is `"[<idx>]"` for markers, `"cam_<image name>"` for
/// cameras and `"model"` for the tracked object. Ordering places markers
/// first (by index), then cameras (by image name), then the model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeId {
    /// Fiducial marker (or whole board) by dictionary index.
    Marker(u32),
    /// Camera of one image, keyed by the image file name.
    Camera(String),
    /// The tracked object.
    Model,
}

impl NodeId {
    pub fn marker(index: u32) -> Self {
        Self::Marker(index)
    }

    pub fn camera(image: impl Into<String>) -> Self {
        Self::Camera(image.into())
    }

    pub fn is_marker(&self) -> bool {
        matches!(self, Self::Marker(_))
    }

    pub fn marker_index(&self) -> Option<u32> {
        match self {
            Self::Marker(idx) => Some(*idx),
            _ => None,
        }
    }

    /// Image name of a camera node.
    pub fn camera_image(&self) -> Option<&str> {
        match self {
            Self::Camera(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Marker(idx) => write!(f, "[{idx}]"),
            Self::Camera(name) => write!(f, "{CAMERA_PREFIX}{name}"),
            Self::Model => f.write_str(MODEL_LABEL),
        }
    }
}

/// World poses keyed by node, iterated in [`NodeId`] order.
pub type PoseMap = BTreeMap<NodeId, Iso3>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid node identifier {0:?}: expected \"[<idx>]\", \"cam_<image>\" or \"model\"")]
pub struct NodeIdParseError(pub String);

impl FromStr for NodeId {
    type Err = NodeIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == MODEL_LABEL {
            return Ok(Self::Model);
        }
        if let Some(name) = s.strip_prefix(CAMERA_PREFIX) {
            if !name.is_empty() {
                return Ok(Self::Camera(name.to_string()));
            }
        }
        if let Some(inner) = s.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
            if let Ok(idx) = inner.parse::<u32>() {
                return Ok(Self::Marker(idx));
            }
        }
        Err(NodeIdParseError(s.to_string()))
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
