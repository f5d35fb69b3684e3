//! Relative-pose observer contract and the observers shipped with the crate.
//!
//! Marker detection itself is an external service: an observer turns one
//! image into zero or more `(marker id, T_CM)` pairs. [`DetectionTable`]
//! replays pre-computed detections from JSON, [`CachedObserver`] memoizes any
//! observer so the reference-frame and observation-graph passes query the
//! detector once per image.

use crate::error::{read_json_file, PipelineError, PipelineResult};
use crate::images::ImageId;
use marker_graph_core::transform::as_matrix;
use marker_graph_core::{iso3_from_rows, Iso3, Mat3, MatrixRows, Real};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

/// One detected marker: its index and its pose in the camera frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerPose {
    pub marker: u32,
    #[serde(rename = "T_CM", with = "as_matrix")]
    pub camera_from_marker: Iso3,
}

impl MarkerPose {
    pub fn new(marker: u32, camera_from_marker: Iso3) -> Self {
        Self {
            marker,
            camera_from_marker,
        }
    }

    /// Build from a row-major 4×4 matrix, validating rigidity.
    pub fn from_rows(marker: u32, rows: &MatrixRows) -> PipelineResult<Self> {
        let camera_from_marker = iso3_from_rows(rows).map_err(|source| PipelineError::Transform {
            context: format!("T_CM of marker {marker}"),
            source,
        })?;
        Ok(Self::new(marker, camera_from_marker))
    }
}

/// Marker dictionary and ChArUco board layout handed to the detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerDictionarySpec {
    /// Predefined dictionary name.
    pub dictionary: String,
    pub squares_x: u32,
    pub squares_y: u32,
    /// Checker square side in meters.
    pub square_length: Real,
    /// Marker side inside a checker square, in meters.
    pub marker_length: Real,
    /// Id of the first board marker in the dictionary.
    pub first_marker_id: u32,
}

impl Default for MarkerDictionarySpec {
    fn default() -> Self {
        Self {
            dictionary: "DICT_APRILTAG_16H5".to_string(),
            squares_x: 4,
            squares_y: 3,
            square_length: 49.9e-3,
            marker_length: 32.44e-3,
            first_marker_id: 6,
        }
    }
}

/// Everything an observer needs besides the image itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverContext {
    /// 3×3 camera matrix, row-major in JSON.
    #[serde(with = "intrinsics_rows")]
    pub intrinsics: Mat3,
    pub dictionary: MarkerDictionarySpec,
    /// Physical marker side length in meters.
    pub marker_size: Real,
}

impl Default for ObserverContext {
    fn default() -> Self {
        Self {
            intrinsics: Mat3::new(1166.3, 0.0, 509.0, 0.0, 1166.0, 546.0, 0.0, 0.0, 1.0),
            dictionary: MarkerDictionarySpec::default(),
            marker_size: 66.0e-3,
        }
    }
}

mod intrinsics_rows {
    use marker_graph_core::{Mat3, Real};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(k: &Mat3, serializer: S) -> Result<S::Ok, S::Error> {
        let rows: [[Real; 3]; 3] = std::array::from_fn(|r| std::array::from_fn(|c| k[(r, c)]));
        rows.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Mat3, D::Error> {
        let rows = <[[Real; 3]; 3]>::deserialize(deserializer)?;
        if rows.iter().flatten().any(|v| !v.is_finite()) {
            return Err(serde::de::Error::custom("intrinsics contain non-finite entries"));
        }
        Ok(Mat3::from_fn(|r, c| rows[r][c]))
    }
}

/// Source of camera→marker relative poses for an image.
///
/// An empty result means nothing was detected and is not an error. Each
/// marker id may appear at most once per image.
pub trait RelativePoseObserver {
    fn observe(&self, image: &str, context: &ObserverContext) -> PipelineResult<Vec<MarkerPose>>;
}

impl<O: RelativePoseObserver + ?Sized> RelativePoseObserver for &O {
    fn observe(&self, image: &str, context: &ObserverContext) -> PipelineResult<Vec<MarkerPose>> {
        (**self).observe(image, context)
    }
}

/// Observe `image` and enforce the one-entry-per-marker contract.
pub(crate) fn observe_checked<O: RelativePoseObserver + ?Sized>(
    observer: &O,
    image: &str,
    context: &ObserverContext,
) -> PipelineResult<Vec<MarkerPose>> {
    let detections = observer.observe(image, context)?;
    let mut seen = BTreeSet::new();
    for det in &detections {
        if !seen.insert(det.marker) {
            return Err(PipelineError::DuplicateMarker {
                image: image.to_string(),
                marker: det.marker,
            });
        }
    }
    Ok(detections)
}

/// Pre-computed detections keyed by image file name.
///
/// JSON form: `{"<image>": [{"marker": 0, "T_CM": [[..4..], ..]}, ..], ..}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DetectionTable {
    detections: BTreeMap<ImageId, Vec<MarkerPose>>,
}

impl DetectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(json: &str) -> PipelineResult<Self> {
        serde_json::from_str(json).map_err(|e| PipelineError::json("detection table", e))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> PipelineResult<Self> {
        read_json_file(path)
    }

    /// Set the detections of `image`, replacing earlier ones.
    pub fn insert(&mut self, image: impl Into<ImageId>, detections: Vec<MarkerPose>) {
        self.detections.insert(image.into(), detections);
    }

    pub fn get(&self, image: &str) -> Option<&[MarkerPose]> {
        self.detections.get(image).map(Vec::as_slice)
    }

    /// Image names present in the table, sorted.
    pub fn images(&self) -> impl Iterator<Item = &ImageId> {
        self.detections.keys()
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}

impl RelativePoseObserver for DetectionTable {
    fn observe(&self, image: &str, _context: &ObserverContext) -> PipelineResult<Vec<MarkerPose>> {
        Ok(self.get(image).map(<[_]>::to_vec).unwrap_or_default())
    }
}

/// Memoizing wrapper: the inner observer runs at most once per image.
///
/// Only successful observations are cached. Single-threaded by contract.
#[derive(Debug)]
pub struct CachedObserver<O> {
    inner: O,
    cache: RefCell<HashMap<ImageId, Vec<MarkerPose>>>,
}

impl<O: RelativePoseObserver> CachedObserver<O> {
    pub fn new(inner: O) -> Self {
        Self {
            inner,
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// Number of images observed so far.
    pub fn cached_images(&self) -> usize {
        self.cache.borrow().len()
    }

    pub fn into_inner(self) -> O {
        self.inner
    }
}

impl<O: RelativePoseObserver> RelativePoseObserver for CachedObserver<O> {
    fn observe(&self, image: &str, context: &ObserverContext) -> PipelineResult<Vec<MarkerPose>> {
        if let Some(hit) = self.cache.borrow().get(image) {
            return Ok(hit.clone());
        }
        let detections = self.inner.observe(image, context)?;
        self.cache
            .borrow_mut()
            .insert(image.to_string(), detections.clone());
        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct CountingObserver {
        calls: Cell<usize>,
    }

    impl RelativePoseObserver for CountingObserver {
        fn observe(&self, image: &str, _: &ObserverContext) -> PipelineResult<Vec<MarkerPose>> {
            self.calls.set(self.calls.get() + 1);
            let marker = image.len() as u32;
            Ok(vec![MarkerPose::new(marker, Iso3::translation(0.0, 0.0, 1.0))])
        }
    }

    #[test]
    fn detection_table_parses_wire_format() {
        let json = r#"{
            "a.png": [{"marker": 2, "T_CM": [[1,0,0,0.1],[0,1,0,0.2],[0,0,1,1.5],[0,0,0,1]]}],
            "b.png": []
        }"#;
        let table = DetectionTable::from_json_str(json).unwrap();
        assert_eq!(table.len(), 2);
        let dets = table.observe("a.png", &ObserverContext::default()).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].marker, 2);
        assert_eq!(dets[0].camera_from_marker.translation.vector.z, 1.5);
        assert!(table.observe("b.png", &ObserverContext::default()).unwrap().is_empty());
    }

    #[test]
    fn detection_table_loads_from_a_string_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("detections.json");
        std::fs::write(
            &path,
            r#"{"a.png": [{"marker": 0, "T_CM": [[1,0,0,0],[0,1,0,0],[0,0,1,1],[0,0,0,1]]}]}"#,
        )
        .unwrap();

        let path_str = path.to_str().unwrap();
        let table = DetectionTable::from_json_file(path_str).unwrap();
        assert_eq!(table.get("a.png").map(<[MarkerPose]>::len), Some(1));

        let missing = dir.path().join("missing.json");
        let err = DetectionTable::from_json_file(missing.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, PipelineError::Io { ref path, .. } if *path == missing));
    }

    #[test]
    fn unknown_image_yields_no_detections() {
        let table = DetectionTable::new();
        let dets = table.observe("missing.png", &ObserverContext::default()).unwrap();
        assert!(dets.is_empty());
    }

    #[test]
    fn malformed_marker_pose_is_rejected() {
        let json = r#"{"a.png": [{"marker": 0, "T_CM": [[2,0,0,0],[0,1,0,0],[0,0,1,0],[0,0,0,1]]}]}"#;
        let err = DetectionTable::from_json_str(json).unwrap_err();
        assert!(matches!(err, PipelineError::Json { .. }));

        let rows = [[1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0], [0.0, 0.0, 1.0, 0.0], [0.0, 0.0, 0.5, 1.0]];
        let err = MarkerPose::from_rows(3, &rows).unwrap_err();
        assert!(matches!(err, PipelineError::Transform { .. }));
    }

    #[test]
    fn duplicate_marker_violates_contract() {
        let mut table = DetectionTable::new();
        table.insert(
            "a.png",
            vec![
                MarkerPose::new(1, Iso3::identity()),
                MarkerPose::new(1, Iso3::translation(0.1, 0.0, 0.0)),
            ],
        );
        let err = observe_checked(&table, "a.png", &ObserverContext::default()).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::DuplicateMarker { ref image, marker: 1 } if image == "a.png"
        ));
    }

    #[test]
    fn cached_observer_queries_inner_once_per_image() {
        let cached = CachedObserver::new(CountingObserver { calls: Cell::new(0) });
        let ctx = ObserverContext::default();
        let first = cached.observe("a.png", &ctx).unwrap();
        let again = cached.observe("a.png", &ctx).unwrap();
        cached.observe("bb.png", &ctx).unwrap();
        assert_eq!(first, again);
        assert_eq!(cached.cached_images(), 2);
        assert_eq!(cached.into_inner().calls.get(), 2);
    }

    #[test]
    fn context_defaults_and_row_major_intrinsics() {
        let ctx = ObserverContext::default();
        assert_eq!(ctx.intrinsics[(0, 2)], 509.0);
        assert_eq!(ctx.dictionary.first_marker_id, 6);

        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json["intrinsics"][1][2], 546.0);
        let partial: ObserverContext = serde_json::from_str(r#"{"marker_size": 0.05}"#).unwrap();
        assert_eq!(partial.marker_size, 0.05);
        assert_eq!(partial.dictionary, MarkerDictionarySpec::default());
    }
}
