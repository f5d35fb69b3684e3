//! Image enumeration.

use crate::error::{PipelineError, PipelineResult};
use std::path::{Path, PathBuf};

/// Image identifier: the file name without directories.
pub type ImageId = String;

const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "bmp", "tif", "tiff"];

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

/// File name of `path`, if it is valid UTF-8.
pub fn image_id(path: &Path) -> Option<ImageId> {
    path.file_name()?.to_str().map(str::to_string)
}

/// Regular files in `dir` with an image extension, sorted by file name.
pub fn list_image_paths(dir: &Path) -> PipelineResult<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| PipelineError::io(dir, e))?;
    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| PipelineError::io(dir, e))?;
        let path = entry.path();
        if path.is_file() && has_image_extension(&path) {
            paths.push(path);
        }
    }
    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(paths)
}

/// Image ids of [`list_image_paths`].
pub fn list_image_ids(dir: &Path) -> PipelineResult<Vec<ImageId>> {
    Ok(list_image_paths(dir)?
        .iter()
        .filter_map(|p| image_id(p))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_images_sorted_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.PNG", "a.jpg", "c.tiff", "notes.txt", "d.JPEG"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        std::fs::create_dir(dir.path().join("sub.png")).unwrap();

        let ids = list_image_ids(dir.path()).unwrap();
        assert_eq!(ids, vec!["a.jpg", "b.PNG", "c.tiff", "d.JPEG"]);
    }

    #[test]
    fn missing_directory_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = list_image_paths(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, PipelineError::Io { .. }));
    }
}
