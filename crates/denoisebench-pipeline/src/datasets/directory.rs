//! Filesystem directory datasets.
//!
//! Every subdirectory of the data root that no specialized dataset
//! claims becomes a [`DirectoryDataset`]: its image files are reference
//! images, and noisy images come from a synthetic noiser.

use std::fs;
use std::path::{Path, PathBuf};

use crate::dataset::DatasetSource;
use crate::fetch::{Fetch, LocalOnly};
use crate::types::{BenchError, Triplet};

/// File extensions (lowercase) recognized as images.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "bmp", "jpeg", "jpg", "png", "webp", "pbm", "pgm", "ppm", "pnm", "tiff", "tif",
];

/// Asymmetric dataset made of the image files in one directory.
#[derive(Debug, Clone)]
pub struct DirectoryDataset {
    name: String,
    description: String,
    dir: PathBuf,
}

impl DirectoryDataset {
    /// Dataset `name` over the images directly inside `dir`.
    #[must_use]
    pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            name: name.into(),
            description: format!("Directory based dataset at {}", dir.display()),
            dir,
        }
    }

    /// Directory the images are read from.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Subdirectories of `root`, sorted by path. A missing root yields
    /// no directories.
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::Io`] if `root` exists but cannot be listed.
    pub fn discover(root: &Path) -> Result<Vec<PathBuf>, BenchError> {
        if !root.is_dir() {
            return Ok(Vec::new());
        }
        let mut dirs = Vec::new();
        for entry in fs::read_dir(root)? {
            let path = entry?.path();
            let hidden = path
                .file_name()
                .is_some_and(|n| n.to_string_lossy().starts_with('.'));
            if path.is_dir() && !hidden {
                dirs.push(path);
            }
        }
        dirs.sort();
        Ok(dirs)
    }
}

/// Returns `true` if `path` has a supported extension that the decoder
/// also maps to a format.
fn is_image(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| {
            SUPPORTED_EXTENSIONS.contains(&ext.as_str()) && image::ImageFormat::from_extension(&ext).is_some()
        })
}

impl DatasetSource for DirectoryDataset {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn triplets(&self) -> Result<Vec<Triplet>, BenchError> {
        let mut triplets = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !path.is_file() || !is_image(&path) {
                continue;
            }
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            triplets.push(Triplet::new(name, path, None));
        }
        triplets.sort_by(|a, b| a.reference.cmp(&b.reference));
        Ok(triplets)
    }

    fn fetcher(&self) -> &dyn Fetch {
        &LocalOnly
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn only_supported_files_become_triplets() {
        let dir = tempfile::tempdir().unwrap();
        for file in ["b.PNG", "a.jpg", "notes.txt", "c.tif"] {
            fs::write(dir.path().join(file), b"").unwrap();
        }
        fs::create_dir(dir.path().join("nested.png")).unwrap();

        let dataset = DirectoryDataset::new("holiday", dir.path());
        let triplets = dataset.triplets().unwrap();
        let names: Vec<&str> = triplets.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert!(triplets.iter().all(|t| t.noisy.is_none()));
    }

    #[test]
    fn every_supported_extension_has_a_decoder_format() {
        for ext in SUPPORTED_EXTENSIONS {
            assert!(image::ImageFormat::from_extension(ext).is_some(), "{ext}");
        }
    }

    #[test]
    fn unrecognized_image_extensions_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let img = image::RgbImage::from_pixel(8, 8, image::Rgb([90, 90, 90]));
        img.save(dir.path().join("a.png")).unwrap();
        img.save(dir.path().join("b.jpg")).unwrap();
        fs::rename(dir.path().join("b.jpg"), dir.path().join("b.jpe")).unwrap();
        fs::copy(dir.path().join("a.png"), dir.path().join("c.dib")).unwrap();

        let dataset = crate::dataset::Dataset::open(DirectoryDataset::new("mixed", dir.path())).unwrap();
        let names: Vec<&str> = dataset.triplets().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["a"]);
    }

    #[test]
    fn discover_lists_sorted_subdirectories() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("zoo")).unwrap();
        fs::create_dir(root.path().join("alps")).unwrap();
        fs::create_dir(root.path().join(".cache")).unwrap();
        fs::write(root.path().join("readme.md"), b"").unwrap();

        let dirs = DirectoryDataset::discover(root.path()).unwrap();
        let names: Vec<String> = dirs
            .iter()
            .map(|d| d.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["alps", "zoo"]);
    }

    #[test]
    fn discover_missing_root_is_empty() {
        let root = tempfile::tempdir().unwrap();
        let dirs = DirectoryDataset::discover(&root.path().join("absent")).unwrap();
        assert!(dirs.is_empty());
    }

    #[test]
    fn description_names_the_directory() {
        let dataset = DirectoryDataset::new("holiday", "/data/holiday");
        assert_eq!(dataset.description(), "Directory based dataset at /data/holiday");
    }
}
