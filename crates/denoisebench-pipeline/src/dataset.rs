//! The dataset abstraction: an ordered collection of image triplets.
//!
//! A [`DatasetSource`] supplies the triplets and the fetch hook; a
//! [`Dataset`] wraps it with everything the evaluation pipeline needs:
//!
//! - per-image [`Metadata`] computed once, at construction, from image
//!   headers (fetching missing files first)
//! - an optional [`CropWindow`], applied to every loaded image; a
//!   center crop to the minimum common size is installed automatically
//!   when the images are not all the same size
//! - the noise source: stored noisy images, the default synthetic noiser
//!   (chosen at construction when some triplet has no noisy image, then
//!   used for every item), or an explicitly bound noiser, which always
//!   wins once set
//!
//! Items are produced lazily, by index ([`Dataset::item`]) or in order
//! ([`Dataset::iter`], restartable).

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use image::RgbImage;

use crate::capability::Noiser;
use crate::crop::{Anchor, CropWindow};
use crate::fetch::{Fetch, ensure_local};
use crate::noise;
use crate::types::{BenchError, Dimensions, ImageItem, Triplet};

/// Supplies the triplets of a concrete dataset and how to fetch them.
pub trait DatasetSource: Send + Sync {
    /// Registry identifier.
    fn name(&self) -> &str;

    /// Short human description.
    fn description(&self) -> &str;

    /// The dataset's triplets, in iteration order.
    ///
    /// # Errors
    ///
    /// Returns an error if the triplet list cannot be assembled (e.g.
    /// an unreadable directory).
    fn triplets(&self) -> Result<Vec<Triplet>, BenchError>;

    /// Hook invoked whenever a referenced file is missing locally.
    fn fetcher(&self) -> &dyn Fetch;
}

/// Header-derived size of one dataset image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageMetadata {
    /// Triplet name.
    pub name: String,
    /// Reference image size.
    pub dimensions: Dimensions,
}

/// Per-image sizes and their extremes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    images: Vec<ImageMetadata>,
    min: Dimensions,
    max: Dimensions,
}

impl Metadata {
    /// Aggregate per-image records. Extremes are 0 for an empty list.
    #[must_use]
    pub fn new(images: Vec<ImageMetadata>) -> Self {
        let widths = || images.iter().map(|i| i.dimensions.width);
        let heights = || images.iter().map(|i| i.dimensions.height);
        let min = Dimensions::new(
            widths().min().unwrap_or(0),
            heights().min().unwrap_or(0),
        );
        let max = Dimensions::new(
            widths().max().unwrap_or(0),
            heights().max().unwrap_or(0),
        );
        Self { images, min, max }
    }

    /// Per-image records, in triplet order.
    #[must_use]
    pub fn images(&self) -> &[ImageMetadata] {
        &self.images
    }

    #[must_use]
    pub const fn min_width(&self) -> u32 {
        self.min.width
    }

    #[must_use]
    pub const fn max_width(&self) -> u32 {
        self.max.width
    }

    #[must_use]
    pub const fn min_height(&self) -> u32 {
        self.min.height
    }

    #[must_use]
    pub const fn max_height(&self) -> u32 {
        self.max.height
    }

    /// Largest size every image can be cropped to.
    #[must_use]
    pub const fn min_dimensions(&self) -> Dimensions {
        self.min
    }

    /// Returns `true` if every image has the same size.
    #[must_use]
    pub const fn is_uniform(&self) -> bool {
        self.min.width == self.max.width && self.min.height == self.max.height
    }

    /// Format the metadata as a human-readable report.
    #[must_use]
    pub fn report(&self, dataset: &str) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Dataset: {dataset}\n{}", "=".repeat(60)));
        lines.push(format!("{:<40} {:>8} {:>8}", "Image", "Width", "Height"));
        lines.push("-".repeat(60));
        for image in &self.images {
            lines.push(format!(
                "{:<40} {:>8} {:>8}",
                image.name, image.dimensions.width, image.dimensions.height,
            ));
        }
        lines.push(String::new());
        lines.push(format!(
            "Images: {}  |  width {}..{}  |  height {}..{}  |  {}",
            self.images.len(),
            self.min.width,
            self.max.width,
            self.min.height,
            self.max.height,
            if self.is_uniform() {
                "uniform"
            } else {
                "non-uniform"
            },
        ));

        lines.join("\n")
    }
}

/// An ordered image collection with geometry normalization and noise
/// substitution.
pub struct Dataset {
    source: Box<dyn DatasetSource>,
    triplets: Vec<Triplet>,
    metadata: Metadata,
    crop: Option<CropWindow>,
    bound_noiser: Option<Arc<dyn Noiser>>,
    default_noiser: Option<Arc<dyn Noiser>>,
}

impl fmt::Debug for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dataset")
            .field("name", &self.name())
            .field("len", &self.len())
            .field("crop", &self.crop)
            .field("noiser", &self.noiser_name())
            .finish_non_exhaustive()
    }
}

impl Dataset {
    /// Build a dataset from `source`.
    ///
    /// Fetches missing files, reads every image header, validates the
    /// triplets, picks the default noiser when some triplet has no noisy
    /// image, and installs a center crop to the minimum common size when
    /// image sizes differ.
    ///
    /// # Errors
    ///
    /// - [`BenchError::EmptyDataset`] if the source has no triplets
    /// - [`BenchError::DuplicateImage`] if two triplets share a name
    /// - [`BenchError::MissingAsset`] if a file cannot be fetched
    /// - [`BenchError::SizeMismatch`] if a noisy image differs in size
    ///   from its reference
    /// - [`BenchError::ImageDecode`] if a header cannot be read
    pub fn open<S: DatasetSource + 'static>(source: S) -> Result<Self, BenchError> {
        Self::from_source(Box::new(source), None)
    }

    /// Like [`open`](Self::open), for an already boxed source. A default
    /// noiser, if one is needed, is seeded with `noise_seed`.
    ///
    /// # Errors
    ///
    /// See [`open`](Self::open).
    pub fn from_source(source: Box<dyn DatasetSource>, noise_seed: Option<u64>) -> Result<Self, BenchError> {
        let triplets = source.triplets()?;
        if triplets.is_empty() {
            return Err(BenchError::EmptyDataset(source.name().to_string()));
        }

        let mut seen = HashSet::new();
        for triplet in &triplets {
            if !seen.insert(triplet.name.as_str()) {
                return Err(BenchError::DuplicateImage(triplet.name.clone()));
            }
        }

        let metadata = load_metadata(source.fetcher(), &triplets)?;

        let default_noiser = triplets.iter().any(|t| t.noisy.is_none()).then(|| {
            let noiser: Arc<dyn Noiser> = Arc::new(noise::default_noiser(noise_seed));
            tracing::info!(
                dataset = source.name(),
                noiser = noiser.name(),
                "dataset does not provide noisy images, using default noiser",
            );
            noiser
        });

        let mut dataset = Self {
            source,
            triplets,
            metadata,
            crop: None,
            bound_noiser: None,
            default_noiser,
        };

        if !dataset.metadata.is_uniform() {
            let min = dataset.metadata.min_dimensions();
            tracing::warn!(
                dataset = dataset.name(),
                "dataset has images of different size, cropping to {min} for consistency",
            );
            dataset.crop(min.width, min.height, Anchor::CENTER)?;
        }

        Ok(dataset)
    }

    /// Registry identifier of the underlying source.
    #[must_use]
    pub fn name(&self) -> &str {
        self.source.name()
    }

    /// Description of the underlying source.
    #[must_use]
    pub fn description(&self) -> &str {
        self.source.description()
    }

    /// Number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.triplets.len()
    }

    /// Always `false` for an opened dataset.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.triplets.is_empty()
    }

    /// The triplets, in iteration order.
    #[must_use]
    pub fn triplets(&self) -> &[Triplet] {
        &self.triplets
    }

    /// Per-image sizes.
    #[must_use]
    pub const fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Active crop window, if any.
    #[must_use]
    pub const fn crop_window(&self) -> Option<CropWindow> {
        self.crop
    }

    /// Set or replace the crop window.
    ///
    /// Each axis is clamped independently to the smallest image size of
    /// the dataset, so the resulting crop may not keep the requested
    /// aspect ratio. Clamping is logged as a warning. Returns the window
    /// actually installed.
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::InvalidConfig`] if either dimension is zero.
    pub fn crop(&mut self, width: u32, height: u32, anchor: Anchor) -> Result<CropWindow, BenchError> {
        if width == 0 || height == 0 {
            return Err(BenchError::InvalidConfig(format!(
                "crop size must be positive, got {width}x{height}"
            )));
        }
        let min = self.metadata.min_dimensions();
        let window = CropWindow::new(width.min(min.width), height.min(min.height), anchor);
        if window.width != width || window.height != height {
            tracing::warn!(
                dataset = self.name(),
                "dataset has images smaller than the requested crop window ({width}x{height}), \
                 using {window} instead",
            );
        }
        self.crop = Some(window);
        Ok(window)
    }

    /// Generate noisy images with `noiser` from now on, ignoring any
    /// noisy images the dataset provides.
    pub fn set_noiser(&mut self, noiser: Arc<dyn Noiser>) {
        self.bound_noiser = Some(noiser);
    }

    /// The active synthetic noiser (bound or default), if any.
    #[must_use]
    pub fn noiser(&self) -> Option<&Arc<dyn Noiser>> {
        self.bound_noiser.as_ref().or(self.default_noiser.as_ref())
    }

    /// Name of the active synthetic noiser, if any.
    #[must_use]
    pub fn noiser_name(&self) -> Option<&str> {
        self.noiser().map(|n| n.name())
    }

    /// Returns `true` if noisy images come from the default noiser.
    #[must_use]
    pub const fn uses_default_noiser(&self) -> bool {
        self.bound_noiser.is_none() && self.default_noiser.is_some()
    }

    /// Returns `true` if some triplet has no stored noisy image.
    #[must_use]
    pub fn is_asymmetric(&self) -> bool {
        self.triplets.iter().any(|t| t.noisy.is_none())
    }

    /// Load item `index`: reference and noisy image, both cropped.
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::OutOfRange`] for a bad index, or any
    /// fetch/decode/crop failure.
    pub fn item(&self, index: usize) -> Result<ImageItem, BenchError> {
        let triplet = self.triplets.get(index).ok_or(BenchError::OutOfRange {
            index,
            len: self.triplets.len(),
        })?;

        let reference = self.load_image(&triplet.reference)?;
        let noisy = match (self.noiser(), &triplet.noisy) {
            (Some(noiser), _) => noiser.noise(&reference),
            (None, Some(path)) => self.load_image(path)?,
            (None, None) => {
                return Err(BenchError::MissingAsset {
                    path: triplet.reference.clone(),
                    reason: format!("{} has no noisy image and no noiser is active", triplet.name),
                });
            }
        };

        Ok(ImageItem {
            name: triplet.name.clone(),
            reference,
            noisy,
        })
    }

    /// Iterate over every item in triplet order. Each call starts over.
    #[must_use]
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            dataset: self,
            next: 0,
        }
    }

    /// Decode `path` (fetching it if needed) and apply the crop window.
    fn load_image(&self, path: &Path) -> Result<RgbImage, BenchError> {
        ensure_local(self.source.fetcher(), path)?;
        let image = image::open(path)?.to_rgb8();
        match &self.crop {
            Some(window) => window.apply(&image),
            None => Ok(image),
        }
    }
}

impl<'a> IntoIterator for &'a Dataset {
    type Item = Result<ImageItem, BenchError>;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Iter<'a> {
        self.iter()
    }
}

/// Lazy iterator over dataset items.
pub struct Iter<'a> {
    dataset: &'a Dataset,
    next: usize,
}

impl Iterator for Iter<'_> {
    type Item = Result<ImageItem, BenchError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.dataset.len() {
            return None;
        }
        let item = self.dataset.item(self.next);
        self.next += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.dataset.len().saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Iter<'_> {}

/// Read every image header, fetching missing files first.
fn load_metadata(fetcher: &dyn Fetch, triplets: &[Triplet]) -> Result<Metadata, BenchError> {
    let mut images = Vec::with_capacity(triplets.len());
    for triplet in triplets {
        ensure_local(fetcher, &triplet.reference)?;
        let (width, height) = image::image_dimensions(&triplet.reference)?;
        let reference = Dimensions::new(width, height);

        if let Some(noisy_path) = &triplet.noisy {
            ensure_local(fetcher, noisy_path)?;
            let (width, height) = image::image_dimensions(noisy_path)?;
            let noisy = Dimensions::new(width, height);
            if noisy != reference {
                return Err(BenchError::SizeMismatch {
                    name: triplet.name.clone(),
                    reference,
                    noisy,
                });
            }
        }

        images.push(ImageMetadata {
            name: triplet.name.clone(),
            dimensions: reference,
        });
    }
    Ok(Metadata::new(images))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::fetch::LocalOnly;

    /// In-memory list of triplets over files in a temp directory.
    pub struct ListSource {
        pub triplets: Vec<Triplet>,
    }

    impl DatasetSource for ListSource {
        fn name(&self) -> &str {
            "list"
        }

        fn description(&self) -> &str {
            "test triplets"
        }

        fn triplets(&self) -> Result<Vec<Triplet>, BenchError> {
            Ok(self.triplets.clone())
        }

        fn fetcher(&self) -> &dyn Fetch {
            &LocalOnly
        }
    }

    /// Write a uniform-color PNG and return its path.
    pub fn write_png(dir: &Path, name: &str, width: u32, height: u32, value: u8) -> PathBuf {
        let path = dir.join(format!("{name}.png"));
        RgbImage::from_pixel(width, height, image::Rgb([value, value, value]))
            .save(&path)
            .unwrap();
        path
    }

    /// Noiser that inverts the image, so its output is predictable.
    pub struct Invert;

    impl Noiser for Invert {
        fn name(&self) -> &str {
            "invert"
        }

        fn description(&self) -> &str {
            "inverts every channel"
        }

        fn noise(&self, image: &RgbImage) -> RgbImage {
            let mut out = image.clone();
            image::imageops::invert(&mut out);
            out
        }
    }

    fn symmetric(dir: &Path) -> ListSource {
        let triplets = (0..3u8)
            .map(|i| {
                let name = format!("img{i}");
                let reference = write_png(dir, &format!("{name}_ref"), 8, 6, 10 * i);
                let noisy = write_png(dir, &format!("{name}_noisy"), 8, 6, 200 + i);
                Triplet::new(name, reference, Some(noisy))
            })
            .collect();
        ListSource { triplets }
    }

    #[test]
    fn symmetric_dataset_loads_stored_noisy_images() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = Dataset::open(symmetric(dir.path())).unwrap();
        assert_eq!(dataset.len(), 3);
        assert!(!dataset.is_asymmetric());
        assert!(dataset.noiser().is_none());
        assert!(dataset.crop_window().is_none());

        let item = dataset.item(1).unwrap();
        assert_eq!(item.name, "img1");
        assert_eq!(item.reference.get_pixel(0, 0).0, [10, 10, 10]);
        assert_eq!(item.noisy.get_pixel(0, 0).0, [201, 201, 201]);
    }

    #[test]
    fn iteration_is_ordered_and_restartable() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = Dataset::open(symmetric(dir.path())).unwrap();
        let first: Vec<String> = dataset.iter().map(|i| i.unwrap().name).collect();
        let second: Vec<String> = (&dataset).into_iter().map(|i| i.unwrap().name).collect();
        assert_eq!(first, vec!["img0", "img1", "img2"]);
        assert_eq!(first, second);
        assert_eq!(dataset.iter().len(), 3);
    }

    #[test]
    fn item_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = Dataset::open(symmetric(dir.path())).unwrap();
        assert!(matches!(
            dataset.item(3),
            Err(BenchError::OutOfRange { index: 3, len: 3 })
        ));
    }

    #[test]
    fn metadata_bounds_cover_every_image() {
        let dir = tempfile::tempdir().unwrap();
        let triplets = [(10, 20), (30, 5), (15, 15)]
            .iter()
            .enumerate()
            .map(|(i, &(w, h))| {
                let name = format!("img{i}");
                let reference = write_png(dir.path(), &name, w, h, 0);
                Triplet::new(name, reference, None)
            })
            .collect();
        let dataset = Dataset::open(ListSource { triplets }).unwrap();
        let metadata = dataset.metadata();
        for image in metadata.images() {
            assert!(metadata.min_width() <= image.dimensions.width);
            assert!(image.dimensions.width <= metadata.max_width());
            assert!(metadata.min_height() <= image.dimensions.height);
            assert!(image.dimensions.height <= metadata.max_height());
        }
        assert_eq!(metadata.min_dimensions(), Dimensions::new(10, 5));
        assert!(!metadata.is_uniform());
    }

    #[test]
    fn non_uniform_sizes_are_center_cropped_to_minimum() {
        let dir = tempfile::tempdir().unwrap();
        let triplets = vec![
            Triplet::new("a", write_png(dir.path(), "a", 100, 100, 0), None),
            Triplet::new("b", write_png(dir.path(), "b", 120, 100, 0), None),
        ];
        let dataset = Dataset::open(ListSource { triplets }).unwrap();
        assert_eq!(
            dataset.crop_window(),
            Some(CropWindow::new(100, 100, Anchor::CENTER))
        );
        for item in &dataset {
            let item = item.unwrap();
            assert_eq!(Dimensions::of(&item.reference), Dimensions::new(100, 100));
            assert_eq!(Dimensions::of(&item.noisy), Dimensions::new(100, 100));
        }
    }

    #[test]
    fn size_mismatch_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let triplets = vec![Triplet::new(
            "a",
            write_png(dir.path(), "a_ref", 10, 10, 0),
            Some(write_png(dir.path(), "a_noisy", 10, 11, 0)),
        )];
        let err = Dataset::open(ListSource { triplets }).unwrap_err();
        assert!(matches!(err, BenchError::SizeMismatch { .. }));
    }

    #[test]
    fn missing_reference_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let triplets = vec![Triplet::new("a", dir.path().join("nope.png"), None)];
        let err = Dataset::open(ListSource { triplets }).unwrap_err();
        assert!(matches!(err, BenchError::MissingAsset { .. }));
    }

    #[test]
    fn duplicate_names_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "a", 4, 4, 0);
        let triplets = vec![
            Triplet::new("a", path.clone(), None),
            Triplet::new("a", path, None),
        ];
        let err = Dataset::open(ListSource { triplets }).unwrap_err();
        assert!(matches!(err, BenchError::DuplicateImage(name) if name == "a"));
    }

    #[test]
    fn empty_dataset_rejected() {
        let err = Dataset::open(ListSource { triplets: vec![] }).unwrap_err();
        assert!(matches!(err, BenchError::EmptyDataset(_)));
    }

    #[test]
    fn crop_is_clamped_per_axis() {
        let dir = tempfile::tempdir().unwrap();
        let mut dataset = Dataset::open(symmetric(dir.path())).unwrap();
        let window = dataset.crop(100, 4, Anchor::CENTER).unwrap();
        assert_eq!(window, CropWindow::new(8, 4, Anchor::CENTER));
        assert_eq!(dataset.crop_window(), Some(window));
        let item = dataset.item(0).unwrap();
        assert_eq!(Dimensions::of(&item.reference), Dimensions::new(8, 4));
    }

    #[test]
    fn crop_replaces_previous_window() {
        let dir = tempfile::tempdir().unwrap();
        let mut dataset = Dataset::open(symmetric(dir.path())).unwrap();
        dataset.crop(4, 4, Anchor::CENTER).unwrap();
        let window = dataset.crop(2, 3, Anchor::TOP | Anchor::LEFT).unwrap();
        assert_eq!(dataset.crop_window(), Some(window));
    }

    #[test]
    fn zero_crop_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut dataset = Dataset::open(symmetric(dir.path())).unwrap();
        assert!(dataset.crop(0, 4, Anchor::CENTER).is_err());
    }

    #[test]
    fn asymmetric_dataset_gets_one_default_noiser() {
        let dir = tempfile::tempdir().unwrap();
        let triplets = (0..3u8)
            .map(|i| {
                let name = format!("img{i}");
                let reference = write_png(dir.path(), &name, 16, 16, 128);
                Triplet::new(name, reference, None)
            })
            .collect();
        let dataset = Dataset::open(ListSource { triplets }).unwrap();
        assert!(dataset.is_asymmetric());
        assert!(dataset.uses_default_noiser());
        assert_eq!(dataset.noiser_name(), Some("gaussian"));

        let before = Arc::clone(dataset.noiser().unwrap());
        for item in &dataset {
            let item = item.unwrap();
            assert_eq!(Dimensions::of(&item.noisy), Dimensions::of(&item.reference));
            assert_ne!(item.noisy, item.reference);
        }
        assert!(Arc::ptr_eq(&before, dataset.noiser().unwrap()));
    }

    #[test]
    fn bound_noiser_wins_over_stored_noisy_images() {
        let dir = tempfile::tempdir().unwrap();
        let mut dataset = Dataset::open(symmetric(dir.path())).unwrap();
        dataset.set_noiser(Arc::new(Invert));
        assert!(!dataset.uses_default_noiser());
        assert_eq!(dataset.noiser_name(), Some("invert"));

        for item in &dataset {
            let item = item.unwrap();
            let mut expected = item.reference.clone();
            image::imageops::invert(&mut expected);
            assert_eq!(item.noisy, expected);
        }
    }

    #[test]
    fn report_lists_every_image() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = Dataset::open(symmetric(dir.path())).unwrap();
        let report = dataset.metadata().report(dataset.name());
        assert!(report.contains("Dataset: list"));
        assert!(report.contains("img2"));
        assert!(report.contains("uniform"));
    }
}
