//! Shared types for the denoisebench orchestration engine.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Re-export `RgbImage` so downstream crates can reference decoded
/// image data without depending on `image` directly.
pub use image::RgbImage;

/// Denoiser column value used for the undenoised (noisy vs. reference)
/// baseline rows.
pub const BASELINE_DENOISER: &str = "none";

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Create new dimensions.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Dimensions of a decoded image.
    #[must_use]
    pub fn of(image: &RgbImage) -> Self {
        Self::new(image.width(), image.height())
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// The unit image record of a dataset.
///
/// A triplet without a `noisy` path belongs to an asymmetric dataset and
/// gets its noisy counterpart from a synthetic noiser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Triplet {
    /// Name of the image, unique within its dataset.
    pub name: String,
    /// Local path of the clean (ground truth) image.
    pub reference: PathBuf,
    /// Local path of the dataset-provided noisy image, if any.
    pub noisy: Option<PathBuf>,
}

impl Triplet {
    /// Create a triplet.
    #[must_use]
    pub fn new(name: impl Into<String>, reference: impl Into<PathBuf>, noisy: Option<PathBuf>) -> Self {
        Self {
            name: name.into(),
            reference: reference.into(),
            noisy,
        }
    }
}

/// One decoded, cropped dataset item ready for evaluation.
#[derive(Debug, Clone)]
pub struct ImageItem {
    /// Triplet name.
    pub name: String,
    /// Clean image.
    pub reference: RgbImage,
    /// Degraded image (stored or synthesized).
    pub noisy: RgbImage,
}

/// A single metric observation, the row type of the results table.
///
/// `denoiser` is [`BASELINE_DENOISER`] for the noisy-vs-reference rows.
/// A `value` of NaN marks a contained denoiser or metric failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    /// Image (triplet) name.
    pub image: String,
    /// Denoiser name, or [`BASELINE_DENOISER`].
    pub denoiser: String,
    /// Metric name.
    pub metric: String,
    /// Metric value.
    pub value: f64,
    /// Wall-clock duration of the denoiser invocation (seconds).
    #[serde(rename = "time", with = "duration_serde")]
    pub duration: Duration,
}

impl ResultRecord {
    /// Returns `true` if this row marks a failed denoiser or metric call.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        self.value.is_nan()
    }

    /// Returns `true` for the undenoised baseline rows.
    #[must_use]
    pub fn is_baseline(&self) -> bool {
        self.denoiser == BASELINE_DENOISER
    }
}

/// Serde support for `std::time::Duration` as fractional seconds.
pub mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    ///
    /// # Errors
    ///
    /// Fails if the value is negative, non-finite, or out of range.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// The four kinds of pluggable capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CapabilityKind {
    /// Image collections.
    Dataset,
    /// Restoration algorithms.
    Denoiser,
    /// Image quality scores.
    Metric,
    /// Synthetic noise generators.
    Noiser,
}

impl CapabilityKind {
    /// Plural, lowercase label used in user-facing messages.
    #[must_use]
    pub const fn plural(self) -> &'static str {
        match self {
            Self::Dataset => "datasets",
            Self::Denoiser => "denoisers",
            Self::Metric => "metrics",
            Self::Noiser => "noisers",
        }
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Dataset => "dataset",
            Self::Denoiser => "denoiser",
            Self::Metric => "metric",
            Self::Noiser => "noiser",
        };
        f.write_str(label)
    }
}

/// Failure of a single denoiser or metric invocation.
///
/// These never abort a run: the evaluation pipeline records a failure
/// marker row and moves on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct AlgorithmError {
    message: String,
}

impl AlgorithmError {
    /// Create an error with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The failure message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Errors that can occur while configuring or running a benchmark.
#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    /// One or more user-supplied capability names are not registered.
    #[error(
        "the specified {} ({}) are invalid; available: {}",
        .kind.plural(),
        .invalid.join(", "),
        .available.join(", ")
    )]
    UnknownCapability {
        /// Which registry was queried.
        kind: CapabilityKind,
        /// Every invalid name that was supplied.
        invalid: Vec<String>,
        /// Every valid name (including `all` where accepted).
        available: Vec<String>,
    },

    /// A required image could not be materialized locally.
    #[error("missing asset {}: {reason}", .path.display())]
    MissingAsset {
        /// Local path that should exist.
        path: PathBuf,
        /// Why fetching it failed.
        reason: String,
    },

    /// A noisy image does not match its reference geometry.
    #[error("reference and noisy images of {name} differ in size: {reference} vs {noisy}")]
    SizeMismatch {
        /// Triplet name.
        name: String,
        /// Reference image dimensions.
        reference: Dimensions,
        /// Noisy image dimensions.
        noisy: Dimensions,
    },

    /// Two triplets share a name.
    #[error("duplicate image name in dataset: {0}")]
    DuplicateImage(String),

    /// The dataset has no images.
    #[error("dataset {0} contains no images")]
    EmptyDataset(String),

    /// Item index past the end of the dataset.
    #[error("item index {index} out of range (dataset has {len} items)")]
    OutOfRange {
        /// Requested index.
        index: usize,
        /// Number of items.
        len: usize,
    },

    /// A crop window does not fit inside an image.
    #[error("crop window {window} does not fit image of size {image}")]
    CropOutOfBounds {
        /// Crop size.
        window: Dimensions,
        /// Image size.
        image: Dimensions,
    },

    /// Failed to decode or encode an image.
    #[error("image error: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The worker pool could not be created.
    #[error("failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    /// The results sink rejected a record.
    #[error("results sink failed: {0}")]
    Sink(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Configuration is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn dimensions_display() {
        assert_eq!(Dimensions::new(640, 480).to_string(), "640x480");
    }

    #[test]
    fn dimensions_of_image() {
        let img = RgbImage::new(17, 31);
        assert_eq!(Dimensions::of(&img), Dimensions::new(17, 31));
    }

    #[test]
    fn failure_record_is_nan() {
        let record = ResultRecord {
            image: "a".to_string(),
            denoiser: "blur".to_string(),
            metric: "psnr".to_string(),
            value: f64::NAN,
            duration: Duration::ZERO,
        };
        assert!(record.is_failure());
        assert!(!record.is_baseline());
    }

    #[test]
    fn record_serializes_duration_as_time_seconds() {
        let record = ResultRecord {
            image: "a".to_string(),
            denoiser: BASELINE_DENOISER.to_string(),
            metric: "msqe".to_string(),
            value: 1.5,
            duration: Duration::from_millis(250),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["time"], serde_json::json!(0.25));
        assert_eq!(json["denoiser"], "none");
    }

    #[test]
    fn negative_duration_rejected() {
        let json = r#"{"image":"a","denoiser":"none","metric":"m","value":1.0,"time":-1.0}"#;
        assert!(serde_json::from_str::<ResultRecord>(json).is_err());
    }

    #[test]
    fn unknown_capability_lists_every_invalid_name() {
        let err = BenchError::UnknownCapability {
            kind: CapabilityKind::Denoiser,
            invalid: vec!["x".to_string(), "y".to_string()],
            available: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "the specified denoisers (x, y) are invalid; available: a, b",
        );
    }

    #[test]
    fn size_mismatch_display() {
        let err = BenchError::SizeMismatch {
            name: "droid".to_string(),
            reference: Dimensions::new(10, 10),
            noisy: Dimensions::new(10, 12),
        };
        assert_eq!(
            err.to_string(),
            "reference and noisy images of droid differ in size: 10x10 vs 10x12",
        );
    }
}
