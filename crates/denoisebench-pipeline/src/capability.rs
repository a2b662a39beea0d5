//! Capability contracts for denoisers, metrics, and noisers.
//!
//! Each capability is a trait with a `name` and a human `description`.
//! Concrete implementations live in [`crate::denoise`], [`crate::metric`],
//! and [`crate::noise`]; datasets have their own contract in
//! [`crate::dataset`]. The evaluation pipeline only ever talks to these
//! traits, so algorithm bodies stay opaque to it.
//!
//! Invocations go through [`run_denoiser`] and [`run_metric`], which turn
//! panics inside an algorithm body into [`AlgorithmError`]s.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::types::{AlgorithmError, Dimensions};

/// A tunable parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Sampling domain of a tunable parameter.
///
/// Consumed by external tuning tools; the evaluation pipeline never
/// samples from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParamDomain {
    /// Integers in `start..end` with the given step.
    IntRange { start: i64, end: i64, step: i64 },
    /// Uniform real distribution over `[low, high)`.
    Uniform { low: f64, high: f64 },
    /// One of a fixed set of values.
    Choice { values: Vec<ParamValue> },
}

/// Parameter name to current value.
pub type Parameters = BTreeMap<String, ParamValue>;

/// Parameter name to sampling domain.
pub type ParameterSpace = BTreeMap<String, ParamDomain>;

/// An algorithm that maps a noisy image to a restored image.
pub trait Denoiser: Send + Sync {
    /// Registry identifier.
    fn name(&self) -> &str;

    /// Short human description.
    fn description(&self) -> &str;

    /// Whether the pipeline may run this denoiser on the worker pool.
    ///
    /// Denoisers that already saturate the machine or touch shared
    /// global state should stay sequential.
    fn parallel(&self) -> bool {
        false
    }

    /// Snapshot of the current parameter values.
    fn parameters(&self) -> Parameters {
        Parameters::new()
    }

    /// Domains the tunable parameters may be sampled from.
    fn parameter_space(&self) -> ParameterSpace {
        ParameterSpace::new()
    }

    /// Restore `image`.
    ///
    /// # Errors
    ///
    /// Returns an [`AlgorithmError`] if the algorithm cannot process the
    /// image.
    fn denoise(&self, image: &RgbImage) -> Result<RgbImage, AlgorithmError>;
}

/// A function scoring the similarity or difference of two images.
pub trait Metric: Send + Sync {
    /// Registry identifier.
    fn name(&self) -> &str;

    /// Short human description.
    fn description(&self) -> &str;

    /// Score `test` against `reference`.
    ///
    /// # Errors
    ///
    /// Returns an [`AlgorithmError`] if the images cannot be compared.
    fn compare(&self, reference: &RgbImage, test: &RgbImage) -> Result<f64, AlgorithmError>;
}

/// A synthetic noise generator.
pub trait Noiser: Send + Sync {
    /// Registry identifier.
    fn name(&self) -> &str;

    /// Short human description.
    fn description(&self) -> &str;

    /// Return a degraded copy of `image`.
    fn noise(&self, image: &RgbImage) -> RgbImage;
}

/// Run a denoiser, containing panics and checking the output geometry.
///
/// # Errors
///
/// Returns an [`AlgorithmError`] if the denoiser fails, panics, or
/// returns an image of a different size than its input.
pub fn run_denoiser(denoiser: &dyn Denoiser, image: &RgbImage) -> Result<RgbImage, AlgorithmError> {
    let output = contain(|| denoiser.denoise(image))?;
    if output.dimensions() != image.dimensions() {
        return Err(AlgorithmError::new(format!(
            "{} returned a {} image for a {} input",
            denoiser.name(),
            Dimensions::of(&output),
            Dimensions::of(image),
        )));
    }
    Ok(output)
}

/// Run a metric, containing panics and rejecting mismatched geometry.
///
/// # Errors
///
/// Returns an [`AlgorithmError`] if the two images differ in size or
/// the metric fails or panics.
pub fn run_metric(
    metric: &dyn Metric,
    reference: &RgbImage,
    test: &RgbImage,
) -> Result<f64, AlgorithmError> {
    if reference.dimensions() != test.dimensions() {
        return Err(AlgorithmError::new(format!(
            "cannot compare a {} image against a {} reference",
            Dimensions::of(test),
            Dimensions::of(reference),
        )));
    }
    contain(|| metric.compare(reference, test))
}

/// Call `f`, converting a panic into an [`AlgorithmError`].
fn contain<T>(f: impl FnOnce() -> Result<T, AlgorithmError>) -> Result<T, AlgorithmError> {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(ToString::to_string)
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Err(AlgorithmError::new(format!("panicked: {message}")))
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    struct Panicking;

    impl Denoiser for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        fn description(&self) -> &str {
            "always panics"
        }

        fn denoise(&self, _image: &RgbImage) -> Result<RgbImage, AlgorithmError> {
            panic!("kaboom");
        }
    }

    struct Shrinking;

    impl Denoiser for Shrinking {
        fn name(&self) -> &str {
            "shrinking"
        }

        fn description(&self) -> &str {
            "returns a smaller image"
        }

        fn denoise(&self, _image: &RgbImage) -> Result<RgbImage, AlgorithmError> {
            Ok(RgbImage::new(1, 1))
        }
    }

    struct Constant;

    impl Metric for Constant {
        fn name(&self) -> &str {
            "constant"
        }

        fn description(&self) -> &str {
            "always 1"
        }

        fn compare(&self, _reference: &RgbImage, _test: &RgbImage) -> Result<f64, AlgorithmError> {
            Ok(1.0)
        }
    }

    #[test]
    fn denoiser_defaults() {
        assert!(!Shrinking.parallel());
        assert!(Shrinking.parameters().is_empty());
        assert!(Shrinking.parameter_space().is_empty());
    }

    #[test]
    fn panic_becomes_algorithm_error() {
        let err = run_denoiser(&Panicking, &RgbImage::new(4, 4)).unwrap_err();
        assert_eq!(err.message(), "panicked: kaboom");
    }

    #[test]
    fn resized_output_is_rejected() {
        let err = run_denoiser(&Shrinking, &RgbImage::new(4, 4)).unwrap_err();
        assert!(err.message().contains("1x1"), "{}", err.message());
    }

    #[test]
    fn metric_rejects_mismatched_geometry() {
        let result = run_metric(&Constant, &RgbImage::new(4, 4), &RgbImage::new(4, 5));
        assert!(result.is_err());
        let ok = run_metric(&Constant, &RgbImage::new(4, 4), &RgbImage::new(4, 4));
        assert_eq!(ok, Ok(1.0));
    }

    #[test]
    fn param_value_untagged_json() {
        let mut params = Parameters::new();
        params.insert("radius".to_string(), ParamValue::Int(2));
        params.insert("sigma".to_string(), ParamValue::Float(0.5));
        params.insert("wavelet".to_string(), ParamValue::Text("db6".to_string()));
        let json = serde_json::to_string(&params).unwrap();
        assert_eq!(json, r#"{"radius":2,"sigma":0.5,"wavelet":"db6"}"#);
    }

    #[test]
    fn param_domain_is_tagged() {
        let domain = ParamDomain::Uniform {
            low: 0.0,
            high: 1.0,
        };
        let json = serde_json::to_value(&domain).unwrap();
        assert_eq!(json["kind"], "uniform");
    }
}
