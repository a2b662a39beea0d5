//! Built-in image quality metrics.
//!
//! All metrics treat an RGB image as a flat array of 8-bit samples with a
//! data range of 255. Lower is better for [`MeanSquaredError`] and
//! [`NormalizedRootMse`]; higher is better for
//! [`PeakSignalNoiseRatio`] and [`StructuralSimilarity`].

use image::RgbImage;

use crate::capability::Metric;
use crate::registry::Registry;
use crate::types::{AlgorithmError, CapabilityKind};

/// Maximum sample value of an 8-bit image.
const DATA_RANGE: f64 = 255.0;

/// Sum of squared sample differences and the sample count.
#[allow(clippy::cast_precision_loss)]
fn squared_error(reference: &RgbImage, test: &RgbImage) -> (f64, f64) {
    let sum = reference
        .as_raw()
        .iter()
        .zip(test.as_raw())
        .map(|(&a, &b)| (f64::from(a) - f64::from(b)).powi(2))
        .sum();
    (sum, reference.as_raw().len() as f64)
}

fn mean_squared_error(reference: &RgbImage, test: &RgbImage) -> Result<f64, AlgorithmError> {
    let (sum, count) = squared_error(reference, test);
    if count == 0.0 {
        return Err(AlgorithmError::new("cannot compare empty images"));
    }
    Ok(sum / count)
}

/// Mean of the squared sample differences.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeanSquaredError;

impl Metric for MeanSquaredError {
    fn name(&self) -> &str {
        "msqe"
    }

    fn description(&self) -> &str {
        "Mean Squared Error Metric"
    }

    fn compare(&self, reference: &RgbImage, test: &RgbImage) -> Result<f64, AlgorithmError> {
        mean_squared_error(reference, test)
    }
}

/// Root of the squared error, normalized by the reference's Euclidean
/// norm: `||reference - test|| / ||reference||`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizedRootMse;

impl Metric for NormalizedRootMse {
    fn name(&self) -> &str {
        "nrmse"
    }

    fn description(&self) -> &str {
        "Normalized Root Mean Squared Error Metric"
    }

    fn compare(&self, reference: &RgbImage, test: &RgbImage) -> Result<f64, AlgorithmError> {
        let (error, _) = squared_error(reference, test);
        let norm: f64 = reference.as_raw().iter().map(|&v| f64::from(v).powi(2)).sum();
        if norm == 0.0 {
            return Err(AlgorithmError::new("reference image is all zeros"));
        }
        Ok((error / norm).sqrt())
    }
}

/// Peak signal-to-noise ratio in decibels. Identical images score
/// positive infinity.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeakSignalNoiseRatio;

impl Metric for PeakSignalNoiseRatio {
    fn name(&self) -> &str {
        "psnr"
    }

    fn description(&self) -> &str {
        "Peak Signal Noise Ratio"
    }

    fn compare(&self, reference: &RgbImage, test: &RgbImage) -> Result<f64, AlgorithmError> {
        let mse = mean_squared_error(reference, test)?;
        if mse == 0.0 {
            return Ok(f64::INFINITY);
        }
        Ok(10.0 * (DATA_RANGE * DATA_RANGE / mse).log10())
    }
}

/// Mean structural similarity index.
///
/// Computed per channel over every full 7x7 window (uniform weights,
/// sample covariance), then averaged across channels.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralSimilarity;

impl StructuralSimilarity {
    /// Side length of the sliding window.
    pub const WINDOW: u32 = 7;
    const K1: f64 = 0.01;
    const K2: f64 = 0.03;
}

impl Metric for StructuralSimilarity {
    fn name(&self) -> &str {
        "ssim"
    }

    fn description(&self) -> &str {
        "Structural Similarity"
    }

    fn compare(&self, reference: &RgbImage, test: &RgbImage) -> Result<f64, AlgorithmError> {
        let (w, h) = reference.dimensions();
        if w < Self::WINDOW || h < Self::WINDOW {
            return Err(AlgorithmError::new(format!(
                "ssim needs images of at least {0}x{0}, got {w}x{h}",
                Self::WINDOW
            )));
        }
        let total: f64 = (0..3).map(|c| channel_ssim(reference, test, c)).sum();
        Ok(total / 3.0)
    }
}

/// Summed-area tables of `x`, `y`, `x*x`, `y*y`, and `x*y` for one
/// channel pair, with a zero row and column in front.
struct Moments {
    stride: usize,
    tables: [Vec<f64>; 5],
}

impl Moments {
    fn new(reference: &RgbImage, test: &RgbImage, channel: usize) -> Self {
        let (w, h) = (reference.width() as usize, reference.height() as usize);
        let stride = w + 1;
        let mut tables: [Vec<f64>; 5] = std::array::from_fn(|_| vec![0.0; stride * (h + 1)]);

        for (y, (ref_row, test_row)) in reference.rows().zip(test.rows()).enumerate() {
            let mut row_sums = [0.0_f64; 5];
            for (x, (a, b)) in ref_row.zip(test_row).enumerate() {
                let (a, b) = (f64::from(a.0[channel]), f64::from(b.0[channel]));
                let values = [a, b, a * a, b * b, a * b];
                let at = (y + 1) * stride + (x + 1);
                for ((table, sum), value) in tables.iter_mut().zip(&mut row_sums).zip(values) {
                    *sum += value;
                    table[at] = table[at - stride] + *sum;
                }
            }
        }
        Self { stride, tables }
    }

    /// Window sums of the five moments over `[x0, x1) x [y0, y1)`.
    fn window(&self, x0: usize, y0: usize, x1: usize, y1: usize) -> [f64; 5] {
        let s = self.stride;
        self.tables
            .each_ref()
            .map(|t| t[y1 * s + x1] - t[y0 * s + x1] - t[y1 * s + x0] + t[y0 * s + x0])
    }
}

#[allow(clippy::cast_precision_loss)]
fn channel_ssim(reference: &RgbImage, test: &RgbImage, channel: usize) -> f64 {
    let moments = Moments::new(reference, test, channel);
    let win = StructuralSimilarity::WINDOW as usize;
    let n = (win * win) as f64;
    let cov_norm = n / (n - 1.0);
    let c1 = (StructuralSimilarity::K1 * DATA_RANGE).powi(2);
    let c2 = (StructuralSimilarity::K2 * DATA_RANGE).powi(2);

    let (w, h) = (reference.width() as usize, reference.height() as usize);
    let mut total = 0.0;
    let mut count = 0.0;
    for y0 in 0..=h - win {
        for x0 in 0..=w - win {
            let [sx, sy, sxx, syy, sxy] = moments.window(x0, y0, x0 + win, y0 + win);
            let (ux, uy) = (sx / n, sy / n);
            let vx = cov_norm * (sxx / n - ux * ux);
            let vy = cov_norm * (syy / n - uy * uy);
            let vxy = cov_norm * (sxy / n - ux * uy);

            let numerator = (2.0 * ux * uy + c1) * (2.0 * vxy + c2);
            let denominator = (ux * ux + uy * uy + c1) * (vx + vy + c2);
            total += numerator / denominator;
            count += 1.0;
        }
    }
    total / count
}

/// Registry of the built-in metrics.
#[must_use]
pub fn registry() -> Registry<Box<dyn Metric>> {
    let mut registry = Registry::new(CapabilityKind::Metric);
    register::<MeanSquaredError>(&mut registry);
    register::<NormalizedRootMse>(&mut registry);
    register::<PeakSignalNoiseRatio>(&mut registry);
    register::<StructuralSimilarity>(&mut registry);
    registry
}

fn register<M: Metric + Default + 'static>(registry: &mut Registry<Box<dyn Metric>>) {
    let prototype = M::default();
    registry.register(prototype.name(), prototype.description(), || {
        Ok(Box::new(M::default()) as Box<dyn Metric>)
    });
}
