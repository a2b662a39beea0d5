//! Built-in denoisers.
//!
//! Classic spatial filters: box blur, Gaussian blur, median blur, and a
//! bilateral filter. The linear filters come from `imageproc` and only
//! accept single-channel images, so they go through
//! [`filter_channels`], which splits an RGB image into three
//! [`GrayImage`]s, filters each, and reassembles.
//!
//! The bilateral filter weighs neighbors by both spatial and color
//! distance and is the slowest of the set, so it is the one marked
//! [`parallel`](Denoiser::parallel).

use image::{GrayImage, RgbImage};

use crate::capability::{Denoiser, ParamDomain, ParamValue, ParameterSpace, Parameters};
use crate::registry::Registry;
use crate::types::{AlgorithmError, CapabilityKind};

/// Odd kernel sizes explored by parameter search for the window filters.
const KERNEL_SIZE_DOMAIN: ParamDomain = ParamDomain::IntRange {
    start: 3,
    end: 31,
    step: 2,
};

/// Apply `filter` to each R/G/B channel of `image` independently.
#[must_use = "returns the filtered image"]
pub fn filter_channels(image: &RgbImage, filter: impl Fn(&GrayImage) -> GrayImage) -> RgbImage {
    let (w, h) = (image.width(), image.height());

    let filtered: [GrayImage; 3] = std::array::from_fn(|c| {
        let channel = GrayImage::from_fn(w, h, |x, y| image::Luma([image.get_pixel(x, y).0[c]]));
        filter(&channel)
    });

    RgbImage::from_fn(w, h, |x, y| {
        image::Rgb([
            filtered[0].get_pixel(x, y).0[0],
            filtered[1].get_pixel(x, y).0[0],
            filtered[2].get_pixel(x, y).0[0],
        ])
    })
}

fn check_kernel_size(kernel_size: u32) -> Result<u32, AlgorithmError> {
    if kernel_size == 0 || kernel_size % 2 == 0 {
        return Err(AlgorithmError::new(format!(
            "kernel size must be a positive odd number, got {kernel_size}"
        )));
    }
    Ok(kernel_size / 2)
}

/// Normalized box filter over a square window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxBlur {
    /// Window side length in pixels (odd).
    pub kernel_size: u32,
}

impl BoxBlur {
    pub const DEFAULT_KERNEL_SIZE: u32 = 5;
}

impl Default for BoxBlur {
    fn default() -> Self {
        Self {
            kernel_size: Self::DEFAULT_KERNEL_SIZE,
        }
    }
}

impl Denoiser for BoxBlur {
    fn name(&self) -> &str {
        "blur"
    }

    fn description(&self) -> &str {
        "Blur smoothing filter"
    }

    fn parameters(&self) -> Parameters {
        Parameters::from([(
            "kernel_size".to_string(),
            ParamValue::Int(i64::from(self.kernel_size)),
        )])
    }

    fn parameter_space(&self) -> ParameterSpace {
        ParameterSpace::from([("kernel_size".to_string(), KERNEL_SIZE_DOMAIN)])
    }

    fn denoise(&self, image: &RgbImage) -> Result<RgbImage, AlgorithmError> {
        let radius = check_kernel_size(self.kernel_size)?;
        Ok(filter_channels(image, |channel| {
            imageproc::filter::box_filter(channel, radius, radius)
        }))
    }
}

/// Gaussian blur.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianBlur {
    /// Standard deviation of the kernel in pixels.
    pub sigma: f32,
}

impl GaussianBlur {
    /// Sigma of a 5x5 kernel when derived from its size.
    pub const DEFAULT_SIGMA: f32 = 1.1;
}

impl Default for GaussianBlur {
    fn default() -> Self {
        Self {
            sigma: Self::DEFAULT_SIGMA,
        }
    }
}

impl Denoiser for GaussianBlur {
    fn name(&self) -> &str {
        "gaussianblur"
    }

    fn description(&self) -> &str {
        "Gaussian blur filter"
    }

    fn parameters(&self) -> Parameters {
        Parameters::from([(
            "sigma".to_string(),
            ParamValue::Float(f64::from(self.sigma)),
        )])
    }

    fn parameter_space(&self) -> ParameterSpace {
        ParameterSpace::from([(
            "sigma".to_string(),
            ParamDomain::Uniform {
                low: 0.1,
                high: 5.0,
            },
        )])
    }

    fn denoise(&self, image: &RgbImage) -> Result<RgbImage, AlgorithmError> {
        // imageproc panics on non-positive sigma.
        if self.sigma <= 0.0 || !self.sigma.is_finite() {
            return Err(AlgorithmError::new(format!(
                "sigma must be positive, got {}",
                self.sigma
            )));
        }
        Ok(filter_channels(image, |channel| {
            imageproc::filter::gaussian_blur_f32(channel, self.sigma)
        }))
    }
}

/// Median filter over a square window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MedianBlur {
    /// Window side length in pixels (odd).
    pub kernel_size: u32,
}

impl MedianBlur {
    pub const DEFAULT_KERNEL_SIZE: u32 = 5;
}

impl Default for MedianBlur {
    fn default() -> Self {
        Self {
            kernel_size: Self::DEFAULT_KERNEL_SIZE,
        }
    }
}

impl Denoiser for MedianBlur {
    fn name(&self) -> &str {
        "medianblur"
    }

    fn description(&self) -> &str {
        "Median blur filter"
    }

    fn parameters(&self) -> Parameters {
        Parameters::from([(
            "kernel_size".to_string(),
            ParamValue::Int(i64::from(self.kernel_size)),
        )])
    }

    fn parameter_space(&self) -> ParameterSpace {
        ParameterSpace::from([("kernel_size".to_string(), KERNEL_SIZE_DOMAIN)])
    }

    fn denoise(&self, image: &RgbImage) -> Result<RgbImage, AlgorithmError> {
        let radius = check_kernel_size(self.kernel_size)?;
        // The median filter is generic over the pixel type; no channel split.
        Ok(imageproc::filter::median_filter(image, radius, radius))
    }
}

/// Edge-preserving bilateral filter.
///
/// Each output pixel is the weighted mean of its window, where a
/// neighbor's weight is the product of a spatial Gaussian on its distance
/// and a range Gaussian on its RGB distance to the center pixel. Color
/// distances are measured on intensities scaled to `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bilateral {
    /// Window side length in pixels (odd).
    pub win_size: u32,
    /// Range (color) standard deviation, in `[0, 1]` intensity units.
    pub sigma_color: f32,
    /// Spatial standard deviation in pixels.
    pub sigma_spatial: f32,
}

impl Bilateral {
    pub const DEFAULT_WIN_SIZE: u32 = 3;
    pub const DEFAULT_SIGMA_COLOR: f32 = 0.1;
    pub const DEFAULT_SIGMA_SPATIAL: f32 = 1.0;
}

impl Default for Bilateral {
    fn default() -> Self {
        Self {
            win_size: Self::DEFAULT_WIN_SIZE,
            sigma_color: Self::DEFAULT_SIGMA_COLOR,
            sigma_spatial: Self::DEFAULT_SIGMA_SPATIAL,
        }
    }
}

impl Denoiser for Bilateral {
    fn name(&self) -> &str {
        "bilateral"
    }

    fn description(&self) -> &str {
        "Bilateral denoiser"
    }

    fn parallel(&self) -> bool {
        true
    }

    fn parameters(&self) -> Parameters {
        Parameters::from([
            (
                "win_size".to_string(),
                ParamValue::Int(i64::from(self.win_size)),
            ),
            (
                "sigma_color".to_string(),
                ParamValue::Float(f64::from(self.sigma_color)),
            ),
            (
                "sigma_spatial".to_string(),
                ParamValue::Float(f64::from(self.sigma_spatial)),
            ),
        ])
    }

    fn parameter_space(&self) -> ParameterSpace {
        ParameterSpace::from([
            ("win_size".to_string(), KERNEL_SIZE_DOMAIN),
            (
                "sigma_color".to_string(),
                ParamDomain::Uniform {
                    low: 0.0,
                    high: 1.0,
                },
            ),
            (
                "sigma_spatial".to_string(),
                ParamDomain::IntRange {
                    start: 1,
                    end: 30,
                    step: 1,
                },
            ),
        ])
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_possible_wrap,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    fn denoise(&self, image: &RgbImage) -> Result<RgbImage, AlgorithmError> {
        let radius = i64::from(check_kernel_size(self.win_size)?);
        if self.sigma_color <= 0.0 || self.sigma_spatial <= 0.0 {
            return Err(AlgorithmError::new("bilateral sigmas must be positive"));
        }

        let color_denom = 2.0 * self.sigma_color * self.sigma_color;
        let spatial_denom = 2.0 * self.sigma_spatial * self.sigma_spatial;
        let (w, h) = (i64::from(image.width()), i64::from(image.height()));

        // Spatial weights depend only on the offset.
        let side = (2 * radius + 1) as usize;
        let spatial: Vec<f32> = (-radius..=radius)
            .flat_map(|dy| (-radius..=radius).map(move |dx| (dx * dx + dy * dy) as f32))
            .map(|d2| (-d2 / spatial_denom).exp())
            .collect();

        let to_unit = |p: &image::Rgb<u8>| p.0.map(|v| f32::from(v) / 255.0);

        Ok(RgbImage::from_fn(image.width(), image.height(), |x, y| {
            let center = to_unit(image.get_pixel(x, y));
            let mut sum = [0.0_f32; 3];
            let mut total = 0.0_f32;

            for dy in -radius..=radius {
                let ny = i64::from(y) + dy;
                if ny < 0 || ny >= h {
                    continue;
                }
                for dx in -radius..=radius {
                    let nx = i64::from(x) + dx;
                    if nx < 0 || nx >= w {
                        continue;
                    }
                    let neighbor = to_unit(image.get_pixel(nx as u32, ny as u32));
                    let color_d2: f32 = (0..3).map(|c| (neighbor[c] - center[c]).powi(2)).sum();
                    let weight = spatial[(dy + radius) as usize * side + (dx + radius) as usize]
                        * (-color_d2 / color_denom).exp();
                    for (acc, value) in sum.iter_mut().zip(neighbor) {
                        *acc += weight * value;
                    }
                    total += weight;
                }
            }

            // The center pixel always contributes weight 1.
            image::Rgb(sum.map(|s| (s / total * 255.0).round().clamp(0.0, 255.0) as u8))
        }))
    }
}

/// Registry of the built-in denoisers with default parameters.
#[must_use]
pub fn registry() -> Registry<Box<dyn Denoiser>> {
    let mut registry = Registry::new(CapabilityKind::Denoiser);
    register::<BoxBlur>(&mut registry);
    register::<GaussianBlur>(&mut registry);
    register::<MedianBlur>(&mut registry);
    register::<Bilateral>(&mut registry);
    registry
}

fn register<D: Denoiser + Default + 'static>(registry: &mut Registry<Box<dyn Denoiser>>) {
    let prototype = D::default();
    registry.register(prototype.name(), prototype.description(), || {
        Ok(Box::new(D::default()) as Box<dyn Denoiser>)
    });
}
