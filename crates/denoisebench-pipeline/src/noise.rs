//! Built-in synthetic noise generators.
//!
//! Samples are scaled to `[0, 1]`, degraded, clipped back into range, and
//! rounded to 8 bits. Every noiser owns its random generator; pass a seed
//! for reproducible runs.

use std::sync::{Mutex, PoisonError};

use image::RgbImage;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal, Poisson};

use crate::capability::Noiser;
use crate::registry::Registry;
use crate::types::CapabilityKind;

/// Noise model applied by a [`SyntheticNoiser`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoiseKind {
    /// Additive zero-mean Gaussian noise.
    Gaussian,
    /// Shot noise: each sample is drawn from a Poisson distribution
    /// centered on its value.
    Poisson,
    /// Random samples replaced with the maximum value.
    Salt,
    /// Random samples replaced with zero.
    Pepper,
    /// Random samples replaced with zero or the maximum value, evenly.
    SaltAndPepper,
    /// Multiplicative Gaussian noise.
    Speckle,
}

impl NoiseKind {
    /// Every kind, in registry order.
    pub const ALL: [Self; 6] = [
        Self::Gaussian,
        Self::Poisson,
        Self::Salt,
        Self::Pepper,
        Self::SaltAndPepper,
        Self::Speckle,
    ];

    /// Standard deviation of the Gaussian and speckle noise.
    pub const SIGMA: f64 = 0.1;

    /// Fraction of samples replaced by the impulse noise kinds.
    pub const AMOUNT: f64 = 0.05;

    /// Registry identifier.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Gaussian => "gaussian",
            Self::Poisson => "poisson",
            Self::Salt => "salt",
            Self::Pepper => "pepper",
            Self::SaltAndPepper => "snp",
            Self::Speckle => "speckle",
        }
    }

    /// Short human description.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Gaussian => "Additive Gaussian noise",
            Self::Poisson => "Poisson (shot) noise",
            Self::Salt => "Salt noise (random white samples)",
            Self::Pepper => "Pepper noise (random black samples)",
            Self::SaltAndPepper => "Salt and pepper noise",
            Self::Speckle => "Multiplicative (speckle) noise",
        }
    }
}

/// A noiser drawing from its own random generator.
#[derive(Debug)]
pub struct SyntheticNoiser {
    kind: NoiseKind,
    rng: Mutex<StdRng>,
}

impl SyntheticNoiser {
    /// Create a noiser. With `seed`, the sequence of outputs is
    /// reproducible; without, the generator is seeded from the OS.
    #[must_use]
    pub fn new(kind: NoiseKind, seed: Option<u64>) -> Self {
        let rng = seed.map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);
        Self {
            kind,
            rng: Mutex::new(rng),
        }
    }

    /// The noise model.
    #[must_use]
    pub const fn kind(&self) -> NoiseKind {
        self.kind
    }
}

impl Noiser for SyntheticNoiser {
    fn name(&self) -> &str {
        self.kind.name()
    }

    fn description(&self) -> &str {
        self.kind.description()
    }

    fn noise(&self, image: &RgbImage) -> RgbImage {
        // A panic while holding the lock cannot leave the generator in
        // an invalid state.
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        let rng = &mut *rng;

        let mut out = image.clone();
        // SIGMA is a finite positive constant, so construction cannot fail.
        let Ok(gaussian) = Normal::new(0.0, NoiseKind::SIGMA) else {
            return out;
        };
        match self.kind {
            NoiseKind::Gaussian => map_samples(&mut out, |v| v + gaussian.sample(rng)),
            NoiseKind::Speckle => map_samples(&mut out, |v| v + v * gaussian.sample(rng)),
            NoiseKind::Poisson => {
                let levels = poisson_levels(image);
                map_samples(&mut out, |v| poisson(rng, v * levels) / levels);
            }
            NoiseKind::Salt => map_samples(&mut out, |v| {
                if rng.random_bool(NoiseKind::AMOUNT) { 1.0 } else { v }
            }),
            NoiseKind::Pepper => map_samples(&mut out, |v| {
                if rng.random_bool(NoiseKind::AMOUNT) { 0.0 } else { v }
            }),
            NoiseKind::SaltAndPepper => map_samples(&mut out, |v| {
                if rng.random_bool(NoiseKind::AMOUNT) {
                    if rng.random_bool(0.5) { 1.0 } else { 0.0 }
                } else {
                    v
                }
            }),
        }
        out
    }
}

/// Apply `f` to every sample, scaled to `[0, 1]`, clipping the result.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn map_samples(image: &mut RgbImage, mut f: impl FnMut(f64) -> f64) {
    for sample in image.iter_mut() {
        let v = f(f64::from(*sample) / 255.0).clamp(0.0, 1.0);
        *sample = (v * 255.0).round() as u8;
    }
}

/// Number of intensity levels used to scale values before Poisson
/// sampling: the next power of two above the count of distinct samples.
#[allow(clippy::cast_precision_loss)]
fn poisson_levels(image: &RgbImage) -> f64 {
    let mut seen = [false; 256];
    for &sample in image.as_raw() {
        seen[usize::from(sample)] = true;
    }
    let distinct = seen.iter().filter(|&&s| s).count().max(1);
    distinct.next_power_of_two() as f64
}

/// Poisson sample with mean `lambda`; zero for a non-positive mean.
fn poisson(rng: &mut StdRng, lambda: f64) -> f64 {
    if lambda <= 0.0 {
        return 0.0;
    }
    Poisson::new(lambda).map_or(lambda, |d| d.sample(rng))
}

/// The noiser used when a dataset provides no noisy images.
#[must_use]
pub fn default_noiser(seed: Option<u64>) -> SyntheticNoiser {
    SyntheticNoiser::new(NoiseKind::Gaussian, seed)
}

/// Registry of the built-in noisers. Every created noiser is seeded with
/// `seed` when given.
#[must_use]
pub fn registry(seed: Option<u64>) -> Registry<Box<dyn Noiser>> {
    let mut registry = Registry::new(CapabilityKind::Noiser);
    for kind in NoiseKind::ALL {
        registry.register(kind.name(), kind.description(), move || {
            Ok(Box::new(SyntheticNoiser::new(kind, seed)) as Box<dyn Noiser>)
        });
    }
    registry
}
