//! Capability registries: identifier -> factory + description.
//!
//! Registration is explicit. [`Registries::builtin`] assembles one
//! [`Registry`] per capability kind at startup and the caller passes it
//! to whatever needs to resolve names; there is no global state.
//!
//! [`resolve`] is the single validation path for user-supplied names of
//! every kind, so bad input is reported the same way everywhere.

use std::path::Path;

use crate::capability::{Denoiser, Metric, Noiser};
use crate::dataset::{Dataset, DatasetSource};
use crate::datasets::{DirectoryDataset, NaturalImageNoiseDataset};
use crate::types::{BenchError, CapabilityKind};
use crate::{denoise, metric, noise};

/// Reserved token that expands to every registered name.
pub const ALL: &str = "all";

/// Zero-argument constructor of a capability instance.
pub type Factory<T> = Box<dyn Fn() -> Result<T, BenchError> + Send + Sync>;

struct Entry<T> {
    name: String,
    description: String,
    factory: Factory<T>,
}

/// Ordered table of factories for one capability kind.
pub struct Registry<T> {
    kind: CapabilityKind,
    entries: Vec<Entry<T>>,
}

impl<T> Registry<T> {
    /// Create an empty registry for `kind`.
    #[must_use]
    pub const fn new(kind: CapabilityKind) -> Self {
        Self {
            kind,
            entries: Vec::new(),
        }
    }

    /// The capability kind this registry produces.
    #[must_use]
    pub const fn kind(&self) -> CapabilityKind {
        self.kind
    }

    /// Register `factory` under `name`, replacing any previous entry.
    pub fn register<F>(&mut self, name: impl Into<String>, description: impl Into<String>, factory: F)
    where
        F: Fn() -> Result<T, BenchError> + Send + Sync + 'static,
    {
        let name = name.into();
        let entry = Entry {
            name: name.clone(),
            description: description.into(),
            factory: Box::new(factory),
        };
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    /// Registered names, in registration order.
    #[must_use]
    pub fn list(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    /// Registered `(name, description)` pairs, in registration order.
    #[must_use]
    pub fn list_with_descriptions(&self) -> Vec<(&str, &str)> {
        self.entries
            .iter()
            .map(|e| (e.name.as_str(), e.description.as_str()))
            .collect()
    }

    /// Returns `true` if `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    /// Build a fresh instance of `name`.
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::UnknownCapability`] if `name` is not
    /// registered, or whatever the factory itself fails with.
    pub fn create(&self, name: &str) -> Result<T, BenchError> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| BenchError::UnknownCapability {
                kind: self.kind,
                invalid: vec![name.to_string()],
                available: self.names(),
            })?;
        (entry.factory)()
    }

    /// Validate user-supplied names against this registry.
    ///
    /// See [`resolve`].
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::UnknownCapability`] listing every invalid name.
    pub fn resolve(&self, informed: &[String], allow_all: bool) -> Result<Vec<String>, BenchError> {
        resolve(self.kind, informed, &self.names(), allow_all)
    }

    /// Build one instance per name.
    ///
    /// # Errors
    ///
    /// Fails on the first unknown name or factory error.
    pub fn create_all(&self, names: &[String]) -> Result<Vec<T>, BenchError> {
        names.iter().map(|n| self.create(n)).collect()
    }

    fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }
}

/// Validate `informed` names against `available`.
///
/// When `allow_all` is set and `informed` contains [`ALL`], every
/// available name is returned and the other informed names are ignored.
/// Otherwise the informed names are returned unchanged if all of them
/// are valid.
///
/// # Errors
///
/// Returns [`BenchError::UnknownCapability`] carrying *every* invalid
/// name and the full list of alternatives (including [`ALL`] when it
/// is accepted). Callers treat this as "abort before any work".
pub fn resolve(
    kind: CapabilityKind,
    informed: &[String],
    available: &[String],
    allow_all: bool,
) -> Result<Vec<String>, BenchError> {
    if allow_all && informed.iter().any(|n| n == ALL) {
        return Ok(available.to_vec());
    }

    let invalid: Vec<String> = informed
        .iter()
        .filter(|n| !available.contains(n))
        .cloned()
        .collect();

    if invalid.is_empty() {
        return Ok(informed.to_vec());
    }

    let mut alternatives = available.to_vec();
    if allow_all {
        alternatives.push(ALL.to_string());
    }
    Err(BenchError::UnknownCapability {
        kind,
        invalid,
        available: alternatives,
    })
}

/// One registry per capability kind.
pub struct Registries {
    pub datasets: Registry<Dataset>,
    pub denoisers: Registry<Box<dyn Denoiser>>,
    pub metrics: Registry<Box<dyn Metric>>,
    pub noisers: Registry<Box<dyn Noiser>>,
}

impl Registries {
    /// Assemble every built-in capability.
    ///
    /// Datasets are the Natural Image Noise Dataset (cached under
    /// `data_root/natural_images`) plus one directory dataset per other
    /// subdirectory of `data_root`. `seed` makes the synthetic noisers
    /// reproducible.
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::Io`] if `data_root` exists but cannot be
    /// listed.
    pub fn builtin(data_root: &Path, seed: Option<u64>) -> Result<Self, BenchError> {
        Ok(Self {
            datasets: builtin_datasets(data_root, seed)?,
            denoisers: denoise::registry(),
            metrics: metric::registry(),
            noisers: noise::registry(seed),
        })
    }
}

fn builtin_datasets(data_root: &Path, seed: Option<u64>) -> Result<Registry<Dataset>, BenchError> {
    let mut registry = Registry::new(CapabilityKind::Dataset);

    let nind_root = data_root.join(NaturalImageNoiseDataset::NAME);
    registry.register(
        NaturalImageNoiseDataset::NAME,
        NaturalImageNoiseDataset::DESCRIPTION,
        move || Dataset::from_source(Box::new(NaturalImageNoiseDataset::new(nind_root.clone())), seed),
    );

    for dir in DirectoryDataset::discover(data_root)? {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if name.is_empty() || registry.contains(&name) {
            continue;
        }
        let source = DirectoryDataset::new(&name, dir);
        let description = source.description().to_string();
        registry.register(name, description, move || {
            Dataset::from_source(Box::new(source.clone()), seed)
        });
    }

    Ok(registry)
}
