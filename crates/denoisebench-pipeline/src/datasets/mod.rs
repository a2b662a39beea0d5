//! Concrete dataset sources.

mod directory;
mod nind;

pub use directory::{DirectoryDataset, SUPPORTED_EXTENSIONS};
pub use nind::{NaturalImageNoiseDataset, WikimediaFetch};
