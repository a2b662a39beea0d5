//! denoisebench-pipeline: Benchmark orchestration for image denoisers.
//!
//! Loads datasets of clean/noisy image pairs, runs registered denoisers
//! on the noisy images, and scores the results with registered metrics:
//!
//! registry lookup -> dataset open (fetch, size check, crop) ->
//! per-batch baseline metrics -> sequential and pooled denoisers ->
//! metrics -> result sink.
//!
//! Algorithm bodies are opaque behind the [`Denoiser`], [`Metric`], and
//! [`Noiser`] traits. Result persistence is left to a [`ResultSink`]
//! implementation; see `denoisebench-export` for the CSV/JSON store.

pub mod capability;
pub mod crop;
pub mod dataset;
pub mod datasets;
pub mod denoise;
pub mod evaluate;
pub mod fetch;
pub mod metric;
pub mod noise;
pub mod registry;
pub mod types;

pub use capability::{Denoiser, Metric, Noiser, ParamDomain, ParamValue, ParameterSpace, Parameters};
pub use crop::{Anchor, CropWindow};
pub use dataset::{Dataset, DatasetSource, Metadata};
pub use evaluate::{
    CancelToken, Clock, Evaluation, EvaluationConfig, ResultSink, RunMetadata, RunSummary, SinkError, StdClock,
};
pub use registry::{ALL, Registries, Registry};
pub use types::{
    AlgorithmError, BASELINE_DENOISER, BenchError, CapabilityKind, Dimensions, ImageItem, ResultRecord, RgbImage,
    Triplet,
};
