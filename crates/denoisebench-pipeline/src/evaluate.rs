//! The batched evaluation engine.
//!
//! One run walks a [`Dataset`] in batches. For every batch:
//!
//! 1. baseline metrics (reference vs. noisy) are recorded for each item
//! 2. denoisers are split into sequential and parallel-capable sets
//! 3. sequential denoisers run inline on every item
//! 4. every `(item, parallel denoiser)` pair of the batch becomes one job
//!    on the worker pool; the batch waits for all of them
//! 5. every denoised image is scored with every metric
//! 6. images are written out when an output directory is configured
//! 7. progress advances by `items * denoisers` work units
//!
//! Each job result carries the index of the item and denoiser it came
//! from, so results are re-associated by identity regardless of the
//! order in which the pool completes them. A denoiser or metric that
//! fails (or panics) produces NaN rows for that pair and the run goes on.
//!
//! Only the orchestrating thread touches the [`ResultSink`], and only
//! after the batch's parallel work has joined.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use image::RgbImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::capability::{Denoiser, Metric, Parameters, run_denoiser, run_metric};
use crate::dataset::Dataset;
use crate::types::{AlgorithmError, BASELINE_DENOISER, BenchError, Dimensions, ImageItem, ResultRecord};

/// Knobs of one evaluation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Run parallel-capable denoisers on a multi-threaded worker pool.
    /// When `false` the pool has a single worker.
    pub parallel: bool,

    /// Items per batch. `None` picks [`DEFAULT_SEQUENTIAL_BATCH_SIZE`]
    /// or [`DEFAULT_PARALLEL_BATCH_SIZE`] depending on `parallel`.
    ///
    /// [`DEFAULT_SEQUENTIAL_BATCH_SIZE`]: Self::DEFAULT_SEQUENTIAL_BATCH_SIZE
    /// [`DEFAULT_PARALLEL_BATCH_SIZE`]: Self::DEFAULT_PARALLEL_BATCH_SIZE
    pub batch_size: Option<usize>,

    /// Worker pool size in parallel mode. `None` uses every available
    /// core.
    pub workers: Option<usize>,

    /// Directory receiving `<item>_<role>.<ext>` images, if any.
    pub image_output: Option<PathBuf>,

    /// File extension (and therefore encoding) of written images.
    pub image_format: String,
}

impl EvaluationConfig {
    pub const DEFAULT_SEQUENTIAL_BATCH_SIZE: usize = 1;
    pub const DEFAULT_PARALLEL_BATCH_SIZE: usize = 8;
    pub const DEFAULT_IMAGE_FORMAT: &'static str = "png";

    /// Batch size actually used.
    #[must_use]
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.unwrap_or(if self.parallel {
            Self::DEFAULT_PARALLEL_BATCH_SIZE
        } else {
            Self::DEFAULT_SEQUENTIAL_BATCH_SIZE
        })
    }

    /// Worker count handed to the pool builder; 0 lets rayon use every
    /// available core.
    fn pool_threads(&self) -> usize {
        if self.parallel {
            self.workers.unwrap_or(0)
        } else {
            1
        }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::InvalidConfig`] for a zero batch size, a
    /// zero worker count, or an empty image format.
    pub fn validate(&self) -> Result<(), BenchError> {
        if self.batch_size == Some(0) {
            return Err(BenchError::InvalidConfig("batch size must be at least 1".to_string()));
        }
        if self.workers == Some(0) {
            return Err(BenchError::InvalidConfig("worker count must be at least 1".to_string()));
        }
        if self.image_format.is_empty() {
            return Err(BenchError::InvalidConfig("image format must not be empty".to_string()));
        }
        Ok(())
    }
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            parallel: false,
            batch_size: None,
            workers: None,
            image_output: None,
            image_format: Self::DEFAULT_IMAGE_FORMAT.to_string(),
        }
    }
}

/// Abstraction over time measurement, so tests can use fixed durations.
pub trait Clock: Sync {
    /// Opaque point in time.
    type Instant: Send;

    /// The current instant.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// [`Clock`] implementation backed by [`std::time::Instant`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}

/// Cooperative cancellation flag, checked between batches.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A token that has not been cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the run to stop before its next batch.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Error type sinks report; wrapped into [`BenchError::Sink`].
pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// Destination of run metadata and result records.
pub trait ResultSink {
    /// Record the run configuration before any result is produced.
    ///
    /// # Errors
    ///
    /// Returns the sink's storage error.
    fn snapshot(&mut self, metadata: &RunMetadata) -> Result<(), SinkError> {
        let _ = metadata;
        Ok(())
    }

    /// Append one record.
    ///
    /// # Errors
    ///
    /// Returns the sink's storage error.
    fn append(&mut self, record: ResultRecord) -> Result<(), SinkError>;
}

impl ResultSink for Vec<ResultRecord> {
    fn append(&mut self, record: ResultRecord) -> Result<(), SinkError> {
        self.push(record);
        Ok(())
    }
}

/// Full configuration of a run, written before any result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Dataset name.
    pub dataset: String,
    /// Active synthetic noiser, or [`BASELINE_DENOISER`] when the
    /// dataset's own noisy images are used.
    pub noiser: String,
    /// Denoiser name to its parameter values.
    pub denoisers: BTreeMap<String, Parameters>,
    /// Metric names, in evaluation order.
    pub metrics: Vec<String>,
    /// Crop window size, if any.
    pub crop: Option<Dimensions>,
}

impl RunMetadata {
    /// Describe a run of `denoisers` and `metrics` over `dataset`.
    #[must_use]
    pub fn new(dataset: &Dataset, denoisers: &[Box<dyn Denoiser>], metrics: &[Box<dyn Metric>]) -> Self {
        Self {
            dataset: dataset.name().to_string(),
            noiser: dataset
                .noiser_name()
                .unwrap_or(BASELINE_DENOISER)
                .to_string(),
            denoisers: denoisers
                .iter()
                .map(|d| (d.name().to_string(), d.parameters()))
                .collect(),
            metrics: metrics.iter().map(|m| m.name().to_string()).collect(),
            crop: dataset.crop_window().map(|w| w.dimensions()),
        }
    }
}

/// Outcome counters of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Items processed.
    pub items: usize,
    /// Batches processed.
    pub batches: usize,
    /// `items * denoisers` for the whole dataset.
    pub total_units: usize,
    /// Denoiser invocations finished (successfully or not).
    pub completed_units: usize,
    /// Contained denoiser and metric failures.
    pub failures: usize,
    /// Whether the run stopped early on request.
    pub cancelled: bool,
}

/// Result of one `(item, denoiser)` invocation, tagged with its origin.
struct DenoiseOutcome {
    item: usize,
    denoiser: usize,
    duration: Duration,
    result: Result<RgbImage, AlgorithmError>,
}

/// A configured evaluation of denoisers and metrics over a dataset.
pub struct Evaluation<'a, C: Clock = StdClock> {
    dataset: &'a Dataset,
    denoisers: &'a [Box<dyn Denoiser>],
    metrics: &'a [Box<dyn Metric>],
    config: EvaluationConfig,
    clock: C,
    cancel: CancelToken,
}

impl<'a> Evaluation<'a, StdClock> {
    /// Evaluate `denoisers` on `dataset`, scoring with `metrics`.
    #[must_use]
    pub fn new(
        dataset: &'a Dataset,
        denoisers: &'a [Box<dyn Denoiser>],
        metrics: &'a [Box<dyn Metric>],
        config: EvaluationConfig,
    ) -> Self {
        Self {
            dataset,
            denoisers,
            metrics,
            config,
            clock: StdClock,
            cancel: CancelToken::new(),
        }
    }
}

impl<'a, C: Clock> Evaluation<'a, C> {
    /// Measure denoiser durations with `clock`.
    #[must_use]
    pub fn with_clock<D: Clock>(self, clock: D) -> Evaluation<'a, D> {
        Evaluation {
            dataset: self.dataset,
            denoisers: self.denoisers,
            metrics: self.metrics,
            config: self.config,
            clock,
            cancel: self.cancel,
        }
    }

    /// Stop between batches once `token` is cancelled.
    #[must_use]
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// The run configuration.
    #[must_use]
    pub const fn config(&self) -> &EvaluationConfig {
        &self.config
    }

    /// Metadata describing this run.
    #[must_use]
    pub fn metadata(&self) -> RunMetadata {
        RunMetadata::new(self.dataset, self.denoisers, self.metrics)
    }

    /// Execute the run, streaming metadata and records into `sink`.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration, dataset load errors, image write
    /// errors, and sink errors. Denoiser and metric failures are recorded
    /// as NaN rows instead.
    pub fn run(&self, sink: &mut dyn ResultSink) -> Result<RunSummary, BenchError> {
        self.config.validate()?;
        if self.metrics.is_empty() {
            return Err(BenchError::InvalidConfig("at least one metric is required".to_string()));
        }

        sink.snapshot(&self.metadata()).map_err(BenchError::Sink)?;

        if let Some(dir) = &self.config.image_output {
            fs::create_dir_all(dir)?;
        }

        let (parallel, sequential): (Vec<usize>, Vec<usize>) =
            (0..self.denoisers.len()).partition(|&d| self.denoisers[d].parallel());

        let pool = if parallel.is_empty() {
            None
        } else {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(self.config.pool_threads())
                    .build()?,
            )
        };

        let batch_size = self.config.effective_batch_size();
        let mut summary = RunSummary {
            total_units: self.dataset.len() * self.denoisers.len(),
            ..RunSummary::default()
        };

        tracing::info!(
            dataset = self.dataset.name(),
            items = self.dataset.len(),
            denoisers = self.denoisers.len(),
            metrics = self.metrics.len(),
            batch_size,
            "starting evaluation",
        );

        for start in (0..self.dataset.len()).step_by(batch_size) {
            if self.cancel.is_cancelled() {
                tracing::info!(completed = summary.completed_units, "evaluation cancelled");
                summary.cancelled = true;
                break;
            }

            let end = (start + batch_size).min(self.dataset.len());
            let items = (start..end)
                .map(|i| self.dataset.item(i))
                .collect::<Result<Vec<_>, _>>()?;

            for item in &items {
                for metric in self.metrics {
                    let value = self.score(metric.as_ref(), item, BASELINE_DENOISER, &item.noisy, &mut summary);
                    sink.append(record(item, BASELINE_DENOISER, metric.as_ref(), value, Duration::ZERO))
                        .map_err(BenchError::Sink)?;
                }
            }

            let mut outcomes: Vec<DenoiseOutcome> = items
                .iter()
                .enumerate()
                .flat_map(|(i, item)| sequential.iter().map(move |&d| (i, d, item)))
                .map(|(i, d, item)| self.denoise(i, d, item))
                .collect();

            if let Some(pool) = &pool {
                let jobs: Vec<(usize, usize)> = (0..items.len())
                    .flat_map(|i| parallel.iter().map(move |&d| (i, d)))
                    .collect();
                let mut finished: Vec<DenoiseOutcome> = pool.install(|| {
                    jobs.par_iter()
                        .map(|&(i, d)| self.denoise(i, d, &items[i]))
                        .collect()
                });
                finished.sort_by_key(|o| (o.item, o.denoiser));
                outcomes.extend(finished);
            }

            for outcome in &outcomes {
                let item = &items[outcome.item];
                let denoiser = self.denoisers[outcome.denoiser].name();
                match &outcome.result {
                    Ok(denoised) => {
                        for metric in self.metrics {
                            let value = self.score(metric.as_ref(), item, denoiser, denoised, &mut summary);
                            sink.append(record(item, denoiser, metric.as_ref(), value, outcome.duration))
                                .map_err(BenchError::Sink)?;
                        }
                    }
                    Err(e) => {
                        tracing::error!(image = %item.name, denoiser, error = %e, "denoiser failed");
                        summary.failures += 1;
                        for metric in self.metrics {
                            sink.append(record(item, denoiser, metric.as_ref(), f64::NAN, outcome.duration))
                                .map_err(BenchError::Sink)?;
                        }
                    }
                }
            }

            if let Some(dir) = &self.config.image_output {
                self.save_images(dir, &items, &outcomes)?;
            }

            summary.items += items.len();
            summary.batches += 1;
            summary.completed_units += items.len() * self.denoisers.len();
            tracing::info!(
                completed = summary.completed_units,
                total = summary.total_units,
                "batch {} done",
                summary.batches,
            );
        }

        Ok(summary)
    }

    /// Run denoiser `d` on item `i`, timing the call.
    fn denoise(&self, item: usize, denoiser: usize, image: &ImageItem) -> DenoiseOutcome {
        let start = self.clock.now();
        let result = run_denoiser(self.denoisers[denoiser].as_ref(), &image.noisy);
        let duration = self.clock.elapsed(&start);
        DenoiseOutcome {
            item,
            denoiser,
            duration,
            result,
        }
    }

    /// Score `test` against the item's reference, NaN on failure.
    fn score(
        &self,
        metric: &dyn Metric,
        item: &ImageItem,
        denoiser: &str,
        test: &RgbImage,
        summary: &mut RunSummary,
    ) -> f64 {
        run_metric(metric, &item.reference, test).unwrap_or_else(|e| {
            tracing::error!(image = %item.name, denoiser, metric = metric.name(), error = %e, "metric failed");
            summary.failures += 1;
            f64::NAN
        })
    }

    /// Write reference, noisy, and every denoised image of the batch.
    fn save_images(&self, dir: &Path, items: &[ImageItem], outcomes: &[DenoiseOutcome]) -> Result<(), BenchError> {
        let ext = &self.config.image_format;
        for item in items {
            item.reference
                .save(dir.join(format!("{}_reference.{ext}", item.name)))?;
            item.noisy.save(dir.join(format!("{}_noisy.{ext}", item.name)))?;
        }
        for outcome in outcomes {
            if let Ok(denoised) = &outcome.result {
                let item = &items[outcome.item];
                let role = self.denoisers[outcome.denoiser].name();
                denoised.save(dir.join(format!("{}_{role}.{ext}", item.name)))?;
            }
        }
        Ok(())
    }
}

fn record(item: &ImageItem, denoiser: &str, metric: &dyn Metric, value: f64, duration: Duration) -> ResultRecord {
    ResultRecord {
        image: item.name.clone(),
        denoiser: denoiser.to_string(),
        metric: metric.name().to_string(),
        value,
        duration,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::thread;

    use super::*;
    use crate::crop::Anchor;
    use crate::dataset::tests::{ListSource, write_png};
    use crate::types::Triplet;

    /// Clock that reports the same duration for every measurement.
    struct FixedClock(Duration);

    impl Clock for FixedClock {
        type Instant = ();

        fn now(&self) {}

        fn elapsed(&self, _since: &()) -> Duration {
            self.0
        }
    }

    /// Returns its input unchanged, optionally sleeping longer for
    /// darker images so parallel completions come back out of order.
    struct Identity {
        parallel: bool,
        stagger: bool,
    }

    impl Identity {
        const fn new(parallel: bool, stagger: bool) -> Self {
            Self { parallel, stagger }
        }
    }

    impl Denoiser for Identity {
        fn name(&self) -> &str {
            if self.parallel { "identity_par" } else { "identity" }
        }

        fn description(&self) -> &str {
            "returns its input"
        }

        fn parallel(&self) -> bool {
            self.parallel
        }

        fn denoise(&self, image: &RgbImage) -> Result<RgbImage, AlgorithmError> {
            if self.stagger {
                let value = u64::from(image.get_pixel(0, 0).0[0]);
                thread::sleep(Duration::from_millis(20u64.saturating_sub(value)));
            }
            Ok(image.clone())
        }
    }

    struct Failing;

    impl Denoiser for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn description(&self) -> &str {
            "always panics"
        }

        fn denoise(&self, _image: &RgbImage) -> Result<RgbImage, AlgorithmError> {
            panic!("denoiser exploded");
        }
    }

    /// Number of differing pixels.
    struct PixelDifference;

    impl Metric for PixelDifference {
        fn name(&self) -> &str {
            "pixeldiff"
        }

        fn description(&self) -> &str {
            "count of differing pixels"
        }

        #[allow(clippy::cast_precision_loss)]
        fn compare(&self, reference: &RgbImage, test: &RgbImage) -> Result<f64, AlgorithmError> {
            Ok(reference
                .pixels()
                .zip(test.pixels())
                .filter(|(a, b)| a != b)
                .count() as f64)
        }
    }

    /// Value of the test image's first sample, identifying its origin.
    struct Tag;

    impl Metric for Tag {
        fn name(&self) -> &str {
            "tag"
        }

        fn description(&self) -> &str {
            "first sample of the test image"
        }

        fn compare(&self, _reference: &RgbImage, test: &RgbImage) -> Result<f64, AlgorithmError> {
            Ok(f64::from(test.get_pixel(0, 0).0[0]))
        }
    }

    fn boxed_metrics<M: Metric + 'static>(metric: M) -> Vec<Box<dyn Metric>> {
        vec![Box::new(metric)]
    }

    /// `count` items; item `i` has reference and noisy images of value `i`.
    fn tagged_dataset(dir: &Path, count: u8) -> Dataset {
        let triplets = (0..count)
            .map(|i| {
                let name = format!("img{i:02}");
                let reference = write_png(dir, &format!("{name}_ref"), 8, 8, i);
                let noisy = write_png(dir, &format!("{name}_noisy"), 8, 8, i);
                Triplet::new(name, reference, Some(noisy))
            })
            .collect();
        Dataset::open(ListSource { triplets }).unwrap()
    }

    #[test]
    fn config_defaults() {
        let config = EvaluationConfig::default();
        assert_eq!(config.effective_batch_size(), 1);
        let parallel = EvaluationConfig {
            parallel: true,
            ..EvaluationConfig::default()
        };
        assert_eq!(parallel.effective_batch_size(), 8);
        assert_eq!(config.image_format, "png");
    }

    #[test]
    fn config_json_fills_missing_fields() {
        let config: EvaluationConfig = serde_json::from_str(r#"{"parallel":true,"workers":4}"#).unwrap();
        assert!(config.parallel);
        assert_eq!(config.workers, Some(4));
        assert_eq!(config.image_format, "png");
        assert_eq!(config.effective_batch_size(), 8);
    }

    #[test]
    fn zero_batch_size_rejected() {
        let config = EvaluationConfig {
            batch_size: Some(0),
            ..EvaluationConfig::default()
        };
        assert!(matches!(config.validate(), Err(BenchError::InvalidConfig(_))));
    }

    #[test]
    fn end_to_end_auto_crop_and_four_rows() {
        let dir = tempfile::tempdir().unwrap();
        let triplets = vec![
            Triplet::new("img1", write_png(dir.path(), "img1", 100, 100, 50), None),
            Triplet::new("img2", write_png(dir.path(), "img2", 120, 100, 80), None),
        ];
        let dataset = Dataset::open(ListSource { triplets }).unwrap();
        assert_eq!(dataset.metadata().min_width(), 100);

        let denoisers: Vec<Box<dyn Denoiser>> = vec![Box::new(Identity::new(false, false))];
        let metrics = boxed_metrics(PixelDifference);
        let mut records: Vec<ResultRecord> = Vec::new();
        let summary = Evaluation::new(&dataset, &denoisers, &metrics, EvaluationConfig::default())
            .run(&mut records)
            .unwrap();

        let rows: Vec<(&str, &str, &str)> = records
            .iter()
            .map(|r| (r.image.as_str(), r.denoiser.as_str(), r.metric.as_str()))
            .collect();
        assert_eq!(
            rows,
            vec![
                ("img1", "none", "pixeldiff"),
                ("img1", "identity", "pixeldiff"),
                ("img2", "none", "pixeldiff"),
                ("img2", "identity", "pixeldiff"),
            ]
        );
        for item in &dataset {
            assert_eq!(Dimensions::of(&item.unwrap().reference), Dimensions::new(100, 100));
        }
        assert!(records.iter().filter(|r| r.is_baseline()).all(|r| r.duration == Duration::ZERO));
        assert_eq!(summary.total_units, 2);
        assert_eq!(summary.completed_units, 2);
        assert_eq!(summary.batches, 2);
        assert_eq!(summary.failures, 0);
    }

    #[test]
    fn parallel_rows_bind_to_their_items_for_any_pool_size() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = tagged_dataset(dir.path(), 10);
        let metrics = boxed_metrics(Tag);

        for workers in [Some(1), Some(4), None] {
            let denoisers: Vec<Box<dyn Denoiser>> = vec![Box::new(Identity::new(true, true))];
            let config = EvaluationConfig {
                parallel: true,
                batch_size: Some(8),
                workers,
                ..EvaluationConfig::default()
            };
            let mut records: Vec<ResultRecord> = Vec::new();
            let summary = Evaluation::new(&dataset, &denoisers, &metrics, config)
                .run(&mut records)
                .unwrap();

            let denoised: Vec<&ResultRecord> = records.iter().filter(|r| !r.is_baseline()).collect();
            assert_eq!(denoised.len(), 10, "workers {workers:?}");
            for record in denoised {
                let expected: f64 = record.image[3..].parse().unwrap();
                assert!(
                    (record.value - expected).abs() < f64::EPSILON,
                    "{} got {}",
                    record.image,
                    record.value
                );
            }
            assert_eq!(summary.batches, 2);
            assert_eq!(summary.completed_units, 10);
        }
    }

    #[test]
    fn batch_records_baseline_then_sequential_then_parallel() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = tagged_dataset(dir.path(), 3);
        let denoisers: Vec<Box<dyn Denoiser>> = vec![
            Box::new(Identity::new(true, false)),
            Box::new(Identity::new(false, false)),
        ];
        let metrics = boxed_metrics(Tag);
        let config = EvaluationConfig {
            parallel: true,
            batch_size: Some(3),
            ..EvaluationConfig::default()
        };
        let mut records: Vec<ResultRecord> = Vec::new();
        Evaluation::new(&dataset, &denoisers, &metrics, config)
            .run(&mut records)
            .unwrap();

        let order: Vec<(&str, &str)> = records
            .iter()
            .map(|r| (r.image.as_str(), r.denoiser.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("img00", "none"),
                ("img01", "none"),
                ("img02", "none"),
                ("img00", "identity"),
                ("img01", "identity"),
                ("img02", "identity"),
                ("img00", "identity_par"),
                ("img01", "identity_par"),
                ("img02", "identity_par"),
            ]
        );
    }

    #[test]
    fn failing_denoiser_is_contained() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = tagged_dataset(dir.path(), 2);
        let denoisers: Vec<Box<dyn Denoiser>> =
            vec![Box::new(Failing), Box::new(Identity::new(false, false))];
        let metrics = boxed_metrics(Tag);
        let mut records: Vec<ResultRecord> = Vec::new();
        let summary = Evaluation::new(&dataset, &denoisers, &metrics, EvaluationConfig::default())
            .run(&mut records)
            .unwrap();

        assert_eq!(records.len(), 6);
        let failed: Vec<&ResultRecord> = records.iter().filter(|r| r.is_failure()).collect();
        assert_eq!(failed.len(), 2);
        assert!(failed.iter().all(|r| r.denoiser == "failing"));
        assert_eq!(summary.failures, 2);
        assert_eq!(summary.completed_units, 4);
    }

    #[test]
    fn durations_come_from_the_clock() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = tagged_dataset(dir.path(), 2);
        let denoisers: Vec<Box<dyn Denoiser>> = vec![Box::new(Identity::new(false, false))];
        let metrics = boxed_metrics(Tag);
        let mut records: Vec<ResultRecord> = Vec::new();
        Evaluation::new(&dataset, &denoisers, &metrics, EvaluationConfig::default())
            .with_clock(FixedClock(Duration::from_millis(1500)))
            .run(&mut records)
            .unwrap();

        for record in &records {
            let expected = if record.is_baseline() {
                Duration::ZERO
            } else {
                Duration::from_millis(1500)
            };
            assert_eq!(record.duration, expected);
        }
    }

    #[test]
    fn cancelled_run_stops_before_first_batch() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = tagged_dataset(dir.path(), 4);
        let denoisers: Vec<Box<dyn Denoiser>> = vec![Box::new(Identity::new(false, false))];
        let metrics = boxed_metrics(Tag);
        let token = CancelToken::new();
        token.cancel();

        let mut records: Vec<ResultRecord> = Vec::new();
        let summary = Evaluation::new(&dataset, &denoisers, &metrics, EvaluationConfig::default())
            .with_cancel_token(token)
            .run(&mut records)
            .unwrap();
        assert!(summary.cancelled);
        assert!(records.is_empty());
        assert_eq!(summary.completed_units, 0);
    }

    /// Sink that cancels the run after the first record arrives.
    struct CancelAfterFirst {
        token: CancelToken,
        records: Vec<ResultRecord>,
    }

    impl ResultSink for CancelAfterFirst {
        fn append(&mut self, record: ResultRecord) -> Result<(), SinkError> {
            self.token.cancel();
            self.records.push(record);
            Ok(())
        }
    }

    #[test]
    fn cancellation_finishes_the_current_batch() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = tagged_dataset(dir.path(), 4);
        let denoisers: Vec<Box<dyn Denoiser>> = vec![Box::new(Identity::new(false, false))];
        let metrics = boxed_metrics(Tag);
        let token = CancelToken::new();
        let mut sink = CancelAfterFirst {
            token: token.clone(),
            records: Vec::new(),
        };
        let config = EvaluationConfig {
            batch_size: Some(2),
            ..EvaluationConfig::default()
        };
        let summary = Evaluation::new(&dataset, &denoisers, &metrics, config)
            .with_cancel_token(token)
            .run(&mut sink)
            .unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.batches, 1);
        assert_eq!(sink.records.len(), 4);
    }

    #[test]
    fn images_are_written_per_role() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("results");
        let dataset = tagged_dataset(dir.path(), 1);
        let denoisers: Vec<Box<dyn Denoiser>> =
            vec![Box::new(Identity::new(false, false)), Box::new(Failing)];
        let metrics = boxed_metrics(Tag);
        let config = EvaluationConfig {
            image_output: Some(out.clone()),
            ..EvaluationConfig::default()
        };
        Evaluation::new(&dataset, &denoisers, &metrics, config)
            .run(&mut Vec::<ResultRecord>::new())
            .unwrap();

        for role in ["reference", "noisy", "identity"] {
            assert!(out.join(format!("img00_{role}.png")).exists(), "{role}");
        }
        assert!(!out.join("img00_failing.png").exists());
    }

    #[test]
    fn metadata_snapshot_describes_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut dataset = tagged_dataset(dir.path(), 2);
        dataset.crop(4, 6, Anchor::CENTER).unwrap();
        let denoisers: Vec<Box<dyn Denoiser>> = vec![Box::new(crate::denoise::BoxBlur::default())];
        let metrics = boxed_metrics(Tag);
        let metadata = Evaluation::new(&dataset, &denoisers, &metrics, EvaluationConfig::default()).metadata();

        assert_eq!(metadata.dataset, "list");
        assert_eq!(metadata.noiser, "none");
        assert_eq!(metadata.metrics, vec!["tag"]);
        assert_eq!(metadata.crop, Some(Dimensions::new(4, 6)));
        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(json["denoisers"]["blur"]["kernel_size"], 5);
        assert_eq!(json["crop"]["width"], 4);
    }

    #[test]
    fn missing_metrics_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = tagged_dataset(dir.path(), 1);
        let result =
            Evaluation::new(&dataset, &[], &[], EvaluationConfig::default()).run(&mut Vec::<ResultRecord>::new());
        assert!(matches!(result, Err(BenchError::InvalidConfig(_))));
    }
}
