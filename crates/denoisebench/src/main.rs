//! denoisebench: CLI for benchmarking image denoisers.
//!
//! Runs a set of denoisers over a dataset of clean/noisy image pairs and
//! scores every output with a set of metrics, writing one CSV row per
//! (image, denoiser, metric). Useful for:
//!
//! - Comparing denoising algorithms on the same images
//! - Measuring how each algorithm trades quality for time
//! - Inspecting the image sizes of a dataset before a run
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin denoisebench -- --list
//! cargo run --release --bin denoisebench -- --inspect --dataset holiday
//! cargo run --release --bin denoisebench -- \
//!     --dataset natural_images --denoisers all --metrics psnr ssim \
//!     --output results/nind.csv --save-images --parallel
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use denoisebench_export::ResultsStore;
use denoisebench_pipeline::{
    Anchor, Dataset, Evaluation, EvaluationConfig, Noiser, Registries, Registry, ResultRecord,
    RunSummary,
};
use tracing_subscriber::EnvFilter;

/// Benchmark image denoising algorithms.
///
/// Evaluates denoisers on a dataset of noisy/clean image pairs and
/// stores per-image metric values and timings in a CSV file.
#[derive(Parser)]
#[command(name = "denoisebench", version)]
struct Cli {
    /// List available datasets, denoisers, metrics, and noisers.
    #[arg(long)]
    list: bool,

    /// Print the image sizes of the dataset instead of running.
    #[arg(long)]
    inspect: bool,

    /// Dataset to evaluate on.
    #[arg(long)]
    dataset: Option<String>,

    /// Denoisers to evaluate, or `all`.
    #[arg(long, num_args = 1.., value_name = "DENOISER")]
    denoisers: Vec<String>,

    /// Metrics to compute, or `all`.
    #[arg(long, num_args = 1.., value_name = "METRIC")]
    metrics: Vec<String>,

    /// Synthesize noisy images with this noiser, ignoring any noisy
    /// images the dataset provides.
    #[arg(long)]
    noiser: Option<String>,

    /// Output CSV file for the results.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Crop every image to WIDTH x HEIGHT around its center.
    #[arg(long, num_args = 2, value_names = ["WIDTH", "HEIGHT"])]
    crop: Option<Vec<u32>>,

    /// Save reference, noisy, and denoised images next to the CSV file,
    /// in a directory named after it.
    #[arg(long)]
    save_images: bool,

    /// Run parallel-capable denoisers on a worker pool.
    #[arg(long)]
    parallel: bool,

    /// Images per batch (default: 1, or 8 with --parallel).
    #[arg(long, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    batch_size: Option<usize>,

    /// Worker pool size with --parallel (default: available cores).
    #[arg(long, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    workers: Option<usize>,

    /// Root directory of the datasets.
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Seed for the synthetic noisers, for reproducible runs.
    #[arg(long)]
    seed: Option<u64>,

    /// Log filter used when `RUST_LOG` is not set.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Full evaluation config as a JSON string.
    ///
    /// When provided, --parallel, --batch-size, --workers, and
    /// --save-images are ignored. The JSON must be a valid
    /// `EvaluationConfig` serialization.
    #[arg(long)]
    config_json: Option<String>,
}

/// Build an [`EvaluationConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and the
/// individual evaluation flags are ignored.
fn config_from_cli(cli: &Cli, images_dir: PathBuf) -> Result<EvaluationConfig, String> {
    if let Some(ref json) = cli.config_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"));
    }

    Ok(EvaluationConfig {
        parallel: cli.parallel,
        batch_size: cli.batch_size,
        workers: cli.workers,
        image_output: cli.save_images.then_some(images_dir),
        ..EvaluationConfig::default()
    })
}

/// Install a stderr `fmt` subscriber. `RUST_LOG` takes precedence over
/// `level`.
fn setup_logging(level: &str) -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| format!("Invalid log filter {level:?}: {e}"))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| format!("Logger initialization failed: {e}"))
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(msg) = setup_logging(&cli.log_level) {
        eprintln!("{msg}");
        return ExitCode::FAILURE;
    }

    let registries = match Registries::builtin(&cli.data_dir, cli.seed) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error reading {}: {e}", cli.data_dir.display());
            return ExitCode::FAILURE;
        }
    };

    if cli.list {
        print_available(&registries.datasets, false);
        print_available(&registries.denoisers, true);
        print_available(&registries.metrics, true);
        print_available(&registries.noisers, false);
        return ExitCode::SUCCESS;
    }

    let result = if cli.inspect {
        inspect(&cli, &registries)
    } else {
        run(&cli, &registries)
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("{msg}");
            ExitCode::FAILURE
        }
    }
}

/// Print every name of `registry` with its description.
fn print_available<T>(registry: &Registry<T>, allow_all: bool) {
    println!("Available {}:", registry.kind().plural());
    for (name, description) in registry.list_with_descriptions() {
        println!("  {name:<16} {description}");
    }
    if allow_all {
        println!("  {:<16} every {} above", denoisebench_pipeline::ALL, registry.kind());
    }
    println!();
}

/// Print the metadata report of the selected dataset, defaulting to the
/// first registered one.
fn inspect(cli: &Cli, registries: &Registries) -> Result<(), String> {
    let name = match &cli.dataset {
        Some(name) => name.clone(),
        None => registries
            .datasets
            .list()
            .first()
            .map(ToString::to_string)
            .ok_or("No datasets available")?,
    };
    let dataset = open_dataset(registries, &name)?;
    println!("{}", dataset.metadata().report(dataset.name()));
    Ok(())
}

fn open_dataset(registries: &Registries, name: &str) -> Result<Dataset, String> {
    registries
        .datasets
        .resolve(&[name.to_string()], false)
        .and_then(|_| registries.datasets.create(name))
        .map_err(|e| format!("Error opening dataset: {e}"))
}

/// Resolve every requested name, reporting all invalid ones before
/// failing.
fn resolve_all(cli: &Cli, registries: &Registries) -> Result<(Vec<String>, Vec<String>), String> {
    let mut errors = Vec::new();
    if let Some(name) = &cli.dataset
        && let Err(e) = registries.datasets.resolve(std::slice::from_ref(name), false)
    {
        errors.push(e.to_string());
    }
    if let Some(name) = &cli.noiser
        && let Err(e) = registries.noisers.resolve(std::slice::from_ref(name), false)
    {
        errors.push(e.to_string());
    }
    let denoisers = registries.denoisers.resolve(&cli.denoisers, true);
    let metrics = registries.metrics.resolve(&cli.metrics, true);
    errors.extend(denoisers.as_ref().err().map(ToString::to_string));
    errors.extend(metrics.as_ref().err().map(ToString::to_string));

    match (denoisers, metrics) {
        (Ok(denoisers), Ok(metrics)) if errors.is_empty() => Ok((denoisers, metrics)),
        _ => Err(errors.join("\n")),
    }
}

const MISSING_ARGUMENTS: &str =
    "You need to specify at least one denoiser, a dataset, one metric, and an output file.";

fn run(cli: &Cli, registries: &Registries) -> Result<(), String> {
    let (Some(dataset_name), Some(output)) = (&cli.dataset, &cli.output) else {
        return Err(MISSING_ARGUMENTS.to_string());
    };
    if cli.denoisers.is_empty() || cli.metrics.is_empty() {
        return Err(MISSING_ARGUMENTS.to_string());
    }

    let (denoiser_names, metric_names) = resolve_all(cli, registries)?;

    let mut dataset = open_dataset(registries, dataset_name)?;
    if let Some(crop) = &cli.crop
        && let [width, height] = crop[..]
    {
        dataset
            .crop(width, height, Anchor::CENTER)
            .map_err(|e| format!("Error cropping: {e}"))?;
    }
    if let Some(name) = &cli.noiser {
        let noiser: Arc<dyn Noiser> = registries
            .noisers
            .create(name)
            .map_err(|e| format!("Error creating noiser: {e}"))?
            .into();
        dataset.set_noiser(noiser);
    }

    let denoisers = registries
        .denoisers
        .create_all(&denoiser_names)
        .map_err(|e| format!("Error creating denoisers: {e}"))?;
    let metrics = registries
        .metrics
        .create_all(&metric_names)
        .map_err(|e| format!("Error creating metrics: {e}"))?;

    let mut store = ResultsStore::new(output).with_echo(true);
    let config = config_from_cli(cli, store.images_dir())?;

    eprintln!("Dataset: {} ({} images)", dataset.name(), dataset.len());
    eprintln!("Denoisers: {}", denoiser_names.join(", "));
    eprintln!("Metrics: {}", metric_names.join(", "));
    eprintln!("Config: {config:#?}");
    eprintln!();

    let summary = Evaluation::new(&dataset, &denoisers, &metrics, config)
        .run(&mut store)
        .map_err(|e| format!("Evaluation error: {e}"))?;

    print_summary(&summary, store.records(), store.path());
    Ok(())
}

/// Mean value and mean time of every (denoiser, metric) pair, skipping
/// failure rows.
#[allow(clippy::cast_precision_loss)]
fn print_summary(summary: &RunSummary, records: &[ResultRecord], output: &Path) {
    println!();
    println!("Summary ({} images, {} batches)\n{}", summary.items, summary.batches, "=".repeat(60));
    println!(
        "Work units: {}/{}  failures: {}{}",
        summary.completed_units,
        summary.total_units,
        summary.failures,
        if summary.cancelled { "  (cancelled)" } else { "" },
    );

    let mut groups: BTreeMap<(&str, &str), (f64, f64, usize)> = BTreeMap::new();
    for record in records.iter().filter(|r| !r.is_failure()) {
        let entry = groups
            .entry((record.denoiser.as_str(), record.metric.as_str()))
            .or_default();
        entry.0 += record.value;
        entry.1 += record.duration.as_secs_f64();
        entry.2 += 1;
    }

    println!();
    println!("{:<16} {:<10} {:>12} {:>12}", "Denoiser", "Metric", "Mean", "Mean (s)");
    println!("{}", "-".repeat(60));
    for ((denoiser, metric), (value, time, count)) in &groups {
        let n = *count as f64;
        println!("{denoiser:<16} {metric:<10} {:>12.4} {:>12.4}", value / n, time / n);
    }
    println!();
    println!("Results written to {}", output.display());
}
