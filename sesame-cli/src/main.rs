//! sesame command-line interface.
//!
//! Indexes subruns by instrument configuration, merges them into
//! per-spin-state artifacts, and extracts spectra from event files.
#![allow(
    clippy::uninlined_format_args,
    clippy::cast_precision_loss,
    clippy::too_many_lines
)]

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use sesame_core::projection::{
    flipping_ratio_measurement, integrate, normalized_with_errors, polarization_with_errors,
    rebin, total_intensity,
};
use sesame_core::{
    ConfigurationKey, KeyField, KeyFilter, MonitorFormat, PixelMask, ReductionConfig, Region,
    RunSet, SpinState,
};
use sesame_io::{read_mask, read_monitor, EventFileReader};
use sesame_runs::{
    ConfigurationIndexer, ConfigurationSource, IndexReport, ManifestSource, MergeOptions,
    MergeReport, RunAggregator, RunInfoSource, SkippedEntry,
};
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    SesameIo(#[from] sesame_io::Error),

    #[error("Core error: {0}")]
    Core(#[from] sesame_core::Error),

    #[error("{0}")]
    Runs(#[from] sesame_runs::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Usage(String),
}

/// Built-in configuration profiles.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Profile {
    /// Layout A events, 75 MHz ticks, text monitor files
    Legacy,
    /// Layout B events, 100 ns ticks, binary monitor files
    Current,
}

/// Which spin-state buckets to merge.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum StateArg {
    Up,
    Down,
    Combined,
    All,
}

impl StateArg {
    fn matches(self, state: SpinState) -> bool {
        match self {
            StateArg::Up => state == SpinState::Up,
            StateArg::Down => state == SpinState::Down,
            StateArg::Combined => state == SpinState::Combined,
            StateArg::All => true,
        }
    }
}

/// Spin-echo event reduction and run merging.
#[derive(Parser)]
#[command(name = "sesame")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON reduction configuration
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Built-in profile, used when no configuration file is given
    #[arg(long, value_enum, default_value = "current", global = true)]
    profile: Profile,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Where subrun metadata comes from.
#[derive(Args, Debug)]
struct SourceArgs {
    /// Manifest file(s)
    #[arg(long)]
    manifest: Vec<PathBuf>,

    /// Data directory holding <prefix>_<run> run directories
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// First run number
    #[arg(long, requires = "data_dir")]
    first: Option<u32>,

    /// Last run number, inclusive (defaults to --first)
    #[arg(long, requires = "first")]
    last: Option<u32>,

    /// Run numbers to leave out
    #[arg(long, value_delimiter = ',')]
    skip: Vec<u32>,

    /// Run directory prefix
    #[arg(long, default_value = sesame_runs::DEFAULT_PREFIX)]
    prefix: String,

    /// Only index subruns whose floored Triangle1 current equals this value
    #[arg(long)]
    triangle1: Option<i64>,
}

/// Pixel selection for spectra.
#[derive(Args, Debug)]
struct RegionArgs {
    /// Region as xmin,ymin,xmax,ymax (half-open); whole image if omitted
    #[arg(long, value_delimiter = ',', num_args = 4)]
    region: Option<Vec<usize>>,

    /// Pixel mask file (rows of 0/1)
    #[arg(long)]
    mask: Option<PathBuf>,

    /// Monitor files are merge artifacts (binary) rather than raw subrun monitors
    #[arg(long)]
    merged: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Index subruns by configuration and print the buckets
    Index {
        #[command(flatten)]
        source: SourceArgs,

        /// Print the index as JSON
        #[arg(long)]
        json: bool,
    },

    /// Merge indexed subruns into per-spin-state artifacts
    Merge {
        #[command(flatten)]
        source: SourceArgs,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Artifact base name
        #[arg(long, default_value = "Merged")]
        base_name: String,

        /// Artifact name suffix
        #[arg(long, default_value = "")]
        suffix: String,

        /// Spin states to merge
        #[arg(long, value_enum, default_value = "all")]
        state: StateArg,

        /// Merge one group per value of this field (e.g. Phase, Triangle1)
        #[arg(long)]
        scan: Option<String>,

        /// Minimum monitor rate in counts/s (overrides the configuration)
        #[arg(long)]
        min_rate: Option<f64>,

        /// Also write a text summary with this run label
        #[arg(long)]
        summary: Option<String>,

        /// Write the merge reports as JSON to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Print the normalized wavelength spectrum of an event file
    Spectrum {
        /// Event file
        input: PathBuf,

        /// Monitor file for normalization
        #[arg(short, long)]
        monitor: PathBuf,

        #[command(flatten)]
        region: RegionArgs,

        /// Sum this many adjacent bins
        #[arg(long, default_value = "1")]
        rebin: usize,
    },

    /// Print polarization and flipping ratio from an up/down pair
    Polarization {
        /// Up event file
        #[arg(long)]
        up: PathBuf,

        /// Up monitor file
        #[arg(long)]
        up_monitor: PathBuf,

        /// Down event file
        #[arg(long)]
        down: PathBuf,

        /// Down monitor file
        #[arg(long)]
        down_monitor: PathBuf,

        #[command(flatten)]
        region: RegionArgs,

        /// First wavelength bin of the integration range
        #[arg(long, default_value = "0")]
        from_bin: usize,

        /// End (exclusive) of the integration range; all bins if omitted
        #[arg(long)]
        to_bin: Option<usize>,
    },

    /// Show information about an event file
    Info {
        /// Event file
        input: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if let Err(e) = run(cli) {
        log::error!("{e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => ReductionConfig::from_file(path)?,
        None => match cli.profile {
            Profile::Legacy => ReductionConfig::legacy(),
            Profile::Current => ReductionConfig::current(),
        },
    };

    match cli.command {
        Commands::Index { source, json } => {
            let report = index(&config, &source)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&IndexJson::new(&report))?);
            } else {
                print_index(&report.run_set, config.flipper_field);
            }
        }

        Commands::Merge {
            source,
            output,
            base_name,
            suffix,
            state,
            scan,
            min_rate,
            summary,
            report,
        } => {
            if let Some(rate) = min_rate {
                config.gate.min_rate = rate;
            }
            let index = index(&config, &source)?;
            let keys: Vec<ConfigurationKey> = index
                .run_set
                .keys()
                .filter(|k| state.matches(k.spin_state(config.flipper_field)))
                .copied()
                .collect();
            if keys.is_empty() {
                return Err(CliError::Usage("no configuration selected".into()));
            }

            let mut options = MergeOptions::new(&output, base_name).with_suffix(suffix);
            if let Some(label) = summary {
                options = options.with_summary(label);
            }

            let start = Instant::now();
            let aggregator = RunAggregator::new(config);
            let merges = match scan {
                Some(field) => {
                    let field: KeyField = field.parse()?;
                    aggregator.merge_scan(&index.run_set, &keys, field, &options)
                }
                None => aggregator.merge_all(&index.run_set, &keys, &options),
            };

            let mut reports: Vec<&MergeReport> = Vec::new();
            let mut failures = 0usize;
            for merge in &merges {
                match &merge.outcome {
                    Ok(report) => {
                        println!(
                            "{}: {} of {} subruns -> {}",
                            merge.state,
                            report.included,
                            report.outcomes.len(),
                            report.paths.events.display()
                        );
                        for (run_id, reason) in report.excluded() {
                            println!("  skipped {run_id}: {reason}");
                        }
                        reports.push(report);
                    }
                    Err(e) => {
                        failures += 1;
                        println!("{}: merge failed: {e}", merge.state);
                    }
                }
            }
            println!("Merged {} bucket(s) in {:.2}s", reports.len(), start.elapsed().as_secs_f64());

            if let Some(path) = report {
                sesame_io::write_atomic(&path, serde_json::to_string_pretty(&reports)?.as_bytes())?;
            }
            if failures > 0 {
                return Err(CliError::Usage(format!("{failures} merge(s) failed")));
            }
        }

        Commands::Spectrum {
            input,
            monitor,
            region,
            rebin: factor,
        } => {
            let (spectrum, monitor_sum) = spectrum(&config, &input, &monitor, &region)?;
            let spectrum = rebin(&spectrum, factor)?;
            let normalized = normalized_with_errors(&spectrum, monitor_sum);
            let edges = config.time.bin_edges();

            println!("# monitor counts: {monitor_sum}");
            println!("# bin\tlambda\tcounts\tnormalized\terror");
            for (i, (count, m)) in spectrum.iter().zip(&normalized).enumerate() {
                let lambda = edges.get(i * factor).copied().unwrap_or(f64::NAN);
                println!("{i}\t{lambda:.4}\t{count}\t{:.6e}\t{:.6e}", m.value, m.error);
            }
        }

        Commands::Polarization {
            up,
            up_monitor,
            down,
            down_monitor,
            region,
            from_bin,
            to_bin,
        } => {
            let (up_counts, up_sum) = spectrum(&config, &up, &up_monitor, &region)?;
            let (down_counts, down_sum) = spectrum(&config, &down, &down_monitor, &region)?;
            let up = normalized_with_errors(&up_counts, up_sum);
            let down = normalized_with_errors(&down_counts, down_sum);
            let polarization = polarization_with_errors(&up, &down)?;

            println!("# bin\tpolarization\terror\tflipping_ratio\terror");
            for (i, p) in polarization.iter().enumerate() {
                let fr = flipping_ratio_measurement(up[i], down[i]);
                println!(
                    "{i}\t{:.6}\t{:.6}\t{:.6}\t{:.6}",
                    p.value, p.error, fr.value, fr.error
                );
            }

            let bins = from_bin..to_bin.unwrap_or(up.len());
            let up_total = integrate(&up, bins.clone());
            let down_total = integrate(&down, bins.clone());
            let total = total_intensity(up_total, down_total);
            let fr = flipping_ratio_measurement(up_total, down_total);
            println!(
                "# bins {}..{}: up {:.6e} +/- {:.6e}, down {:.6e} +/- {:.6e}",
                bins.start, bins.end, up_total.value, up_total.error, down_total.value,
                down_total.error
            );
            println!("# total {:.6e} +/- {:.6e}", total.value, total.error);
            println!("# flipping ratio {:.6} +/- {:.6}", fr.value, fr.error);
        }

        Commands::Info { input } => {
            let reader = EventFileReader::open(&input)?.with_config(config.clone());
            let file_size = reader.file_size();
            let (height, width) = config.layout.image_dimensions();

            println!("File: {}", input.display());
            println!(
                "Size: {} bytes ({:.2} MB)",
                file_size,
                file_size as f64 / 1_000_000.0
            );
            println!("Layout: {:?} ({} x {} pixels)", config.layout, width, height);
            println!("Records: {}", reader.record_count()?);

            let mut last = 0u16;
            let mut observer = |permille: u16| {
                if permille / 100 != last / 100 {
                    log::debug!("cube {}%", permille / 10);
                }
                last = permille;
            };
            let cube = reader.make_cube_with_progress(&mut observer, None)?;
            let binned = cube.total();
            println!(
                "Binned events: {} ({} wavelength bins of {:.4} A)",
                binned,
                config.time.wavelength_bins,
                config.time.bin_width()
            );
            let spectrum = cube.spectrum(&Region::full(height, width), None)?;
            if let Some(peak) = spectrum
                .iter()
                .enumerate()
                .max_by_key(|(_, &c)| c)
                .filter(|(_, &c)| c > 0)
            {
                println!(
                    "Peak: bin {} ({:.3} A, {} counts)",
                    peak.0,
                    (peak.0 as f64 + 0.5) * config.time.bin_width(),
                    peak.1
                );
            }
        }
    }

    Ok(())
}

/// Reads every source named on the command line.
fn index(config: &ReductionConfig, args: &SourceArgs) -> Result<IndexReport> {
    let mut sources: Vec<Box<dyn ConfigurationSource>> = args
        .manifest
        .iter()
        .map(|path| Box::new(ManifestSource::new(path)) as Box<dyn ConfigurationSource>)
        .collect();
    if let Some(dir) = &args.data_dir {
        let first = args
            .first
            .ok_or_else(|| CliError::Usage("--data-dir needs --first".into()))?;
        let last = args.last.unwrap_or(first);
        sources.push(Box::new(
            RunInfoSource::range(dir, first, last, &args.skip).with_prefix(args.prefix.clone()),
        ));
    }
    if sources.is_empty() {
        return Err(CliError::Usage(
            "no source given; use --manifest or --data-dir".into(),
        ));
    }

    let mut indexer = ConfigurationIndexer::new(config.clone());
    if let Some(value) = args.triangle1 {
        indexer = indexer.with_filter(KeyFilter::triangle1(value));
    }
    let refs: Vec<&dyn ConfigurationSource> = sources.iter().map(AsRef::as_ref).collect();
    Ok(indexer.index(&refs))
}

fn print_index(run_set: &RunSet, flipper_field: KeyField) {
    for (key, subruns) in run_set.iter() {
        println!("[{}] {}", key.spin_state(flipper_field), key);
        for s in subruns {
            println!(
                "  {:<12} {:>10.1}s {:>12} monitor {:>12} events",
                s.run_id, s.elapsed_s, s.monitor_count, s.detector_count
            );
        }
    }
    println!(
        "{} configurations, {} subruns",
        run_set.len(),
        run_set.subrun_count()
    );
}

/// Region spectrum of one event file plus its monitor sum.
fn spectrum(
    config: &ReductionConfig,
    events: &Path,
    monitor: &Path,
    args: &RegionArgs,
) -> Result<(Vec<u64>, u64)> {
    let (height, width) = config.layout.image_dimensions();
    let region = match args.region.as_deref() {
        Some(&[xmin, ymin, xmax, ymax]) => Region::new((xmin, ymin), (xmax, ymax)),
        Some(_) => return Err(CliError::Usage("--region needs 4 values".into())),
        None => Region::full(height, width),
    };
    let mask: Option<PixelMask> = args.mask.as_ref().map(read_mask).transpose()?;

    let reader = EventFileReader::open(events)?.with_config(config.clone());
    let spectrum = reader.make_1d(&region, mask.as_ref())?;
    let format: MonitorFormat = if args.merged {
        config.monitor.artifact()
    } else {
        config.monitor
    };
    let monitor_sum = read_monitor(monitor, &format)?.histogram.total();
    Ok((spectrum, monitor_sum))
}

/// JSON view of an index.
#[derive(Serialize)]
struct IndexJson<'a> {
    configurations: Vec<BucketJson<'a>>,
    skipped: &'a [SkippedEntry],
    filtered: usize,
}

#[derive(Serialize)]
struct BucketJson<'a> {
    key: &'a ConfigurationKey,
    subruns: &'a [sesame_core::SubrunMetadata],
}

impl<'a> IndexJson<'a> {
    fn new(report: &'a IndexReport) -> Self {
        Self {
            configurations: report
                .run_set
                .iter()
                .map(|(key, subruns)| BucketJson { key, subruns })
                .collect(),
            skipped: &report.skipped,
            filtered: report.filtered,
        }
    }
}
