use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing::warn;
use tracing_subscriber::filter::LevelFilter;

use ocidump::config::{self, CliOverrides, ConfigError, EffectiveConfig, LogLevel};
use ocidump::diff;
use ocidump::engine::{self, DiscoveryError};
use ocidump::filter::FilterSet;
use ocidump::output;
use ocidump::progress::ProgressTracker;
use ocidump::rest;

#[derive(Parser, Debug)]
#[command(name = "oci-resource-dump", version)]
#[command(about = "Auditable, filterable inventory snapshots of an OCI tenancy")]
struct Cli {
    /// Snapshot output format: json, csv, or tsv.
    #[arg(long, value_name = "FORMAT")]
    format: Option<String>,

    /// Logging: silent, normal, verbose, or debug.
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Global deadline for the whole discovery run, in seconds.
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<u64>,

    /// Write the snapshot to a file instead of stdout.
    #[arg(long, value_name = "PATH")]
    output_file: Option<PathBuf>,

    /// Render a progress line on stderr.
    #[arg(long, overrides_with = "no_progress")]
    progress: bool,

    /// Disable the progress line.
    #[arg(long, overrides_with = "progress")]
    no_progress: bool,

    /// Comma-separated compartment OCID allow list.
    #[arg(long, value_name = "OCIDS", value_delimiter = ',')]
    compartments: Option<Vec<String>>,

    /// Comma-separated compartment OCID deny list.
    #[arg(long, value_name = "OCIDS", value_delimiter = ',')]
    exclude_compartments: Option<Vec<String>>,

    /// Comma-separated resource-type tags (ComputeInstance) or aliases
    /// (compute_instances).
    #[arg(long, value_name = "TYPES", value_delimiter = ',')]
    resource_types: Option<Vec<String>>,

    /// Comma-separated resource-type deny list.
    #[arg(long, value_name = "TYPES", value_delimiter = ',')]
    exclude_resource_types: Option<Vec<String>>,

    /// Keep only resources whose display name matches this regex.
    #[arg(long, value_name = "REGEX")]
    name_filter: Option<String>,

    /// Drop resources whose display name matches this regex.
    #[arg(long, value_name = "REGEX")]
    exclude_name_filter: Option<String>,

    /// Concurrent compartment slots.
    #[arg(long, value_name = "N")]
    max_workers: Option<usize>,

    /// Retries per list call after the initial attempt.
    #[arg(long, value_name = "N")]
    max_retries: Option<u32>,

    /// Compare two snapshot files instead of discovering.
    #[arg(long, value_name = "OLD,NEW", value_delimiter = ',', num_args = 2)]
    compare_files: Option<Vec<PathBuf>>,

    /// Diff output format.
    #[arg(long, value_enum, default_value_t = DiffFormat::Text)]
    diff_format: DiffFormat,

    /// Write the diff to a file instead of stdout.
    #[arg(long, value_name = "PATH")]
    diff_output: Option<PathBuf>,

    /// Include the unchanged set in the diff.
    #[arg(long)]
    diff_detailed: bool,

    /// Print a fully-populated default config file and exit.
    #[arg(long)]
    generate_config: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DiffFormat {
    Json,
    Text,
}

impl std::fmt::Display for DiffFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            DiffFormat::Json => "json",
            DiffFormat::Text => "text",
        })
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.generate_config {
        print!("{}", config::default_config_yaml());
        return ExitCode::SUCCESS;
    }

    if cli.compare_files.is_some() {
        return run_diff(&cli);
    }

    run_discovery(&cli)
}

/// Diff mode: exit 2 on any I/O or input problem.
fn run_diff(cli: &Cli) -> ExitCode {
    let paths = cli.compare_files.as_ref().expect("checked by caller");

    let report = match diff::compare_files(&paths[0], &paths[1], cli.diff_detailed) {
        Ok(report) => report,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::from(2);
        }
    };

    let rendered = match cli.diff_format {
        DiffFormat::Json => diff::render_json(&report),
        DiffFormat::Text => diff::render_text(&report),
    };

    let written = match &cli.diff_output {
        Some(path) => std::fs::write(path, rendered.as_bytes()),
        None => {
            print!("{rendered}");
            Ok(())
        }
    };
    if let Err(err) = written {
        eprintln!("error: unable to write diff output: {err}");
        return ExitCode::from(2);
    }
    ExitCode::SUCCESS
}

/// Discovery mode: exit 1 on configuration, credential, or deadline errors.
fn run_discovery(cli: &Cli) -> ExitCode {
    let overrides = match build_overrides(cli) {
        Ok(overrides) => overrides,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::from(1);
        }
    };

    let file = match config::load() {
        Ok(found) => found,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::from(1);
        }
    };

    let config = match EffectiveConfig::resolve(file.as_ref().map(|(_, c)| c), &overrides) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::from(1);
        }
    };

    init_tracing(config.log_level);
    if let Some((path, _)) = &file {
        tracing::debug!(path = %path.display(), "loaded config file");
    }

    let filters = match FilterSet::compile(&config) {
        Ok(filters) => filters,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::from(1);
        }
    };

    let clients = match rest::connect() {
        Ok(clients) => clients,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::from(1);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("error: unable to start runtime: {err}");
            return ExitCode::from(1);
        }
    };

    let tracker = ProgressTracker::new(config.progress);
    let outcome = runtime.block_on(engine::discover(&clients, &config, &filters, &tracker));

    let snapshot = match outcome {
        Ok(snapshot) => snapshot,
        Err(DiscoveryError::Deadline { partial }) => {
            warn!(partial = partial.len(), "discarding partial snapshot");
            eprintln!("error: discovery deadline exceeded");
            return ExitCode::from(1);
        }
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::from(1);
        }
    };

    if let Err(err) = output::emit(&snapshot, config.format, config.output_file.as_deref()) {
        eprintln!("error: {err:#}");
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

/// Lift the parsed flags into the merge-ready override set. Only flags the
/// user explicitly passed become `Some`.
fn build_overrides(cli: &Cli) -> Result<CliOverrides, ConfigError> {
    Ok(CliOverrides {
        format: cli.format.as_deref().map(str::parse).transpose()?,
        log_level: cli.log_level.as_deref().map(str::parse).transpose()?,
        timeout: cli.timeout,
        output_file: cli.output_file.clone(),
        progress: progress_override(cli),
        compartments: cli.compartments.clone(),
        exclude_compartments: cli.exclude_compartments.clone(),
        resource_types: cli.resource_types.clone(),
        exclude_resource_types: cli.exclude_resource_types.clone(),
        name_pattern: cli.name_filter.clone(),
        exclude_name_pattern: cli.exclude_name_filter.clone(),
        max_workers: cli.max_workers,
        max_retries: cli.max_retries,
    })
}

fn progress_override(cli: &Cli) -> Option<bool> {
    if cli.progress {
        Some(true)
    } else if cli.no_progress {
        Some(false)
    } else {
        None
    }
}

fn init_tracing(level: LogLevel) {
    let filter = match level {
        LogLevel::Silent => LevelFilter::OFF,
        LogLevel::Normal => LevelFilter::INFO,
        LogLevel::Verbose => LevelFilter::DEBUG,
        LogLevel::Debug => LevelFilter::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
