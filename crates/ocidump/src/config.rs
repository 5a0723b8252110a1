//! Configuration: YAML file loading, CLI override merging, and defaults.
//!
//! Precedence is `defaults < config file < explicitly-set CLI flags`. Every
//! CLI override is an `Option` so "the user typed it" and "the built-in
//! default" are distinct states; a flag left unset never shadows a value from
//! the config file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{ResourceType, is_ocid};

/// Environment variable naming an explicit config file path.
pub const CONFIG_ENV_VAR: &str = "OCI_DUMP_CONFIG_FILE";

/// Config file name probed in the working directory, home, and /etc.
pub const CONFIG_FILE_NAME: &str = "oci-resource-dump.yaml";

/// The config file schema version this build understands.
pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unable to read config file {path}: {source}")]
    Unreadable {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed config file {path}: {source}")]
    Malformed {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("unsupported config version {found} (this build understands {CONFIG_VERSION})")]
    UnsupportedVersion { found: u32 },
    #[error("unknown resource type: {0:?}")]
    UnknownResourceType(String),
    #[error("unknown output format: {0:?} (expected json, csv, or tsv)")]
    UnknownFormat(String),
    #[error("unknown log level: {0:?} (expected silent, normal, verbose, or debug)")]
    UnknownLogLevel(String),
    #[error("malformed compartment OCID in filter list: {0:?}")]
    BadCompartmentId(String),
    #[error("invalid name pattern {pattern:?}: {source}")]
    BadPattern {
        pattern: String,
        source: regex::Error,
    },
}

/// Snapshot output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Json,
    Csv,
    Tsv,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Csv => "csv",
            OutputFormat::Tsv => "tsv",
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "csv" => Ok(OutputFormat::Csv),
            "tsv" => Ok(OutputFormat::Tsv),
            _ => Err(ConfigError::UnknownFormat(s.to_string())),
        }
    }
}

/// The four-level logging contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Silent,
    #[default]
    Normal,
    Verbose,
    Debug,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Silent => "silent",
            LogLevel::Normal => "normal",
            LogLevel::Verbose => "verbose",
            LogLevel::Debug => "debug",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "silent" => Ok(LogLevel::Silent),
            "normal" => Ok(LogLevel::Normal),
            "verbose" => Ok(LogLevel::Verbose),
            "debug" => Ok(LogLevel::Debug),
            _ => Err(ConfigError::UnknownLogLevel(s.to_string())),
        }
    }
}

/// Filter section of the config file. All leaves optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterSection {
    #[serde(default)]
    pub compartments: Option<Vec<String>>,
    #[serde(default)]
    pub exclude_compartments: Option<Vec<String>>,
    #[serde(default)]
    pub resource_types: Option<Vec<String>>,
    #[serde(default)]
    pub exclude_resource_types: Option<Vec<String>>,
    #[serde(default)]
    pub name_pattern: Option<String>,
    #[serde(default)]
    pub exclude_name_pattern: Option<String>,
}

/// Discovery tuning knobs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiscoverySection {
    /// Concurrent compartment slots (semaphore capacity).
    #[serde(default)]
    pub max_workers: Option<usize>,
    /// Retries per list call after the initial attempt.
    #[serde(default)]
    pub max_retries: Option<u32>,
}

/// Configuration loaded from `oci-resource-dump.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub version: Option<u32>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub output_file: Option<PathBuf>,
    #[serde(default)]
    pub log_level: Option<String>,
    /// Global discovery deadline, in seconds.
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub progress: Option<bool>,
    #[serde(default)]
    pub filters: FilterSection,
    #[serde(default)]
    pub discovery: DiscoverySection,
}

/// Flags the user explicitly set on the command line.
///
/// `None` means "not set" — the load-bearing sentinel that keeps defaults
/// from shadowing config-file values.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub format: Option<OutputFormat>,
    pub output_file: Option<PathBuf>,
    pub log_level: Option<LogLevel>,
    pub timeout: Option<u64>,
    pub progress: Option<bool>,
    pub compartments: Option<Vec<String>>,
    pub exclude_compartments: Option<Vec<String>>,
    pub resource_types: Option<Vec<String>>,
    pub exclude_resource_types: Option<Vec<String>>,
    pub name_pattern: Option<String>,
    pub exclude_name_pattern: Option<String>,
    pub max_workers: Option<usize>,
    pub max_retries: Option<u32>,
}

/// The merged, immutable configuration the engine runs with.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveConfig {
    pub format: OutputFormat,
    pub output_file: Option<PathBuf>,
    pub log_level: LogLevel,
    pub timeout: Duration,
    pub progress: bool,
    pub compartments: Vec<String>,
    pub exclude_compartments: Vec<String>,
    pub resource_types: Vec<ResourceType>,
    pub exclude_resource_types: Vec<ResourceType>,
    pub name_pattern: Option<String>,
    pub exclude_name_pattern: Option<String>,
    pub max_workers: usize,
    pub max_retries: u32,
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Json,
            output_file: None,
            log_level: LogLevel::Normal,
            timeout: Duration::from_secs(300),
            progress: true,
            compartments: Vec::new(),
            exclude_compartments: Vec::new(),
            resource_types: Vec::new(),
            exclude_resource_types: Vec::new(),
            name_pattern: None,
            exclude_name_pattern: None,
            max_workers: 5,
            max_retries: 3,
        }
    }
}

impl EffectiveConfig {
    /// Merge `defaults <- file <- cli`, validating as values land.
    pub fn resolve(file: Option<&FileConfig>, cli: &CliOverrides) -> Result<Self, ConfigError> {
        let mut cfg = EffectiveConfig::default();
        if let Some(file) = file {
            cfg.apply_file(file)?;
        }
        cfg.apply_cli(cli)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_file(&mut self, file: &FileConfig) -> Result<(), ConfigError> {
        if let Some(v) = file.version
            && v != CONFIG_VERSION
        {
            return Err(ConfigError::UnsupportedVersion { found: v });
        }
        if let Some(format) = &file.format {
            self.format = format.parse()?;
        }
        if let Some(path) = &file.output_file {
            self.output_file = Some(path.clone());
        }
        if let Some(level) = &file.log_level {
            self.log_level = level.parse()?;
        }
        if let Some(secs) = file.timeout {
            self.timeout = Duration::from_secs(secs);
        }
        if let Some(progress) = file.progress {
            self.progress = progress;
        }

        let filters = &file.filters;
        if let Some(ids) = &filters.compartments {
            self.compartments = ids.clone();
        }
        if let Some(ids) = &filters.exclude_compartments {
            self.exclude_compartments = ids.clone();
        }
        if let Some(tags) = &filters.resource_types {
            self.resource_types = parse_types(tags)?;
        }
        if let Some(tags) = &filters.exclude_resource_types {
            self.exclude_resource_types = parse_types(tags)?;
        }
        if let Some(pattern) = &filters.name_pattern {
            self.name_pattern = Some(pattern.clone());
        }
        if let Some(pattern) = &filters.exclude_name_pattern {
            self.exclude_name_pattern = Some(pattern.clone());
        }

        if let Some(workers) = file.discovery.max_workers {
            self.max_workers = workers;
        }
        if let Some(retries) = file.discovery.max_retries {
            self.max_retries = retries;
        }
        Ok(())
    }

    fn apply_cli(&mut self, cli: &CliOverrides) -> Result<(), ConfigError> {
        if let Some(format) = cli.format {
            self.format = format;
        }
        if let Some(path) = &cli.output_file {
            self.output_file = Some(path.clone());
        }
        if let Some(level) = cli.log_level {
            self.log_level = level;
        }
        if let Some(secs) = cli.timeout {
            self.timeout = Duration::from_secs(secs);
        }
        if let Some(progress) = cli.progress {
            self.progress = progress;
        }
        if let Some(ids) = &cli.compartments {
            self.compartments = ids.clone();
        }
        if let Some(ids) = &cli.exclude_compartments {
            self.exclude_compartments = ids.clone();
        }
        if let Some(tags) = &cli.resource_types {
            self.resource_types = parse_types(tags)?;
        }
        if let Some(tags) = &cli.exclude_resource_types {
            self.exclude_resource_types = parse_types(tags)?;
        }
        if let Some(pattern) = &cli.name_pattern {
            self.name_pattern = Some(pattern.clone());
        }
        if let Some(pattern) = &cli.exclude_name_pattern {
            self.exclude_name_pattern = Some(pattern.clone());
        }
        if let Some(workers) = cli.max_workers {
            self.max_workers = workers;
        }
        if let Some(retries) = cli.max_retries {
            self.max_retries = retries;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for id in self.compartments.iter().chain(&self.exclude_compartments) {
            if !is_ocid(id) {
                return Err(ConfigError::BadCompartmentId(id.clone()));
            }
        }
        Ok(())
    }
}

fn parse_types(tags: &[String]) -> Result<Vec<ResourceType>, ConfigError> {
    tags.iter()
        .map(|t| ResourceType::parse(t).ok_or_else(|| ConfigError::UnknownResourceType(t.clone())))
        .collect()
}

/// Candidate config paths after the environment override, in search order.
pub fn search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(format!(".{CONFIG_FILE_NAME}")));
    }
    paths.push(PathBuf::from("/etc").join(CONFIG_FILE_NAME));
    paths
}

/// Load the effective file config, honoring `$OCI_DUMP_CONFIG_FILE` first.
///
/// An explicit environment path that cannot be read is a hard error; probed
/// locations are skipped silently when absent.
pub fn load() -> Result<Option<(PathBuf, FileConfig)>, ConfigError> {
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR)
        && !path.is_empty()
    {
        let path = PathBuf::from(path);
        let config = load_file(&path)?;
        return Ok(Some((path, config)));
    }

    for path in search_paths() {
        if path.is_file() {
            let config = load_file(&path)?;
            return Ok(Some((path, config)));
        }
    }
    Ok(None)
}

/// Parse one YAML config file.
pub fn load_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    let config: FileConfig =
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Malformed {
            path: path.to_path_buf(),
            source,
        })?;
    if let Some(v) = config.version
        && v != CONFIG_VERSION
    {
        return Err(ConfigError::UnsupportedVersion { found: v });
    }
    Ok(config)
}

/// A fully-populated default config file, for `--generate-config`.
pub fn default_config_yaml() -> String {
    format!(
        r#"# oci-resource-dump configuration.
# Precedence: built-in defaults < this file < explicitly-set CLI flags.
version: {CONFIG_VERSION}

# Snapshot output format: json, csv, or tsv.
format: json
# Write the snapshot to a file instead of stdout.
# output_file: /tmp/resources.json
# Logging: silent, normal, verbose, or debug.
log_level: normal
# Global deadline for the whole discovery run, in seconds.
timeout: 300
# Render a progress line on stderr.
progress: true

filters:
  # Compartment OCID allow/deny lists. An empty allow list means no constraint.
  compartments: []
  exclude_compartments: []
  # Resource-type tags, canonical (ComputeInstance) or alias (compute_instances).
  resource_types: []
  exclude_resource_types: []
  # Regular expressions matched against resource display names.
  # name_pattern: "^prod-"
  # exclude_name_pattern: "-scratch$"

discovery:
  # Concurrent compartment slots. Tune to your tenancy's API rate limits.
  max_workers: 5
  # Retries per list call after the initial attempt.
  max_retries: 3
"#
    )
}
