//! Configuration module
//!
//! Handles the cluster configuration file, CLI argument parsing, and
//! topology validation. A [`ClusterConfig`] that made it out of
//! [`ClusterConfig::load`] is trusted by every downstream component.

pub mod cli;
pub mod ini;
pub mod validator;

use ini::{split_list, IniDocument};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the classification/abundance/merge executable under `<install_dir>/bin`
pub const CLASSIFIER_BINARY: &str = "arda";

/// Name of this program under `<install_dir>/bin` (spawned on every participant)
pub const ORCHESTRATOR_BINARY: &str = "arda-cluster";

/// Default TCP port of the coordination channel
pub const DEFAULT_PORT: u16 = 47100;

/// Default time allowed for every participant to connect
pub const DEFAULT_STARTUP_TIMEOUT_SECS: u64 = 120;

/// Required configuration fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigField {
    CoordinatorHost,
    ParticipantHosts,
    InstallDir,
    DatabasePath,
}

impl fmt::Display for ConfigField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConfigField::CoordinatorHost => "cluster.master",
            ConfigField::ParticipantHosts => "cluster.workers",
            ConfigField::InstallDir => "paths.cuclark_dir",
            ConfigField::DatabasePath => "paths.database",
        };
        f.write_str(name)
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("required field {0} is missing or empty")]
    MissingField(ConfigField),

    #[error("host '{host}' has reads assigned but is neither the master nor a listed worker")]
    UnknownHost { host: String },

    #[error("invalid value '{value}' for [{section}] {key}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
    },
}

/// Complete cluster run configuration
///
/// Immutable once loaded on the coordinator and broadcast to participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Designated coordinator (rank 0)
    pub coordinator_host: String,
    /// Worker hostnames, deduplicated, in file order
    pub participant_hosts: Vec<String>,
    /// Installation directory, identical on every node
    pub install_dir: PathBuf,
    /// Taxonomy database path
    pub database_path: PathBuf,
    /// Results directory (relative paths resolve against `install_dir`)
    pub results_dir: PathBuf,
    /// Per-host input files: one entry is single-end, two are paired-end
    pub per_node_inputs: BTreeMap<String, Vec<PathBuf>>,
    pub classification: ClassificationConfig,
    pub options: RunOptions,
    pub logging: LoggingConfig,
}

/// Parameters forwarded to the classification subprocess
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationConfig {
    pub kmer_size: u32,
    pub batch_size: u32,
    pub min_freq_target: Option<u32>,
    pub num_threads: Option<u32>,
    pub num_devices: Option<u32>,
    pub gap_iteration: Option<u32>,
    pub sampling_factor: Option<String>,
    pub tsk: bool,
    pub extended: bool,
    pub gzipped: bool,
    pub verbose: bool,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            kmer_size: 31,
            batch_size: 32,
            min_freq_target: None,
            num_threads: None,
            num_devices: None,
            gap_iteration: None,
            sampling_factor: None,
            tsk: false,
            extended: false,
            gzipped: false,
            verbose: false,
        }
    }
}

/// Run-mode toggles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOptions {
    /// Coordinator also classifies its own assigned reads
    pub coordinator_participates: bool,
    /// Keep per-node abundance files after a successful merge
    pub keep_local_results: bool,
    /// Coordination channel port
    pub port: u16,
    /// Seconds to wait for all participants to connect
    pub startup_timeout_secs: u64,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            coordinator_participates: true,
            keep_local_results: true,
            port: DEFAULT_PORT,
            startup_timeout_secs: DEFAULT_STARTUP_TIMEOUT_SECS,
        }
    }
}

/// Log severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Parse a level name; unknown names fall back to `Info`
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "debug" => LogLevel::Debug,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }

    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Error => log::LevelFilter::Error,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: LogLevel,
    /// Log file name under `<install_dir>/logs`
    pub file: String,
    /// Show info-level progress on the console
    pub show_progress: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            file: "cluster_run.log".to_string(),
            show_progress: true,
        }
    }
}

impl ClusterConfig {
    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_ini_str(&contents)
    }

    /// Build and validate a configuration from INI text
    pub fn from_ini_str(contents: &str) -> Result<Self, ConfigError> {
        let doc = IniDocument::parse(contents);

        let mut participant_hosts: Vec<String> = Vec::new();
        for host in split_list(&doc.get_string("cluster", "workers", "")) {
            if !participant_hosts.contains(&host) {
                participant_hosts.push(host);
            }
        }

        let mut per_node_inputs = BTreeMap::new();
        for (host, value) in doc.section("reads") {
            let files = split_list(value);
            if files.is_empty() {
                continue;
            }
            if files.len() > 2 {
                return Err(ConfigError::InvalidValue {
                    section: "reads".to_string(),
                    key: host.to_string(),
                    value: value.to_string(),
                });
            }
            per_node_inputs.insert(
                host.to_string(),
                files.into_iter().map(PathBuf::from).collect(),
            );
        }

        let classification = ClassificationConfig {
            kmer_size: non_negative(&doc, "classification", "kmer_size").unwrap_or(31),
            batch_size: non_negative(&doc, "classification", "batch_size").unwrap_or(32),
            min_freq_target: non_negative(&doc, "classification", "min_freq_target"),
            num_threads: positive(&doc, "classification", "num_threads"),
            num_devices: positive(&doc, "classification", "num_devices"),
            gap_iteration: non_negative(&doc, "classification", "gap_iteration"),
            sampling_factor: doc.get_non_empty("classification", "sampling_factor"),
            tsk: doc.get_bool("classification", "tsk", false),
            extended: doc.get_bool("classification", "extended", false),
            gzipped: doc.get_bool("classification", "gzipped", false),
            verbose: doc.get_bool("classification", "verbose", false),
        };

        let port = match doc.get_non_empty("options", "port") {
            Some(value) => value.parse::<u16>().map_err(|_| ConfigError::InvalidValue {
                section: "options".to_string(),
                key: "port".to_string(),
                value,
            })?,
            None => DEFAULT_PORT,
        };

        let options = RunOptions {
            coordinator_participates: doc.get_bool("options", "master_processes_reads", true),
            keep_local_results: doc.get_bool("options", "keep_local_results", true),
            port,
            startup_timeout_secs: doc
                .get_int("options", "startup_timeout")
                .filter(|v| *v > 0)
                .map(|v| v as u64)
                .unwrap_or(DEFAULT_STARTUP_TIMEOUT_SECS),
        };

        let logging = LoggingConfig {
            level: LogLevel::from_name(&doc.get_string("logging", "level", "info")),
            file: doc.get_string("logging", "file", "cluster_run.log"),
            show_progress: doc.get_bool("logging", "show_progress", true),
        };

        let config = Self {
            coordinator_host: doc.get_string("cluster", "master", ""),
            participant_hosts,
            install_dir: PathBuf::from(doc.get_string("paths", "cuclark_dir", "")),
            database_path: PathBuf::from(doc.get_string("paths", "database", "")),
            results_dir: PathBuf::from(doc.get_string("paths", "results_dir", "results")),
            per_node_inputs,
            classification,
            options,
            logging,
        };

        validator::validate_topology(&config)?;

        Ok(config)
    }

    /// Inputs assigned to `host`, if any
    pub fn inputs_for(&self, host: &str) -> Option<&[PathBuf]> {
        self.per_node_inputs
            .get(host)
            .map(Vec::as_slice)
            .filter(|files| !files.is_empty())
    }

    /// Whether the coordinator runs local classification in this run
    pub fn coordinator_has_work(&self) -> bool {
        self.options.coordinator_participates && self.inputs_for(&self.coordinator_host).is_some()
    }

    /// Workers with assigned inputs, in declaration order
    ///
    /// The coordinator is never listed here even if it also appears
    /// among the workers.
    pub fn active_participants(&self) -> Vec<String> {
        self.participant_hosts
            .iter()
            .filter(|h| **h != self.coordinator_host)
            .filter(|h| self.inputs_for(h).is_some())
            .cloned()
            .collect()
    }

    /// Absolute results directory
    pub fn results_path(&self) -> PathBuf {
        self.install_dir.join(&self.results_dir)
    }

    /// Path of the classification executable
    pub fn classifier_path(&self) -> PathBuf {
        self.install_dir.join("bin").join(CLASSIFIER_BINARY)
    }

    /// Path of this program on every node
    pub fn orchestrator_path(&self) -> PathBuf {
        self.install_dir.join("bin").join(ORCHESTRATOR_BINARY)
    }

    /// Coordinator log file
    pub fn log_path(&self) -> PathBuf {
        self.install_dir.join("logs").join(&self.logging.file)
    }

    /// Host list file consumed when starting per-node processes
    pub fn host_file_path(&self) -> PathBuf {
        self.install_dir.join("config").join("cluster_hosts.txt")
    }

    /// Output path of the cluster-wide abundance merge
    pub fn merged_abundance_path(&self) -> PathBuf {
        self.results_path().join("cluster_abundance_merged.txt")
    }
}

fn non_negative(doc: &IniDocument, section: &str, key: &str) -> Option<u32> {
    doc.get_int(section, key)
        .and_then(|v| u32::try_from(v).ok())
}

fn positive(doc: &IniDocument, section: &str, key: &str) -> Option<u32> {
    non_negative(doc, section, key).filter(|v| *v > 0)
}
