//! arda-cluster - distributed metagenomic classification coordinator
//!
//! Runs one classification job per cluster node and folds the per-node
//! results into a single report.
//!
//! # Architecture
//!
//! - **Configuration**: INI cluster description, loaded and validated once
//! - **Launcher**: preflight checks, host list, participant startup over ssh
//! - **Distributed run**: TCP star around the coordinator (broadcast, barrier, gather)
//! - **Node runner**: classifier and abundance subprocesses on each node
//! - **Aggregation**: abundance merge, text and JSON cluster reports

pub mod config;
pub mod distributed;
pub mod launcher;
pub mod output;
pub mod runner;
pub mod stats;
pub mod util;

// Re-export commonly used types
pub use config::ClusterConfig;
pub use runner::NodeResult;

/// Result type used throughout arda-cluster
pub type Result<T> = anyhow::Result<T>;
