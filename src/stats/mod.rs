//! Run statistics
//!
//! Summary numbers over the collected node results. Nodes run
//! concurrently, so the slowest successful node approximates the run's
//! wall-clock time and the sum over all successful nodes is the CPU time
//! a single node would have needed.
//!
//! # Example
//!
//! ```
//! use arda_cluster::runner::NodeResult;
//! use arda_cluster::stats::RunSummary;
//!
//! let mut a = NodeResult::failed("m0", "unused");
//! a.succeeded = true;
//! a.error_message = None;
//! a.elapsed_seconds = 10.0;
//!
//! let mut b = a.clone();
//! b.hostname = "w1".to_string();
//! b.elapsed_seconds = 15.0;
//!
//! let summary = RunSummary::from_results(&[a, b]);
//! assert_eq!(summary.successful_nodes, 2);
//! assert_eq!(summary.wall_clock_seconds, 15.0);
//! assert!((summary.speedup - 25.0 / 15.0).abs() < 1e-9);
//! ```

pub mod aggregator;

use crate::runner::NodeResult;
use serde::{Deserialize, Serialize};

/// Cluster-wide summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_nodes: usize,
    pub successful_nodes: usize,
    /// Sum of elapsed time over successful nodes
    pub total_cpu_seconds: f64,
    /// Longest elapsed time among successful nodes
    pub wall_clock_seconds: f64,
    /// `total_cpu_seconds / wall_clock_seconds`, 0 when nothing succeeded,
    /// 1 when every success reported zero elapsed time
    pub speedup: f64,
}

impl RunSummary {
    /// Summarize results; independent of their order
    pub fn from_results(results: &[NodeResult]) -> Self {
        let mut successful_nodes = 0;
        let mut total_cpu_seconds = 0.0;
        let mut wall_clock_seconds: f64 = 0.0;

        for r in results.iter().filter(|r| r.succeeded) {
            successful_nodes += 1;
            total_cpu_seconds += r.elapsed_seconds;
            wall_clock_seconds = wall_clock_seconds.max(r.elapsed_seconds);
        }

        // Nodes finishing within clock resolution still count as parallel work
        let speedup = if successful_nodes == 0 {
            0.0
        } else if wall_clock_seconds > 0.0 {
            total_cpu_seconds / wall_clock_seconds
        } else {
            1.0
        };

        Self {
            total_nodes: results.len(),
            successful_nodes,
            total_cpu_seconds,
            wall_clock_seconds,
            speedup,
        }
    }
}
