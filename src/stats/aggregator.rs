//! Result aggregation
//!
//! Turns the collected per-node results into the cluster report:
//!
//! - **Abundance merge**: abundance files of successful nodes are merged
//!   by the external tool once at least two exist
//! - **Report files**: `cluster_report.txt` and `cluster_report.json`
//!   under the results directory
//! - **Cleanup**: with `keep_local_results = false`, per-node abundance
//!   files folded into a successful merge are removed
//!
//! Aggregation never fails the run. Tool and filesystem problems are
//! logged and reflected in the report.
//!
//! # Example
//!
//! ```no_run
//! use arda_cluster::config::ClusterConfig;
//! use arda_cluster::runner::ProcessRunner;
//! use arda_cluster::stats::aggregator::Aggregator;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let config = Arc::new(ClusterConfig::load(Path::new("cluster.conf")).unwrap());
//! let aggregator = Aggregator::new(config, Arc::new(ProcessRunner), 2);
//! let report = aggregator.aggregate(Vec::new());
//! assert_eq!(report.summary.successful_nodes, 0);
//! ```

use crate::config::ClusterConfig;
use crate::output;
use crate::runner::{CommandRunner, NodeResult, ToolInvocation};
use crate::stats::RunSummary;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// What happened to the abundance merge step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeOutcome {
    /// Fewer than two abundance files were available
    Skipped { available: usize },
    /// Merged file written
    Merged { path: PathBuf, inputs: Vec<PathBuf> },
    /// The merge tool failed or could not start
    Failed { reason: String },
}

impl MergeOutcome {
    /// Merged file, if the report should carry a merged-abundance section
    pub fn merged_path(&self) -> Option<&PathBuf> {
        match self {
            MergeOutcome::Merged { path, .. } => Some(path),
            _ => None,
        }
    }
}

/// Final cluster report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterReport {
    /// Local time, `%Y-%m-%d %H:%M:%S`
    pub generated_at: String,
    pub coordinator: String,
    pub workers: Vec<String>,
    pub database: PathBuf,
    pub kmer_size: u32,
    pub batch_size: u32,
    /// Processes in the run, coordinator included
    pub world_size: usize,
    /// Node results in collection (rank) order
    pub nodes: Vec<NodeResult>,
    pub merge: MergeOutcome,
    pub summary: RunSummary,
    /// Text report location
    pub report_path: PathBuf,
}

/// Builds the cluster report on the coordinator
pub struct Aggregator {
    config: Arc<ClusterConfig>,
    tools: Arc<dyn CommandRunner>,
    world_size: usize,
}

impl Aggregator {
    pub fn new(config: Arc<ClusterConfig>, tools: Arc<dyn CommandRunner>, world_size: usize) -> Self {
        Self {
            config,
            tools,
            world_size,
        }
    }

    /// Merge abundances, render, and write the report
    pub fn aggregate(&self, results: Vec<NodeResult>) -> ClusterReport {
        log::info!("=== Generating Aggregate Report ===");

        let merge = self.merge_abundance(&results);
        let summary = RunSummary::from_results(&results);
        let results_dir = self.config.results_path();

        let report = ClusterReport {
            generated_at: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            coordinator: self.config.coordinator_host.clone(),
            workers: self.config.participant_hosts.clone(),
            database: self.config.database_path.clone(),
            kmer_size: self.config.classification.kmer_size,
            batch_size: self.config.classification.batch_size,
            world_size: self.world_size,
            nodes: results,
            merge,
            summary,
            report_path: results_dir.join("cluster_report.txt"),
        };

        if let Err(e) = std::fs::create_dir_all(&results_dir) {
            log::warn!(
                "Could not create results directory {}: {}",
                results_dir.display(),
                e
            );
        }

        match std::fs::write(&report.report_path, output::text::render_report(&report)) {
            Ok(()) => log::info!("Report written to: {}", report.report_path.display()),
            Err(e) => log::error!(
                "Failed to write report {}: {}",
                report.report_path.display(),
                e
            ),
        }

        let json_path = results_dir.join("cluster_report.json");
        if let Err(e) = output::json::write_report(&report, &json_path) {
            log::warn!("Failed to write JSON report: {:#}", e);
        }

        if !self.config.options.keep_local_results {
            remove_merged_inputs(&report.merge);
        }

        report
    }

    /// Abundance files of successful nodes, in result order
    fn abundance_files(results: &[NodeResult]) -> Vec<PathBuf> {
        results
            .iter()
            .filter(|r| r.succeeded)
            .filter_map(|r| r.abundance_file.clone())
            .filter(|p| !p.as_os_str().is_empty())
            .collect()
    }

    fn merge_abundance(&self, results: &[NodeResult]) -> MergeOutcome {
        let inputs = Self::abundance_files(results);

        if inputs.len() < 2 {
            log::info!(
                "Skipping abundance merge (need at least 2 files, have {})",
                inputs.len()
            );
            return MergeOutcome::Skipped {
                available: inputs.len(),
            };
        }

        let output = self.config.merged_abundance_path();
        let invocation = merge_invocation(&self.config, &inputs, &output);
        log::info!("Merging {} abundance files", inputs.len());
        log::debug!("Running: {}", invocation);

        match self.tools.run(&invocation) {
            Ok(0) => {
                log::info!("Merged abundance written to: {}", output.display());
                MergeOutcome::Merged {
                    path: output,
                    inputs,
                }
            }
            Ok(code) => {
                log::warn!("Abundance merge failed with exit code {}", code);
                MergeOutcome::Failed {
                    reason: format!("exit code {}", code),
                }
            }
            Err(e) => {
                log::warn!("Abundance merge could not start: {}", e);
                MergeOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }
}

/// Merge tool command line
pub fn merge_invocation(
    config: &ClusterConfig,
    inputs: &[PathBuf],
    output: &std::path::Path,
) -> ToolInvocation {
    let mut inv = ToolInvocation::new(config.classifier_path(), &config.install_dir).arg("-m");
    for input in inputs {
        inv = inv.arg(input);
    }
    inv.opt("-o", output)
}

fn remove_merged_inputs(merge: &MergeOutcome) {
    if let MergeOutcome::Merged { inputs, .. } = merge {
        for path in inputs {
            match std::fs::remove_file(path) {
                Ok(()) => log::debug!("Removed {}", path.display()),
                Err(e) => log::warn!("Could not remove {}: {}", path.display(), e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample_config;
    use crate::runner::command::mock::MockRunner;
    use crate::stats::tests::success;

    fn setup(keep: bool) -> (tempfile::TempDir, Arc<ClusterConfig>) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = sample_config();
        config.install_dir = dir.path().to_path_buf();
        config.options.keep_local_results = keep;
        (dir, Arc::new(config))
    }

    #[test]
    fn test_all_failed_still_writes_report() {
        let (_dir, config) = setup(true);
        let mock = Arc::new(MockRunner::new());
        let aggregator = Aggregator::new(config, mock.clone(), 3);

        let report = aggregator.aggregate(vec![
            NodeResult::failed("m0", "no inputs assigned"),
            NodeResult::failed("w1", "classification failed with exit code 2"),
        ]);

        assert_eq!(report.summary.successful_nodes, 0);
        assert_eq!(report.summary.speedup, 0.0);
        assert_eq!(report.merge, MergeOutcome::Skipped { available: 0 });
        assert!(mock.calls().is_empty());

        let text = std::fs::read_to_string(&report.report_path).unwrap();
        assert!(text.contains("Nodes processed: 0/2"));
        assert!(text.contains("Speedup: 0.00x"));
        assert_eq!(text.matches("Status: FAILED").count(), 2);
    }

    #[test]
    fn test_single_success_skips_merge() {
        let (_dir, config) = setup(true);
        let mock = Arc::new(MockRunner::new());
        let aggregator = Aggregator::new(config, mock.clone(), 2);

        let report = aggregator.aggregate(vec![
            success("m0", 10.0),
            NodeResult::failed("w1", "classification failed with exit code 2"),
        ]);

        assert_eq!(report.merge, MergeOutcome::Skipped { available: 1 });
        assert!(report.merge.merged_path().is_none());
        assert!(mock.calls().is_empty());

        let text = std::fs::read_to_string(&report.report_path).unwrap();
        assert!(!text.contains("MERGED ABUNDANCE"));
        assert!(text.contains("m0:\n    Status: SUCCESS"));
        assert!(text.contains("w1:\n    Status: FAILED"));
        assert!(text.contains("Error: classification failed with exit code 2"));
        assert!(text.contains("Nodes processed: 1/2"));
    }

    #[test]
    fn test_two_successes_invoke_merge() {
        let (_dir, config) = setup(true);
        let mock = Arc::new(MockRunner::new());
        let aggregator = Aggregator::new(config.clone(), mock.clone(), 2);

        let report = aggregator.aggregate(vec![success("m0", 10.0), success("w1", 15.0)]);

        let calls = mock.calls();
        assert_eq!(calls.len(), 1);
        let args = calls[0].args_lossy();
        assert_eq!(args[0], "-m");
        assert_eq!(args.len(), 5);
        assert_eq!(args[3], "-o");
        assert_eq!(
            args[4],
            config.merged_abundance_path().display().to_string()
        );

        assert_eq!(report.merge.merged_path(), Some(&config.merged_abundance_path()));

        let text = std::fs::read_to_string(&report.report_path).unwrap();
        assert!(text.contains("MERGED ABUNDANCE"));
        assert!(text.contains("Total CPU time: 25.0 seconds"));
        assert!(text.contains("Wall clock time: 15.0 seconds (parallel)"));
        assert!(text.contains("Speedup: 1.67x"));

        let json = std::fs::read_to_string(config.results_path().join("cluster_report.json")).unwrap();
        let parsed: ClusterReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.summary, report.summary);
    }

    #[test]
    fn test_merge_failure_is_soft() {
        let (_dir, config) = setup(true);
        let mock = Arc::new(MockRunner::new().exit_when("-m", 4));
        let aggregator = Aggregator::new(config, mock, 2);

        let report = aggregator.aggregate(vec![success("m0", 1.0), success("w1", 2.0)]);

        assert_eq!(
            report.merge,
            MergeOutcome::Failed {
                reason: "exit code 4".to_string()
            }
        );
        assert_eq!(report.summary.successful_nodes, 2);
        let text = std::fs::read_to_string(&report.report_path).unwrap();
        assert!(!text.contains("MERGED ABUNDANCE"));
    }

    #[test]
    fn test_failed_nodes_abundance_not_merged() {
        let mut failed = success("w2", 3.0);
        failed.succeeded = false;
        failed.error_message = Some("lost".to_string());

        let files = Aggregator::abundance_files(&[success("m0", 1.0), failed, {
            let mut no_abundance = success("w1", 2.0);
            no_abundance.abundance_file = None;
            no_abundance
        }]);

        assert_eq!(files, vec![PathBuf::from("/opt/arda/results/m0_s_abundance.txt")]);
    }

    #[test]
    fn test_discard_local_results_after_merge() {
        let (_dir, config) = setup(false);
        let results_dir = config.results_path();
        std::fs::create_dir_all(&results_dir).unwrap();

        let mut nodes = vec![success("m0", 1.0), success("w1", 2.0)];
        for node in &mut nodes {
            let path = results_dir.join(format!("{}_s_abundance.txt", node.hostname));
            std::fs::write(&path, b"taxon\tcount\n").unwrap();
            node.abundance_file = Some(path);
        }
        let inputs: Vec<PathBuf> = nodes.iter().filter_map(|n| n.abundance_file.clone()).collect();

        let aggregator = Aggregator::new(config, Arc::new(MockRunner::new()), 2);
        let report = aggregator.aggregate(nodes);

        assert!(report.merge.merged_path().is_some());
        for path in inputs {
            assert!(!path.exists(), "{} should be removed", path.display());
        }
    }
}
