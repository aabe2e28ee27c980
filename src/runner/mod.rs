//! Local classification on one node
//!
//! Each node gets exactly one attempt per run. Every failure is captured
//! in the returned [`NodeResult`]; nothing here aborts the run.
//!
//! # Steps
//!
//! 1. Look up this host's assigned inputs
//! 2. Create the results directory (best effort)
//! 3. Verify every input exists
//! 4. Derive `<results>/<host>_<first input stem>` as the result base
//! 5. Run the classifier (`-O` single-end, `-P` paired-end, always `--light`)
//! 6. Stop on a non-zero exit code
//! 7. Run abundance estimation (failure only warns)
//! 8. Record elapsed wall-clock time for steps 3-7

pub mod command;

pub use command::{CommandRunner, ProcessRunner, ToolInvocation};

use crate::config::ClusterConfig;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Outcome of one node's classification attempt
///
/// Created once by [`NodeRunner::run_local`], then only moved around.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResult {
    pub hostname: String,
    pub succeeded: bool,
    /// Classification output (`<base>.csv`)
    pub result_file: Option<PathBuf>,
    /// Abundance estimate (`<base>_abundance.txt`)
    pub abundance_file: Option<PathBuf>,
    pub elapsed_seconds: f64,
    pub error_message: Option<String>,
}

impl NodeResult {
    /// A failed result carrying `message`
    pub fn failed(hostname: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            succeeded: false,
            result_file: None,
            abundance_file: None,
            elapsed_seconds: 0.0,
            error_message: Some(message.into()),
        }
    }

    pub fn status_label(&self) -> &'static str {
        if self.succeeded {
            "SUCCESS"
        } else {
            "FAILED"
        }
    }
}

/// Per-node failures, rendered into `NodeResult::error_message`
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("no inputs assigned")]
    NoInputs,

    #[error("input file not found: {}", .0.display())]
    MissingInput(PathBuf),

    #[error("failed to start classifier: {0}")]
    ClassifierSpawn(std::io::Error),

    #[error("classification failed with exit code {0}")]
    ClassifierExit(i32),
}

/// Runs the classification pipeline for the local host
pub struct NodeRunner {
    config: Arc<ClusterConfig>,
    tools: Arc<dyn CommandRunner>,
}

impl NodeRunner {
    pub fn new(config: Arc<ClusterConfig>, tools: Arc<dyn CommandRunner>) -> Self {
        Self { config, tools }
    }

    /// Classify the inputs assigned to `hostname`
    pub fn run_local(&self, hostname: &str) -> NodeResult {
        log::info!("Starting classification");

        let inputs = match self.config.inputs_for(hostname) {
            Some(inputs) => inputs,
            None => {
                let err = NodeError::NoInputs;
                log::error!("{}", err);
                return NodeResult::failed(hostname, err.to_string());
            }
        };

        let results_dir = self.config.results_path();
        if let Err(e) = std::fs::create_dir_all(&results_dir) {
            log::warn!(
                "Could not create results directory {}: {}",
                results_dir.display(),
                e
            );
        }

        let start = Instant::now();
        let outcome = self.classify(hostname, inputs, &results_dir);
        let elapsed_seconds = start.elapsed().as_secs_f64();

        match outcome {
            Ok((result_file, abundance_file)) => {
                log::info!("Completed in {:.1} seconds", elapsed_seconds);
                NodeResult {
                    hostname: hostname.to_string(),
                    succeeded: true,
                    result_file: Some(result_file),
                    abundance_file,
                    elapsed_seconds,
                    error_message: None,
                }
            }
            Err(err) => {
                log::error!("{}", err);
                NodeResult {
                    elapsed_seconds,
                    ..NodeResult::failed(hostname, err.to_string())
                }
            }
        }
    }

    /// Steps 3-7; returns the result file and, if produced, the abundance file
    fn classify(
        &self,
        hostname: &str,
        inputs: &[PathBuf],
        results_dir: &Path,
    ) -> Result<(PathBuf, Option<PathBuf>), NodeError> {
        for input in inputs {
            log::info!("Processing: {}", input.display());
            if !input.exists() {
                return Err(NodeError::MissingInput(input.clone()));
            }
        }

        let base = result_base(results_dir, hostname, &inputs[0]);
        let invocation = classify_invocation(&self.config, inputs, &base);
        log::debug!("Running: {}", invocation);

        let code = self
            .tools
            .run(&invocation)
            .map_err(NodeError::ClassifierSpawn)?;
        if code != 0 {
            return Err(NodeError::ClassifierExit(code));
        }

        let result_file = with_suffix(&base, ".csv");
        log::info!("Classification complete: {}", result_file.display());

        let abundance = abundance_invocation(&self.config, &result_file);
        log::debug!("Running: {}", abundance);

        let abundance_file = match self.tools.run(&abundance) {
            Ok(0) => {
                log::info!("Abundance estimation complete");
                Some(with_suffix(&base, "_abundance.txt"))
            }
            Ok(code) => {
                log::warn!("Abundance estimation failed with exit code {}", code);
                None
            }
            Err(e) => {
                log::warn!("Abundance estimation could not start: {}", e);
                None
            }
        };

        Ok((result_file, abundance_file))
    }
}

/// `<results_dir>/<hostname>_<stem of first input>`
///
/// The hostname prefix keeps files from different nodes apart in the
/// shared results directory.
pub fn result_base(results_dir: &Path, hostname: &str, first_input: &Path) -> PathBuf {
    let stem = first_input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    results_dir.join(format!("{}_{}", hostname, stem))
}

/// Classifier command line for `inputs`
pub fn classify_invocation(
    config: &ClusterConfig,
    inputs: &[PathBuf],
    result_base: &Path,
) -> ToolInvocation {
    let c = &config.classification;
    let mut inv = ToolInvocation::new(config.classifier_path(), &config.install_dir).arg("-c");

    inv = match inputs {
        [r1, r2] => inv.arg("-P").arg(r1).arg(r2),
        _ => inv.opt("-O", &inputs[0]),
    };

    inv = inv
        .opt("-R", result_base)
        .opt("-b", c.batch_size.to_string());

    if c.kmer_size > 0 {
        inv = inv.opt("-k", c.kmer_size.to_string());
    }
    if let Some(t) = c.min_freq_target {
        inv = inv.opt("-t", t.to_string());
    }
    if let Some(n) = c.num_threads {
        inv = inv.opt("-n", n.to_string());
    }
    if let Some(d) = c.num_devices {
        inv = inv.opt("-d", d.to_string());
    }
    if let Some(g) = c.gap_iteration {
        inv = inv.opt("-g", g.to_string());
    }
    if let Some(ref s) = c.sampling_factor {
        inv = inv.opt("-s", s);
    }

    let flags = [
        (c.tsk, "--tsk"),
        (c.extended, "--extended"),
        (c.gzipped, "--gzipped"),
        (c.verbose, "--verbose"),
    ];
    for (enabled, flag) in flags {
        if enabled {
            inv = inv.arg(flag);
        }
    }

    // Edge hardware: always the low-memory mode
    inv.arg("--light")
}

/// Abundance estimation command line for a classification result
pub fn abundance_invocation(config: &ClusterConfig, result_file: &Path) -> ToolInvocation {
    ToolInvocation::new(config.classifier_path(), &config.install_dir)
        .opt("-a", &config.database_path)
        .arg(result_file)
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut s: OsString = base.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::command::mock::MockRunner;
    use super::*;
    use crate::config::tests::sample_config;

    struct Fixture {
        _dir: tempfile::TempDir,
        config: ClusterConfig,
        reads: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let reads = dir.path().join("reads");
        std::fs::create_dir_all(&reads).unwrap();
        for name in ["a.fq", "b_R1.fq", "b_R2.fq"] {
            std::fs::write(reads.join(name), b"@r\nACGT\n+\nIIII\n").unwrap();
        }

        let mut config = sample_config();
        config.install_dir = dir.path().join("install");
        config.per_node_inputs.insert("m0".to_string(), vec![reads.join("a.fq")]);
        config.per_node_inputs.insert(
            "w1".to_string(),
            vec![reads.join("b_R1.fq"), reads.join("b_R2.fq")],
        );

        Fixture { _dir: dir, config, reads }
    }

    fn node_runner(config: &ClusterConfig, mock: Arc<MockRunner>) -> NodeRunner {
        NodeRunner::new(Arc::new(config.clone()), mock)
    }

    #[test]
    fn test_result_base() {
        let base = result_base(Path::new("/r"), "w1", Path::new("/reads/sample.fastq"));
        assert_eq!(base, PathBuf::from("/r/w1_sample"));

        let base = result_base(Path::new("/r"), "w1", Path::new("/reads/sample.fq.gz"));
        assert_eq!(base, PathBuf::from("/r/w1_sample.fq"));

        let base = result_base(Path::new("/r"), "m0", Path::new("noext"));
        assert_eq!(base, PathBuf::from("/r/m0_noext"));
    }

    #[test]
    fn test_classify_invocation_single_end_defaults() {
        let mut config = sample_config();
        config.classification = Default::default();
        let inputs = vec![PathBuf::from("/reads/a.fq")];

        let inv = classify_invocation(&config, &inputs, Path::new("/opt/arda/results/m0_a"));

        assert_eq!(inv.program, PathBuf::from("/opt/arda/bin/arda"));
        assert_eq!(inv.working_dir, PathBuf::from("/opt/arda"));
        assert_eq!(
            inv.args_lossy(),
            vec![
                "-c", "-O", "/reads/a.fq", "-R", "/opt/arda/results/m0_a", "-b", "32", "-k",
                "31", "--light"
            ]
        );
    }

    #[test]
    fn test_classify_invocation_paired_end_all_options() {
        let mut config = sample_config();
        config.classification.num_devices = Some(2);
        config.classification.gap_iteration = Some(3);
        config.classification.tsk = true;
        config.classification.gzipped = true;
        let inputs = vec![PathBuf::from("/r/x_R1.fq"), PathBuf::from("/r/x_R2.fq")];

        let args = classify_invocation(&config, &inputs, Path::new("/out/w1_x_R1")).args_lossy();

        assert_eq!(
            args,
            vec![
                "-c", "-P", "/r/x_R1.fq", "/r/x_R2.fq", "-R", "/out/w1_x_R1", "-b", "16", "-k",
                "27", "-t", "0", "-n", "4", "-d", "2", "-g", "3", "-s", "2", "--tsk",
                "--gzipped", "--light"
            ]
        );
    }

    #[test]
    fn test_no_inputs_assigned() {
        let f = fixture();
        let mock = Arc::new(MockRunner::new());

        let result = node_runner(&f.config, mock.clone()).run_local("w2");

        assert!(!result.succeeded);
        assert_eq!(result.error_message.as_deref(), Some("no inputs assigned"));
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn test_missing_input_file() {
        let mut f = fixture();
        let missing = f.reads.join("gone.fq");
        f.config
            .per_node_inputs
            .insert("m0".to_string(), vec![missing.clone()]);
        let mock = Arc::new(MockRunner::new());

        let result = node_runner(&f.config, mock.clone()).run_local("m0");

        assert!(!result.succeeded);
        let msg = result.error_message.unwrap();
        assert!(msg.contains(&missing.display().to_string()), "{}", msg);
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn test_classifier_failure_reports_exit_code() {
        let f = fixture();
        let mock = Arc::new(MockRunner::new().exit_when("-c", 2));

        let result = node_runner(&f.config, mock.clone()).run_local("w1");

        assert!(!result.succeeded);
        assert_eq!(
            result.error_message.as_deref(),
            Some("classification failed with exit code 2")
        );
        assert!(result.result_file.is_none());
        // No abundance estimation after a failed classification
        assert_eq!(mock.calls().len(), 1);
    }

    #[test]
    fn test_success_with_abundance() {
        let f = fixture();
        let mock = Arc::new(MockRunner::new());

        let result = node_runner(&f.config, mock.clone()).run_local("w1");
        let results = f.config.results_path();

        assert!(result.succeeded, "{:?}", result.error_message);
        assert_eq!(result.hostname, "w1");
        assert_eq!(result.result_file, Some(results.join("w1_b_R1.csv")));
        assert_eq!(result.abundance_file, Some(results.join("w1_b_R1_abundance.txt")));
        assert!(result.error_message.is_none());
        assert!(results.is_dir());

        let calls = mock.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(
            calls[1].args_lossy(),
            vec![
                "-a".to_string(),
                "/data/db".to_string(),
                results.join("w1_b_R1.csv").display().to_string(),
            ]
        );
    }

    #[test]
    fn test_abundance_failure_is_not_fatal() {
        let f = fixture();
        let mock = Arc::new(MockRunner::new().exit_when("-a", 1));

        let result = node_runner(&f.config, mock).run_local("m0");

        assert!(result.succeeded);
        assert!(result.result_file.is_some());
        assert!(result.abundance_file.is_none());
    }

    #[test]
    fn test_unusable_results_dir_does_not_block_classifier() {
        let f = fixture();
        let results = f.config.results_path();
        std::fs::create_dir_all(results.parent().unwrap()).unwrap();
        std::fs::write(&results, b"not a directory").unwrap();

        let mock = Arc::new(MockRunner::new());
        let result = node_runner(&f.config, mock.clone()).run_local("m0");

        assert!(result.succeeded, "{:?}", result.error_message);
        assert_eq!(mock.calls()[0].args_lossy()[0], "-c");
        assert!(results.is_file());

        let mock = Arc::new(MockRunner::new().exit_when("-c", 3));
        let result = node_runner(&f.config, mock.clone()).run_local("m0");

        assert!(!result.succeeded);
        assert_eq!(
            result.error_message.as_deref(),
            Some("classification failed with exit code 3")
        );
        assert_eq!(mock.calls().len(), 1);
    }
}
