//! Launcher and preflight
//!
//! Coordinator-only checks that run before any node work begins:
//!
//! ```text
//! Start → LoadConfig → BuildHostList → CheckConnectivity → CheckBinaryPresent → Ready
//!             └──────────────┴─────────────────┴──────────────────┴────→ Aborted
//! ```
//!
//! Connectivity and binary checks are strict: one unreachable host or one
//! missing executable aborts the run, because a node lost mid-run cannot
//! be replaced. Hosts without assigned inputs never enter the host list
//! and are never contacted.

pub mod probe;
pub mod spawn;

pub use probe::{HostProbe, SshProbe};

use crate::config::{ClusterConfig, ConfigError};
use rayon::prelude::*;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Preflight states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreflightState {
    Start,
    LoadConfig,
    BuildHostList,
    CheckConnectivity,
    CheckBinaryPresent,
    Ready,
    Aborted,
}

impl fmt::Display for PreflightState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Why preflight aborted
#[derive(Debug, Error)]
pub enum PreflightError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no nodes have reads configured")]
    NoWork,

    #[error("failed to write host file {}: {source}", path.display())]
    HostFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot reach {}", describe(.0))]
    Unreachable(Vec<HostCheck>),

    #[error("required executable missing on {}", describe(.0))]
    MissingBinary(Vec<HostCheck>),
}

fn describe(failures: &[HostCheck]) -> String {
    failures
        .iter()
        .map(|c| format!("{} ({})", c.host, c.detail))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Outcome of one remote check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCheck {
    pub host: String,
    pub ok: bool,
    /// Remote hostname on success, failure reason otherwise
    pub detail: String,
}

/// A cluster that passed preflight
#[derive(Debug, Clone)]
pub struct ReadyCluster {
    pub config: ClusterConfig,
    /// Coordinator first, then every active participant
    pub hosts: Vec<String>,
    pub host_file: PathBuf,
    pub connectivity: Vec<HostCheck>,
}

/// Host list for the run: the coordinator, then workers with inputs
///
/// Fails when nobody would do any work.
pub fn build_host_list(config: &ClusterConfig) -> Result<Vec<String>, PreflightError> {
    let participants = config.active_participants();

    if participants.is_empty() && !config.coordinator_has_work() {
        return Err(PreflightError::NoWork);
    }

    let mut hosts = Vec::with_capacity(participants.len() + 1);
    hosts.push(config.coordinator_host.clone());
    hosts.extend(participants);
    Ok(hosts)
}

/// Write one host per line
pub fn write_host_file(path: &Path, hosts: &[String]) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let mut contents = hosts.join("\n");
    contents.push('\n');
    std::fs::write(path, contents)
}

/// Preflight state machine
pub struct Preflight<'a> {
    probe: &'a dyn HostProbe,
    state: PreflightState,
    history: Vec<PreflightState>,
}

impl<'a> Preflight<'a> {
    pub fn new(probe: &'a dyn HostProbe) -> Self {
        Self {
            probe,
            state: PreflightState::Start,
            history: vec![PreflightState::Start],
        }
    }

    pub fn state(&self) -> PreflightState {
        self.state
    }

    /// Every state visited so far
    pub fn history(&self) -> &[PreflightState] {
        &self.history
    }

    fn enter(&mut self, next: PreflightState) {
        log::debug!("Preflight: {} -> {}", self.state, next);
        self.state = next;
        self.history.push(next);
    }

    fn abort(&mut self, err: PreflightError) -> PreflightError {
        log::error!("Preflight aborted: {}", err);
        self.enter(PreflightState::Aborted);
        err
    }

    /// `LoadConfig`
    pub fn load(&mut self, path: &Path) -> Result<ClusterConfig, PreflightError> {
        self.enter(PreflightState::LoadConfig);
        ClusterConfig::load(path).map_err(|e| self.abort(e.into()))
    }

    /// `BuildHostList` through `Ready`
    pub fn check(&mut self, config: ClusterConfig) -> Result<ReadyCluster, PreflightError> {
        self.enter(PreflightState::BuildHostList);
        let hosts = build_host_list(&config).map_err(|e| self.abort(e))?;

        let host_file = config.host_file_path();
        write_host_file(&host_file, &hosts).map_err(|source| {
            self.abort(PreflightError::HostFile {
                path: host_file.clone(),
                source,
            })
        })?;
        log::info!("Host file: {}", host_file.display());

        let participants = &hosts[1..];

        self.enter(PreflightState::CheckConnectivity);
        let connectivity = self.check_connectivity(participants);
        let unreachable: Vec<HostCheck> = connectivity.iter().filter(|c| !c.ok).cloned().collect();
        if !unreachable.is_empty() {
            return Err(self.abort(PreflightError::Unreachable(unreachable)));
        }

        self.enter(PreflightState::CheckBinaryPresent);
        let required = [config.classifier_path(), config.orchestrator_path()];
        let missing = self.check_binaries(participants, &required);
        if !missing.is_empty() {
            return Err(self.abort(PreflightError::MissingBinary(missing)));
        }

        self.enter(PreflightState::Ready);
        Ok(ReadyCluster {
            config,
            hosts,
            host_file,
            connectivity,
        })
    }

    fn check_connectivity(&self, hosts: &[String]) -> Vec<HostCheck> {
        let probe = self.probe;
        let checks: Vec<HostCheck> = hosts
            .par_iter()
            .map(|host| match probe.check_reachable(host) {
                Ok(remote) => HostCheck {
                    host: host.clone(),
                    ok: true,
                    detail: remote,
                },
                Err(e) => HostCheck {
                    host: host.clone(),
                    ok: false,
                    detail: format!("{:#}", e),
                },
            })
            .collect();

        for c in &checks {
            if c.ok {
                log::info!("  {}: OK (hostname={})", c.host, c.detail);
            } else {
                log::error!("  {}: FAILED ({})", c.host, c.detail);
            }
        }
        checks
    }

    /// Failed checks only
    fn check_binaries(&self, hosts: &[String], required: &[PathBuf]) -> Vec<HostCheck> {
        let probe = self.probe;
        let failures: Vec<HostCheck> = hosts
            .par_iter()
            .filter_map(|host| {
                let missing: Vec<String> = required
                    .iter()
                    .filter_map(|path| probe.check_executable(host, path).err())
                    .map(|e| format!("{:#}", e))
                    .collect();

                if missing.is_empty() {
                    log::info!("  {}: binaries OK", host);
                    None
                } else {
                    Some(HostCheck {
                        host: host.clone(),
                        ok: false,
                        detail: missing.join("; "),
                    })
                }
            })
            .collect();

        for c in &failures {
            log::error!("  {}: {}", c.host, c.detail);
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::probe::mock::MockProbe;
    use super::*;
    use crate::config::tests::{sample_config, SAMPLE};
    use super::PreflightState::*;

    fn scratch_config(dir: &tempfile::TempDir) -> ClusterConfig {
        let mut config = sample_config();
        config.install_dir = dir.path().to_path_buf();
        config
    }

    #[test]
    fn test_host_list_skips_idle_workers() {
        let config = sample_config();
        assert_eq!(build_host_list(&config).unwrap(), vec!["m0", "w1"]);
    }

    #[test]
    fn test_host_list_keeps_orchestrating_coordinator() {
        let mut config = sample_config();
        config.options.coordinator_participates = false;
        assert_eq!(build_host_list(&config).unwrap(), vec!["m0", "w1"]);

        config.per_node_inputs.remove("w1");
        assert!(matches!(build_host_list(&config), Err(PreflightError::NoWork)));

        config.options.coordinator_participates = true;
        assert_eq!(build_host_list(&config).unwrap(), vec!["m0"]);
    }

    #[test]
    fn test_ready_path() {
        let dir = tempfile::tempdir().unwrap();
        let probe = MockProbe::default();
        let mut preflight = Preflight::new(&probe);

        let ready = preflight.check(scratch_config(&dir)).unwrap();

        assert_eq!(ready.hosts, vec!["m0", "w1"]);
        assert_eq!(
            std::fs::read_to_string(&ready.host_file).unwrap(),
            "m0\nw1\n"
        );
        assert_eq!(ready.host_file, dir.path().join("config").join("cluster_hosts.txt"));
        // w2 has no reads and the coordinator is local
        assert_eq!(probe.probed_hosts(), vec!["w1"]);
        assert_eq!(preflight.state(), Ready);
        assert_eq!(
            preflight.history(),
            &[Start, BuildHostList, CheckConnectivity, CheckBinaryPresent, Ready]
        );
    }

    #[test]
    fn test_unreachable_host_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let mut probe = MockProbe::default();
        probe.unreachable.insert("w1".to_string());
        let mut preflight = Preflight::new(&probe);

        let err = preflight.check(scratch_config(&dir)).unwrap_err();

        match err {
            PreflightError::Unreachable(ref failed) => assert_eq!(failed[0].host, "w1"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(err.to_string().starts_with("cannot reach w1"));
        assert_eq!(preflight.state(), Aborted);
        assert!(!preflight.history().contains(&CheckBinaryPresent));
    }

    #[test]
    fn test_missing_binary_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let config = scratch_config(&dir);
        let mut probe = MockProbe::default();
        probe
            .missing
            .insert(("w1".to_string(), config.orchestrator_path()));
        let mut preflight = Preflight::new(&probe);

        let err = preflight.check(config).unwrap_err();

        assert!(matches!(err, PreflightError::MissingBinary(ref f) if f.len() == 1));
        assert!(err.to_string().contains("arda-cluster not found"));
        assert_eq!(preflight.state(), Aborted);
    }

    #[test]
    fn test_load_failure_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster.conf");
        std::fs::write(&path, SAMPLE.replace("database = /data/db", "")).unwrap();
        let probe = MockProbe::default();
        let mut preflight = Preflight::new(&probe);

        let err = preflight.load(&path).unwrap_err();

        assert!(matches!(err, PreflightError::Config(ConfigError::MissingField(_))));
        assert_eq!(preflight.history(), &[Start, LoadConfig, Aborted]);
    }

    #[test]
    fn test_no_work_aborts_before_contacting_hosts() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = scratch_config(&dir);
        config.per_node_inputs.clear();
        let probe = MockProbe::default();
        let mut preflight = Preflight::new(&probe);

        assert!(matches!(preflight.check(config), Err(PreflightError::NoWork)));
        assert!(probe.probed_hosts().is_empty());
        assert!(!dir.path().join("config").exists());
    }
}
