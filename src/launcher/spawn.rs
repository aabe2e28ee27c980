//! Participant process startup
//!
//! Each participant is started on its node over ssh, running this same
//! program in participant mode.

use super::probe::shell_quote;
use crate::config::ClusterConfig;
use crate::distributed::{RankTable, Rank};
use crate::runner::ToolInvocation;
use anyhow::{Context, Result};
use std::process::{Child, Command, Stdio};

/// A started participant process
pub struct RemoteParticipant {
    pub rank: Rank,
    pub host: String,
    child: Child,
}

/// The ssh command line that starts `rank` on `host`
///
/// ssh passes the remote command through the remote shell, so every
/// remote word is quoted.
pub fn participant_invocation(
    config: &ClusterConfig,
    coordinator_addr: &str,
    rank: Rank,
    host: &str,
    verbose: bool,
) -> ToolInvocation {
    let mut remote = vec![
        config.orchestrator_path().to_string_lossy().into_owned(),
        "--mode".to_string(),
        "participant".to_string(),
        "--coordinator".to_string(),
        coordinator_addr.to_string(),
        "--rank".to_string(),
        rank.to_string(),
        "--host".to_string(),
        host.to_string(),
    ];
    if verbose {
        remote.push("-v".to_string());
    }

    let mut inv = ToolInvocation::new("ssh", &config.install_dir)
        .opt("-o", "BatchMode=yes")
        .arg(host);
    for word in &remote {
        inv = inv.arg(shell_quote(word));
    }
    inv
}

/// Start one participant process per non-coordinator rank
///
/// Processes started before a failure are killed again.
pub fn spawn_participants(
    config: &ClusterConfig,
    table: &RankTable,
    coordinator_addr: &str,
    verbose: bool,
) -> Result<Vec<RemoteParticipant>> {
    let mut started = Vec::new();

    for (rank, host) in table.participants() {
        let inv = participant_invocation(config, coordinator_addr, rank, host, verbose);
        log::debug!("Starting rank {}: {}", rank, inv);

        let spawned = Command::new(&inv.program)
            .args(&inv.args)
            .current_dir(&inv.working_dir)
            .stdin(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to start participant on {}", host));

        match spawned {
            Ok(child) => {
                log::info!("Started rank {} on {} (pid {})", rank, host, child.id());
                started.push(RemoteParticipant {
                    rank,
                    host: host.to_string(),
                    child,
                });
            }
            Err(e) => {
                terminate(started);
                return Err(e);
            }
        }
    }

    Ok(started)
}

/// Wait for participant processes after a completed run
pub fn wait_participants(participants: Vec<RemoteParticipant>) {
    for mut p in participants {
        match p.child.wait() {
            Ok(status) if status.success() => {
                log::debug!("Rank {} ({}) exited", p.rank, p.host)
            }
            Ok(status) => log::warn!("Rank {} ({}) exited with {}", p.rank, p.host, status),
            Err(e) => log::warn!("Could not wait for rank {} ({}): {}", p.rank, p.host, e),
        }
    }
}

/// Kill participant processes after a failed startup
pub fn terminate(participants: Vec<RemoteParticipant>) {
    for mut p in participants {
        if let Err(e) = p.child.kill() {
            log::debug!("Kill rank {} ({}): {}", p.rank, p.host, e);
        }
        let _ = p.child.wait();
    }
}
