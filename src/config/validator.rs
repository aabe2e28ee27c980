//! Configuration validation
//!
//! Static topology checks run once, at load time, on the coordinator.

use super::*;

/// Validate required fields and the reads → host invariant
///
/// Fields are checked in a fixed order (master, workers, install
/// directory, database) so the reported field is deterministic.
pub fn validate_topology(config: &ClusterConfig) -> Result<(), ConfigError> {
    if config.coordinator_host.is_empty() {
        return Err(ConfigError::MissingField(ConfigField::CoordinatorHost));
    }
    if config.participant_hosts.is_empty() {
        return Err(ConfigError::MissingField(ConfigField::ParticipantHosts));
    }
    if config.install_dir.as_os_str().is_empty() {
        return Err(ConfigError::MissingField(ConfigField::InstallDir));
    }
    if config.database_path.as_os_str().is_empty() {
        return Err(ConfigError::MissingField(ConfigField::DatabasePath));
    }

    for host in config.per_node_inputs.keys() {
        if !is_known_host(config, host) {
            return Err(ConfigError::UnknownHost { host: host.clone() });
        }
    }

    Ok(())
}

fn is_known_host(config: &ClusterConfig, host: &str) -> bool {
    host == config.coordinator_host || config.participant_hosts.iter().any(|h| h == host)
}
