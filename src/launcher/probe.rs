//! Remote host checks
//!
//! Preflight reaches other nodes through the [`HostProbe`] trait;
//! [`SshProbe`] is the production implementation.

use anyhow::{Context, Result};
use std::path::Path;
use std::process::{Command, Stdio};

/// Remote checks used by preflight
pub trait HostProbe: Send + Sync {
    /// Run a trivial remote command; returns the hostname the node reports
    fn check_reachable(&self, host: &str) -> Result<String>;

    /// Succeeds if `path` is an executable file on `host`
    fn check_executable(&self, host: &str, path: &Path) -> Result<()>;
}

/// Probes hosts over non-interactive ssh
///
/// Requires passwordless ssh from the coordinator to every participant.
#[derive(Debug, Clone)]
pub struct SshProbe {
    connect_timeout_secs: u32,
}

impl Default for SshProbe {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 5,
        }
    }
}

impl SshProbe {
    fn command(&self, host: &str) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.connect_timeout_secs))
            .arg(host)
            .stdin(Stdio::null());
        cmd
    }
}

impl HostProbe for SshProbe {
    fn check_reachable(&self, host: &str) -> Result<String> {
        let output = self
            .command(host)
            .arg("hostname")
            .output()
            .context("Failed to run ssh")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("ssh failed: {}", stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn check_executable(&self, host: &str, path: &Path) -> Result<()> {
        let status = self
            .command(host)
            .arg("test")
            .arg("-x")
            .arg(shell_quote(&path.to_string_lossy()))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .context("Failed to run ssh")?;

        if !status.success() {
            anyhow::bail!("{} not found or not executable", path.display());
        }
        Ok(())
    }
}

/// Quote one word for the remote shell that ssh hands its command to
pub fn shell_quote(word: &str) -> String {
    let is_plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-:=,+@%".contains(c));
    if is_plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::collections::HashSet;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Scripted probe answers, recording every probed host
    #[derive(Default)]
    pub struct MockProbe {
        pub unreachable: HashSet<String>,
        /// `(host, path)` pairs that are missing
        pub missing: HashSet<(String, PathBuf)>,
        pub probed: Mutex<Vec<String>>,
    }

    impl MockProbe {
        pub fn probed_hosts(&self) -> Vec<String> {
            let mut hosts = self.probed.lock().unwrap().clone();
            hosts.sort();
            hosts.dedup();
            hosts
        }
    }

    impl HostProbe for MockProbe {
        fn check_reachable(&self, host: &str) -> Result<String> {
            self.probed.lock().unwrap().push(host.to_string());
            if self.unreachable.contains(host) {
                anyhow::bail!("ssh failed: connection timed out");
            }
            Ok(host.to_string())
        }

        fn check_executable(&self, host: &str, path: &Path) -> Result<()> {
            self.probed.lock().unwrap().push(host.to_string());
            if self.missing.contains(&(host.to_string(), path.to_path_buf())) {
                anyhow::bail!("{} not found or not executable", path.display());
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/opt/arda/bin/arda"), "/opt/arda/bin/arda");
        assert_eq!(shell_quote("m0:47100"), "m0:47100");
        assert_eq!(shell_quote("/opt/my arda"), "'/opt/my arda'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("$(rm -rf /)"), "'$(rm -rf /)'");
    }
}
