//! External tool invocation
//!
//! Tools are always started from an argument vector with an explicit
//! working directory. No shell is involved, so paths never need quoting.

use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// A fully specified subprocess invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub working_dir: PathBuf,
}

impl ToolInvocation {
    pub fn new(program: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append an option followed by its value
    pub fn opt(self, flag: &str, value: impl Into<OsString>) -> Self {
        self.arg(flag).arg(value)
    }

    /// Arguments as lossy strings (for assertions and log lines)
    pub fn args_lossy(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }
}

impl fmt::Display for ToolInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Runs external tools and reports their exit code
///
/// A process terminated by a signal reports `-1`.
pub trait CommandRunner: Send + Sync {
    fn run(&self, invocation: &ToolInvocation) -> io::Result<i32>;
}

/// Runs tools as real child processes
///
/// Tool output is inherited so it shows up on the node's console.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&self, invocation: &ToolInvocation) -> io::Result<i32> {
        let status = Command::new(&invocation.program)
            .args(&invocation.args)
            .current_dir(&invocation.working_dir)
            .stdin(Stdio::null())
            .status()?;

        Ok(status.code().unwrap_or(-1))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_builder_and_display() {
        let inv = ToolInvocation::new("/opt/arda/bin/arda", "/opt/arda")
            .arg("-c")
            .opt("-O", "/reads/my file.fq");

        assert_eq!(inv.args_lossy(), vec!["-c", "-O", "/reads/my file.fq"]);
        assert_eq!(inv.to_string(), "/opt/arda/bin/arda -c -O /reads/my file.fq");
    }

    #[cfg(unix)]
    #[test]
    fn test_process_runner_exit_codes() {
        let dir = tempfile::tempdir().unwrap();

        let ok = ToolInvocation::new("/bin/sh", dir.path()).opt("-c", "exit 0");
        assert_eq!(ProcessRunner.run(&ok).unwrap(), 0);

        let failed = ToolInvocation::new("/bin/sh", dir.path()).opt("-c", "exit 3");
        assert_eq!(ProcessRunner.run(&failed).unwrap(), 3);

        let missing = ToolInvocation::new(dir.path().join("no-such-tool"), dir.path());
        assert!(ProcessRunner.run(&missing).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_process_runner_uses_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let inv = ToolInvocation::new("/bin/sh", dir.path()).opt("-c", "touch marker");
        assert_eq!(ProcessRunner.run(&inv).unwrap(), 0);
        assert!(dir.path().join("marker").exists());
    }
}
