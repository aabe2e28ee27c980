//! CLI argument parsing using clap

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExecutionMode {
    /// Launch mode (default) - preflight, start participants, coordinate the run
    Launch,
    /// Preflight mode - validate configuration and cluster reachability only
    Preflight,
    /// Participant mode - started by the launcher on each node (internal)
    Participant,
}

/// ARDA cluster coordinator
#[derive(Parser, Debug, Clone)]
#[command(name = "arda-cluster")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Execution mode: launch, preflight, or participant
    #[arg(long, value_enum, default_value = "launch")]
    pub mode: ExecutionMode,

    /// Path to cluster configuration file (INI format)
    #[arg(short = 'c', long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Run pre-flight checks only (same as --mode preflight)
    #[arg(short = 'p', long)]
    pub preflight: bool,

    /// Enable verbose (debug) logging
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Coordination channel port (overrides [options] port)
    #[arg(long)]
    pub port: Option<u16>,

    /// Coordinator address host:port (participant mode only)
    #[arg(long, value_name = "HOST:PORT")]
    pub coordinator: Option<String>,

    /// Rank of this process (participant mode only)
    #[arg(long)]
    pub rank: Option<usize>,

    /// Configured hostname of this node (participant mode only, defaults to the system hostname)
    #[arg(long = "host", value_name = "NAME")]
    pub host: Option<String>,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Mode after folding in the `--preflight` shorthand
    pub fn effective_mode(&self) -> ExecutionMode {
        if self.preflight {
            ExecutionMode::Preflight
        } else {
            self.mode
        }
    }

    /// Validate CLI arguments
    pub fn validate(&self) -> anyhow::Result<()> {
        match self.effective_mode() {
            ExecutionMode::Participant => {
                // Participants receive the configuration over the wire
                if self.coordinator.is_none() {
                    anyhow::bail!("participant mode requires --coordinator");
                }
                match self.rank {
                    None => anyhow::bail!("participant mode requires --rank"),
                    Some(0) => anyhow::bail!("rank 0 is reserved for the coordinator"),
                    Some(_) => {}
                }
            }
            ExecutionMode::Launch | ExecutionMode::Preflight => {
                if self.config.is_none() {
                    anyhow::bail!("config file required (-c <file>)");
                }
            }
        }

        Ok(())
    }
}
