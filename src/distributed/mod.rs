//! Distributed run implementation
//!
//! # Architecture
//!
//! One process per cluster node, connected in a star around the
//! coordinator:
//!
//! - **Coordinator** (rank 0): listens, broadcasts the configuration,
//!   releases the start barrier, collects one result per rank, aggregates
//! - **Participant** (rank 1..N): connects, receives the configuration,
//!   runs local classification, reports one result
//!
//! Ranks are fixed by the launcher's host list and never reassigned.
//!
//! # Modules
//!
//! - `protocol`: message definitions and framing
//! - `coordinator`: coordinator channel and run driver
//! - `node_service`: participant channel and run driver

pub mod coordinator;
pub mod node_service;
pub mod protocol;

pub use coordinator::{CoordinatorChannel, DistributedCoordinator};
pub use node_service::{NodeService, ParticipantChannel};
pub use protocol::{
    decode_config, encode_config, ConfigMessage, HelloMessage, Message, Rank, ResultMessage,
    PROTOCOL_VERSION,
};

/// Static rank → host binding for one run
///
/// Rank 0 is always the coordinator; participants follow in host list
/// order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankTable {
    hosts: Vec<String>,
}

impl RankTable {
    /// `hosts[0]` must be the coordinator
    pub fn new(hosts: Vec<String>) -> anyhow::Result<Self> {
        if hosts.is_empty() {
            anyhow::bail!("Rank table needs at least the coordinator host");
        }
        Ok(Self { hosts })
    }

    /// Processes in the run, coordinator included
    pub fn world_size(&self) -> usize {
        self.hosts.len()
    }

    pub fn hostname(&self, rank: Rank) -> Option<&str> {
        self.hosts.get(rank).map(String::as_str)
    }

    /// Participant ranks with their hosts, in increasing rank order
    pub fn participants(&self) -> impl Iterator<Item = (Rank, &str)> {
        self.hosts
            .iter()
            .enumerate()
            .skip(1)
            .map(|(rank, host)| (rank, host.as_str()))
    }
}
