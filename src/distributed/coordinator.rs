//! Distributed coordinator
//!
//! This module implements rank 0 of a cluster run.
//! The coordinator:
//! - Accepts one connection per participant rank
//! - Broadcasts the configuration
//! - Releases the start barrier
//! - Runs its own classification (if it has work)
//! - Collects one result per rank and aggregates

use crate::config::ClusterConfig;
use crate::distributed::protocol::*;
use crate::distributed::RankTable;
use crate::runner::{CommandRunner, NodeResult, NodeRunner};
use crate::stats::aggregator::{Aggregator, ClusterReport};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;

/// Time a fresh connection has to identify itself
const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

/// Why a connection was not registered
#[derive(Debug, Error)]
pub enum RegisterError {
    #[error("protocol version mismatch from rank {rank}: coordinator {}, participant {theirs}", PROTOCOL_VERSION)]
    VersionMismatch { rank: Rank, theirs: u32 },

    #[error("rank {0} is not part of this run")]
    UnknownRank(Rank),

    #[error("rank {0} is already connected")]
    DuplicateRank(Rank),

    #[error("rank {rank} should be host '{expected}', got '{actual}'")]
    HostMismatch {
        rank: Rank,
        expected: String,
        actual: String,
    },

    #[error("expected HELLO, got {0}")]
    UnexpectedMessage(&'static str),

    #[error("handshake failed: {0:#}")]
    Handshake(anyhow::Error),
}

impl RegisterError {
    /// A version mismatch means the cluster runs mixed builds; nothing
    /// useful can happen after that
    pub fn is_fatal(&self) -> bool {
        matches!(self, RegisterError::VersionMismatch { .. })
    }
}

/// Coordinator side of the coordination channel
///
/// Holds one stream per participant rank. Slot 0 (the coordinator
/// itself) is always empty.
pub struct CoordinatorChannel<S> {
    ranks: RankTable,
    streams: Vec<Option<S>>,
}

impl CoordinatorChannel<TcpStream> {
    /// Accept every participant rank on `listener`
    ///
    /// Handshakes run concurrently, so a connection that never sends
    /// HELLO only holds up itself. Rejected connections are dropped and
    /// logged; the run only fails on timeout or a protocol version
    /// mismatch.
    pub async fn accept(
        listener: &TcpListener,
        ranks: RankTable,
        startup_timeout: Duration,
    ) -> Result<Self> {
        let mut channel = Self::new(ranks);
        let deadline = tokio::time::Instant::now() + startup_timeout;
        let mut pending = JoinSet::new();

        log::info!(
            "Waiting for {} participant(s) to connect",
            channel.ranks.world_size() - 1
        );

        while !channel.is_complete() {
            tokio::select! {
                accepted = listener.accept() => {
                    let (mut stream, addr) =
                        accepted.context("Failed to accept participant connection")?;
                    if let Err(e) = stream.set_nodelay(true) {
                        log::debug!("Could not set TCP_NODELAY for {}: {}", addr, e);
                    }
                    pending.spawn(async move {
                        let hello = tokio::time::timeout(HELLO_TIMEOUT, read_hello(&mut stream)).await;
                        (stream, addr, hello)
                    });
                }

                Some(joined) = pending.join_next(), if !pending.is_empty() => {
                    let (stream, addr, hello) = joined.context("Handshake task panicked")?;
                    let registered = match hello {
                        Ok(hello) => hello.and_then(|hello| channel.bind(hello, stream)),
                        Err(_) => {
                            log::warn!("Connection from {} sent no HELLO, dropped", addr);
                            continue;
                        }
                    };

                    match registered {
                        Ok(rank) => log::info!(
                            "Rank {} ({}) connected from {}",
                            rank,
                            channel.ranks.hostname(rank).unwrap_or("?"),
                            addr
                        ),
                        Err(e) if e.is_fatal() => return Err(e.into()),
                        Err(e) => log::warn!("Rejected connection from {}: {}", addr, e),
                    }
                }

                _ = tokio::time::sleep_until(deadline) => anyhow::bail!(
                    "Timed out after {}s waiting for participants (missing ranks: {:?})",
                    startup_timeout.as_secs(),
                    channel.missing_ranks()
                ),
            }
        }

        log::info!("All participants connected");
        Ok(channel)
    }
}

/// Read the HELLO that opens every participant connection
async fn read_hello<S>(stream: &mut S) -> Result<HelloMessage, RegisterError>
where
    S: AsyncRead + Unpin,
{
    match read_message(stream).await {
        Ok(Message::Hello(hello)) => Ok(hello),
        Ok(other) => Err(RegisterError::UnexpectedMessage(other.kind())),
        Err(e) => Err(RegisterError::Handshake(e)),
    }
}

impl<S> CoordinatorChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(ranks: RankTable) -> Self {
        let streams = (0..ranks.world_size()).map(|_| None).collect();
        Self { ranks, streams }
    }

    pub fn ranks(&self) -> &RankTable {
        &self.ranks
    }

    /// Participant ranks without a registered connection
    pub fn missing_ranks(&self) -> Vec<Rank> {
        self.ranks
            .participants()
            .map(|(rank, _)| rank)
            .filter(|rank| self.streams[*rank].is_none())
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing_ranks().is_empty()
    }

    /// Read HELLO from a new connection and bind it to its rank
    pub async fn register(&mut self, mut stream: S) -> Result<Rank, RegisterError> {
        let hello = read_hello(&mut stream).await?;
        self.bind(hello, stream)
    }

    /// Validate a received HELLO and store its stream under the rank
    fn bind(&mut self, hello: HelloMessage, stream: S) -> Result<Rank, RegisterError> {
        if hello.protocol_version != PROTOCOL_VERSION {
            return Err(RegisterError::VersionMismatch {
                rank: hello.rank,
                theirs: hello.protocol_version,
            });
        }

        let expected = match self.ranks.hostname(hello.rank) {
            Some(host) if hello.rank > 0 => host,
            _ => return Err(RegisterError::UnknownRank(hello.rank)),
        };

        if expected != hello.hostname {
            return Err(RegisterError::HostMismatch {
                rank: hello.rank,
                expected: expected.to_string(),
                actual: hello.hostname,
            });
        }

        let slot = &mut self.streams[hello.rank];
        if slot.is_some() {
            return Err(RegisterError::DuplicateRank(hello.rank));
        }
        *slot = Some(stream);

        Ok(hello.rank)
    }

    /// Send the configuration to every participant
    ///
    /// Returns the configuration decoded from the exact payload that was
    /// sent, so the coordinator works from the same bytes as everyone else.
    pub async fn broadcast(&mut self, config: &ClusterConfig) -> Result<ClusterConfig> {
        let payload = encode_config(config)?;
        let local = decode_config(&payload)?;
        let msg = Message::Config(ConfigMessage {
            protocol_version: PROTOCOL_VERSION,
            world_size: self.ranks.world_size(),
            payload,
        });

        for (rank, host) in self.ranks.participants() {
            let stream = self.streams[rank]
                .as_mut()
                .with_context(|| format!("Rank {} ({}) is not connected", rank, host))?;
            write_message(stream, &msg)
                .await
                .with_context(|| format!("Failed to send configuration to rank {} ({})", rank, host))?;
        }

        Ok(local)
    }

    /// Wait for READY from every participant, then send START to all
    pub async fn barrier(&mut self) -> Result<()> {
        for (rank, host) in self.ranks.participants() {
            let stream = self.streams[rank]
                .as_mut()
                .with_context(|| format!("Rank {} ({}) is not connected", rank, host))?;

            match read_message(stream)
                .await
                .with_context(|| format!("Rank {} ({}) failed before the start barrier", rank, host))?
            {
                Message::Ready { rank: ready } if ready == rank => {
                    log::debug!("Rank {} ({}) ready", rank, host);
                }
                other => anyhow::bail!(
                    "Rank {} ({}) sent {} instead of READY",
                    rank,
                    host,
                    other.kind()
                ),
            }
        }

        for (rank, host) in self.ranks.participants() {
            if let Some(stream) = self.streams[rank].as_mut() {
                write_message(stream, &Message::Start)
                    .await
                    .with_context(|| format!("Failed to release rank {} ({})", rank, host))?;
            }
        }

        log::info!("Start barrier released");
        Ok(())
    }

    /// One result per participant rank, in increasing rank order
    ///
    /// A rank whose connection breaks or misbehaves gets a synthesized
    /// failed result instead.
    pub async fn receive_all(&mut self) -> Vec<NodeResult> {
        let mut results = Vec::with_capacity(self.ranks.world_size().saturating_sub(1));

        for (rank, host) in self.ranks.participants() {
            let result = match self.streams[rank].take() {
                Some(mut stream) => match read_message(&mut stream).await {
                    Ok(Message::Result(msg)) if msg.rank == rank => msg.result,
                    Ok(Message::Result(msg)) => NodeResult::failed(
                        host,
                        format!("result arrived with wrong rank {}", msg.rank),
                    ),
                    Ok(other) => NodeResult::failed(
                        host,
                        format!("unexpected {} from participant", other.kind()),
                    ),
                    Err(e) => NodeResult::failed(
                        host,
                        format!("lost connection to participant: {:#}", e),
                    ),
                },
                None => NodeResult::failed(host, "participant never connected"),
            };

            log::info!("Rank {} ({}): {}", rank, host, result.status_label());
            results.push(result);
        }

        results
    }
}

/// Coordinator run driver
pub struct DistributedCoordinator {
    config: Arc<ClusterConfig>,
    tools: Arc<dyn CommandRunner>,
}

impl DistributedCoordinator {
    pub fn new(config: Arc<ClusterConfig>, tools: Arc<dyn CommandRunner>) -> Self {
        Self { config, tools }
    }

    /// Drive a run over an established channel and aggregate the results
    pub async fn run<S>(self, mut channel: CoordinatorChannel<S>) -> Result<ClusterReport>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let world_size = channel.ranks().world_size();

        let config = Arc::new(
            channel
                .broadcast(&self.config)
                .await
                .context("Configuration broadcast failed")?,
        );
        log::info!("Configuration broadcast to {} participant(s)", world_size - 1);

        channel.barrier().await?;

        // Local work runs on the blocking pool while remote results drain
        let local = if config.coordinator_has_work() {
            let runner = NodeRunner::new(config.clone(), self.tools.clone());
            let host = config.coordinator_host.clone();
            Some(tokio::task::spawn_blocking(move || runner.run_local(&host)))
        } else {
            log::info!("Coordinator has no local work");
            None
        };

        let remote = channel.receive_all().await;

        let mut results = Vec::with_capacity(remote.len() + 1);
        if let Some(handle) = local {
            results.push(handle.await.context("Local classification task failed")?);
        }
        results.extend(remote);

        let succeeded = results.iter().filter(|r| r.succeeded).count();
        log::info!("Success: {}/{} nodes", succeeded, results.len());

        let aggregator = Aggregator::new(config, self.tools, world_size);
        tokio::task::spawn_blocking(move || aggregator.aggregate(results))
            .await
            .context("Aggregation task failed")
    }
}
