//! Participant node service
//!
//! Runs on every participant node for the duration of one cluster run:
//! connect to the coordinator, receive the configuration, wait at the
//! start barrier, classify the local inputs, report one result.

use crate::config::ClusterConfig;
use crate::distributed::protocol::*;
use crate::runner::{CommandRunner, NodeResult, NodeRunner};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::sleep;

/// Connection attempts before giving up on the coordinator
const CONNECT_ATTEMPTS: u32 = 30;

/// Pause between connection attempts
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Participant side of the coordination channel
pub struct ParticipantChannel<S> {
    stream: S,
    rank: Rank,
    world_size: usize,
}

impl ParticipantChannel<TcpStream> {
    /// Connect to the coordinator and identify as `rank`
    ///
    /// Participants may start before the coordinator listens, so
    /// refused connections are retried for a while.
    pub async fn connect(addr: &str, rank: Rank, hostname: &str) -> Result<Self> {
        let mut attempt = 1;
        let stream = loop {
            match TcpStream::connect(addr).await {
                Ok(stream) => break stream,
                Err(e) if attempt < CONNECT_ATTEMPTS => {
                    log::debug!(
                        "Connect to {} failed (attempt {}/{}): {}",
                        addr,
                        attempt,
                        CONNECT_ATTEMPTS,
                        e
                    );
                    attempt += 1;
                    sleep(CONNECT_RETRY_DELAY).await;
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!(
                            "Failed to connect to coordinator {} after {} attempts",
                            addr, CONNECT_ATTEMPTS
                        )
                    })
                }
            }
        };

        stream.set_nodelay(true).context("Failed to set TCP_NODELAY")?;
        log::info!("Connected to coordinator {}", addr);

        Self::handshake(stream, rank, hostname).await
    }
}

impl<S> ParticipantChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Send HELLO over an open stream
    pub async fn handshake(mut stream: S, rank: Rank, hostname: &str) -> Result<Self> {
        let hello = Message::Hello(HelloMessage {
            protocol_version: PROTOCOL_VERSION,
            rank,
            hostname: hostname.to_string(),
        });
        write_message(&mut stream, &hello)
            .await
            .context("Failed to send HELLO")?;

        Ok(Self {
            stream,
            rank,
            world_size: 0,
        })
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// Processes in the run, known once the configuration arrived
    pub fn world_size(&self) -> usize {
        self.world_size
    }

    /// Receive side of the configuration broadcast
    pub async fn receive_config(&mut self) -> Result<ClusterConfig> {
        let msg = read_message(&mut self.stream)
            .await
            .context("Failed to receive configuration")?;

        let config_msg = match msg {
            Message::Config(m) => m,
            other => anyhow::bail!("Expected CONFIG, got {}", other.kind()),
        };

        if config_msg.protocol_version != PROTOCOL_VERSION {
            anyhow::bail!(
                "Protocol version mismatch: coordinator {}, participant {}",
                config_msg.protocol_version,
                PROTOCOL_VERSION
            );
        }

        self.world_size = config_msg.world_size;
        decode_config(&config_msg.payload)
    }

    /// Report READY and wait for START
    pub async fn barrier(&mut self) -> Result<()> {
        write_message(&mut self.stream, &Message::Ready { rank: self.rank })
            .await
            .context("Failed to send READY")?;

        match read_message(&mut self.stream)
            .await
            .context("Lost coordinator at the start barrier")?
        {
            Message::Start => Ok(()),
            other => anyhow::bail!("Expected START, got {}", other.kind()),
        }
    }

    /// Send this node's result; the channel is finished afterwards
    pub async fn send(mut self, result: NodeResult) -> Result<()> {
        let msg = Message::Result(ResultMessage {
            rank: self.rank,
            result,
        });
        write_message(&mut self.stream, &msg)
            .await
            .context("Failed to send result")
    }
}

/// Participant run driver
pub struct NodeService {
    rank: Rank,
    hostname: String,
    tools: Arc<dyn CommandRunner>,
}

impl NodeService {
    pub fn new(rank: Rank, hostname: impl Into<String>, tools: Arc<dyn CommandRunner>) -> Self {
        Self {
            rank,
            hostname: hostname.into(),
            tools,
        }
    }

    /// Connect to `coordinator_addr` and serve one run
    pub async fn run(self, coordinator_addr: &str) -> Result<NodeResult> {
        let channel = ParticipantChannel::connect(coordinator_addr, self.rank, &self.hostname).await?;
        self.serve(channel).await
    }

    /// Serve one run over an established channel
    ///
    /// Per-node failures end up in the returned result; only transport
    /// problems are errors.
    pub async fn serve<S>(self, mut channel: ParticipantChannel<S>) -> Result<NodeResult>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let config = Arc::new(channel.receive_config().await?);
        log::info!(
            "Configuration received (rank {} of {})",
            channel.rank(),
            channel.world_size()
        );

        channel.barrier().await?;

        let runner = NodeRunner::new(config, self.tools);
        let hostname = self.hostname;
        let result = tokio::task::spawn_blocking(move || runner.run_local(&hostname))
            .await
            .context("Classification task failed")?;

        channel.send(result.clone()).await?;
        log::info!("Result sent: {}", result.status_label());

        Ok(result)
    }
}
