//! Coordination protocol
//!
//! This module defines the messages exchanged between the coordinator
//! (rank 0) and the participants. Message bodies are MessagePack
//! (rmp-serde): fields are written in a fixed order and every collection
//! carries an explicit element count, so values may contain any byte
//! sequence without escaping.
//!
//! # Message Flow
//!
//! ```text
//! Coordinator                     Participant (rank r)
//!     |                              |
//!     |<------- HELLO(r, host) ------|
//!     |                              |
//!     |-------- CONFIG(payload) ---->|
//!     |                              |
//!     |<------- READY(r) ------------|
//!     |                              |
//!     |-------- START -------------->|   barrier released
//!     |                              |
//!     |<------- RESULT(r, record) ---|
//! ```
//!
//! # Message Framing
//!
//! Each message is prefixed with a 4-byte length field (little-endian u32):
//!
//! ```text
//! [4 bytes: message length][N bytes: MessagePack-serialized message]
//! ```

use crate::config::ClusterConfig;
use crate::runner::NodeResult;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Protocol version
///
/// Coordinator and participants must run matching versions.
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest accepted frame body
pub const MAX_MESSAGE_LEN: usize = 100 * 1024 * 1024;

/// Process rank within a run (0 is the coordinator)
pub type Rank = usize;

/// Protocol messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Participant → Coordinator, first message on a new connection
    Hello(HelloMessage),

    /// Coordinator → Participant, the broadcast configuration
    Config(ConfigMessage),

    /// Participant → Coordinator, configuration decoded
    Ready { rank: Rank },

    /// Coordinator → Participant, every rank is ready
    Start,

    /// Participant → Coordinator, the node's single result record
    Result(ResultMessage),
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Hello(_) => "HELLO",
            Message::Config(_) => "CONFIG",
            Message::Ready { .. } => "READY",
            Message::Start => "START",
            Message::Result(_) => "RESULT",
        }
    }
}

/// Hello message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelloMessage {
    pub protocol_version: u32,
    pub rank: Rank,
    /// Configured hostname of the participant
    pub hostname: String,
}

/// Configuration message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigMessage {
    pub protocol_version: u32,
    /// Number of processes in the run, coordinator included
    pub world_size: usize,
    /// `encode_config` output, identical for every participant
    pub payload: Vec<u8>,
}

/// Result message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMessage {
    pub rank: Rank,
    pub result: NodeResult,
}

/// Encode a configuration for broadcast
pub fn encode_config(config: &ClusterConfig) -> Result<Vec<u8>> {
    rmp_serde::to_vec(config).context("Failed to encode configuration")
}

/// Decode a broadcast configuration
pub fn decode_config(payload: &[u8]) -> Result<ClusterConfig> {
    rmp_serde::from_slice(payload).context("Failed to decode configuration")
}

/// Serialize a message to bytes
///
/// Prepends a 4-byte length field for framing.
pub fn serialize_message(msg: &Message) -> Result<Vec<u8>> {
    let msg_bytes = rmp_serde::to_vec(msg).context("Failed to serialize message")?;

    let msg_len = u32::try_from(msg_bytes.len()).context("Message too large to frame")?;
    let mut framed = Vec::with_capacity(4 + msg_bytes.len());
    framed.extend_from_slice(&msg_len.to_le_bytes());
    framed.extend_from_slice(&msg_bytes);

    Ok(framed)
}

/// Read a complete message from a stream
pub async fn read_message<S>(stream: &mut S) -> Result<Message>
where
    S: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    stream
        .read_exact(&mut len_buf)
        .await
        .context("Failed to read message length")?;

    let msg_len = u32::from_le_bytes(len_buf) as usize;

    if msg_len > MAX_MESSAGE_LEN {
        anyhow::bail!("Message too large: {} bytes (max 100MB)", msg_len);
    }

    let mut msg_buf = vec![0u8; msg_len];
    stream
        .read_exact(&mut msg_buf)
        .await
        .context("Failed to read message body")?;

    rmp_serde::from_slice(&msg_buf).context("Failed to deserialize message")
}

/// Write a message to a stream
pub async fn write_message<S>(stream: &mut S, msg: &Message) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let framed = serialize_message(msg)?;

    stream
        .write_all(&framed)
        .await
        .context("Failed to write message")?;

    stream.flush().await.context("Failed to flush stream")?;

    Ok(())
}
