//! Signaling Channel.
//!
//! A reconnecting WebSocket transport that carries [`SignalingEnvelope`]
//! values to and from the relay. It never interprets payloads.

pub mod client;

pub use client::SignalingClient;

use crate::errors::ClientError;
use mesh_protocol::codec::DEFAULT_MAX_FRAME_BYTES;
use mesh_protocol::SignalingEnvelope;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Default capacity of the outbound queue.
pub const DEFAULT_OUTBOUND_QUEUE: usize = 256;

/// Transport settings for [`SignalingClient`].
#[derive(Debug, Clone, Copy)]
pub struct SignalingSettings {
    pub connect_timeout: Duration,
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    /// Envelopes held while disconnected before sends are rejected.
    pub outbound_queue: usize,
    pub max_frame_bytes: usize,
}

impl Default for SignalingSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            reconnect_attempts: 5,
            reconnect_delay: Duration::from_secs(1),
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

/// What the channel delivers to its consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingEvent {
    Envelope(SignalingEnvelope),
    /// The transport came back after a loss. Room membership must be re-sent.
    Reconnected,
    /// Reconnection gave up; no further events follow.
    Closed,
}

/// Cloneable handle for queueing outbound envelopes.
///
/// Sends never wait on the network: envelopes are queued and flushed by the
/// transport, including after a reconnect.
#[derive(Debug, Clone)]
pub struct SignalingSender {
    sender: mpsc::Sender<SignalingEnvelope>,
}

impl SignalingSender {
    /// Create a sender over a fresh queue. The transport (or a test) drains
    /// the receiver.
    #[must_use]
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<SignalingEnvelope>) {
        let (sender, receiver) = mpsc::channel(buffer);
        (Self { sender }, receiver)
    }

    /// Queue an envelope.
    ///
    /// # Errors
    ///
    /// Returns `Signaling` if the queue is full or the transport has shut down.
    pub fn send(&self, envelope: SignalingEnvelope) -> Result<(), ClientError> {
        self.sender.try_send(envelope).map_err(|e| match e {
            TrySendError::Full(env) => {
                ClientError::Signaling(format!("outbound queue full, dropped {}", env.kind()))
            }
            TrySendError::Closed(_) => ClientError::Signaling("channel closed".to_string()),
        })
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
