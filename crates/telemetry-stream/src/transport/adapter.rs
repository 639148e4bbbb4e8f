//! Transport traits and wire-level message types

use async_trait::async_trait;
use bytes::Bytes;

use super::TransportError;
use crate::streaming::SubscriptionTarget;

/// Close code for an intentional, non-error teardown
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close frame exchanged when a channel shuts down
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
}

impl CloseFrame {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Normal closure (code 1000) with a human-readable reason
    pub fn normal(reason: impl Into<String>) -> Self {
        Self::new(NORMAL_CLOSURE, reason)
    }

    pub fn is_normal(&self) -> bool {
        self.code == NORMAL_CLOSURE
    }
}

/// Message read from a duplex channel
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    Text(String),
    Binary(Bytes),
    /// Peer closed the channel, with its close frame if one was sent
    Close(Option<CloseFrame>),
}

/// One open, message-framed duplex channel
///
/// Owned by exactly one connection task. Dropping the channel releases the
/// underlying socket.
#[async_trait]
pub trait DuplexChannel: Send {
    /// Read the next message
    ///
    /// Returns `None` once the channel has ended without a close frame.
    async fn recv(&mut self) -> Option<Result<ChannelMessage, TransportError>>;

    /// Send a close frame and shut the channel down
    async fn close(&mut self, frame: CloseFrame) -> Result<(), TransportError>;
}

/// Opens duplex channels addressed to a subscription target
///
/// The target is carried in the channel's addressing (e.g. query parameters
/// of the handshake request); nothing is sent on the channel afterwards.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    async fn open(
        &self,
        target: &SubscriptionTarget,
    ) -> Result<Box<dyn DuplexChannel>, TransportError>;
}
