//! Connection lifecycle state machine
//!
//! A [`Connection`] never touches a socket itself. Every input goes through
//! [`Connection::dispatch`], which moves the state and returns the effects the
//! owner has to carry out.
//!
//! ```text
//! Idle --Connect--> Connecting --TransportOpened--> Open --Frame(Connected)--> Open(confirmed)
//!   \                    |                           |
//!    \--Disconnect--> Closed <--PeerClosed / TransportFailed / Disconnect--+
//! ```

use std::fmt;

use tracing::debug;

use super::types::{ConnectionStatus, FeedEvent, Sample, StreamError, SubscriptionTarget};
use crate::transport::CloseFrame;

/// Identity of one connection attempt within a controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// The id following this one
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Why the controller closed a connection on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Reconnect,
    TargetChanged,
    Disconnect,
    Teardown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reconnect => "reconnect",
            Self::TargetChanged => "target changed",
            Self::Disconnect => "explicit disconnect",
            Self::Teardown => "teardown",
        }
    }

    /// Normal-closure frame carrying this reason
    pub fn close_frame(&self) -> CloseFrame {
        CloseFrame::normal(self.as_str())
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input to the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionInput {
    /// Start the handshake
    Connect,
    /// The transport finished its handshake
    TransportOpened,
    /// A decoded frame arrived
    Frame(FeedEvent),
    /// The peer closed the channel, with its close frame if any
    PeerClosed(Option<CloseFrame>),
    /// Socket-level failure
    TransportFailed(String),
    /// The owner is tearing the connection down
    Disconnect(CloseReason),
}

/// Work the owner must perform after a transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Open the duplex channel for the connection's target
    OpenChannel,
    ClearError,
    PushSample(Sample),
    SetError(StreamError),
    /// Send this close frame and release the channel
    SendClose(CloseFrame),
}

/// One connection attempt for one target
///
/// `Closed` is terminal; retrying means creating a new `Connection`.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    target: SubscriptionTarget,
    state: ConnectionStatus,
}

impl Connection {
    pub fn new(id: ConnectionId, target: SubscriptionTarget) -> Self {
        Self {
            id,
            target,
            state: ConnectionStatus::Idle,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn target(&self) -> &SubscriptionTarget {
        &self.target
    }

    pub fn state(&self) -> ConnectionStatus {
        self.state
    }

    /// Apply one input and return the resulting effects
    pub fn dispatch(&mut self, input: ConnectionInput) -> Vec<Effect> {
        use ConnectionInput as In;
        use ConnectionStatus as S;

        match (self.state, input) {
            (S::Closed, input) => {
                debug!(connection_id = %self.id, ?input, "Input after close ignored");
                vec![]
            }

            (S::Idle, In::Connect) => {
                self.state = S::Connecting;
                vec![Effect::OpenChannel]
            }
            (S::Connecting | S::Open { .. }, In::Connect) => {
                debug!(connection_id = %self.id, "Connect while live, ignoring");
                vec![]
            }

            (S::Connecting, In::TransportOpened) => {
                self.state = S::Open { confirmed: false };
                vec![Effect::ClearError]
            }

            (S::Connecting | S::Open { .. }, In::Frame(FeedEvent::Connected { .. })) => {
                self.state = S::Open { confirmed: true };
                vec![]
            }
            (S::Open { .. }, In::Frame(FeedEvent::Sample(sample))) => {
                vec![Effect::PushSample(sample), Effect::ClearError]
            }
            (S::Connecting | S::Open { .. }, In::Frame(FeedEvent::Error { message })) => {
                vec![Effect::SetError(StreamError::Application { message })]
            }

            (S::Connecting | S::Open { .. }, In::PeerClosed(frame)) => {
                self.state = S::Closed;
                match frame {
                    Some(frame) if frame.is_normal() => vec![],
                    Some(frame) => vec![Effect::SetError(StreamError::AbnormalClose {
                        code: Some(frame.code),
                        reason: frame.reason,
                    })],
                    None => vec![Effect::SetError(StreamError::AbnormalClose {
                        code: None,
                        reason: "connection ended without a close frame".to_string(),
                    })],
                }
            }
            (S::Connecting | S::Open { .. }, In::TransportFailed(message)) => {
                self.state = S::Closed;
                vec![Effect::SetError(StreamError::Transport { message })]
            }

            (S::Connecting | S::Open { .. }, In::Disconnect(reason)) => {
                self.state = S::Closed;
                vec![Effect::SendClose(reason.close_frame())]
            }
            (S::Idle, In::Disconnect(_)) => {
                self.state = S::Closed;
                vec![]
            }

            (state, input) => {
                debug!(connection_id = %self.id, %state, ?input, "Input not valid in this state");
                vec![]
            }
        }
    }
}
