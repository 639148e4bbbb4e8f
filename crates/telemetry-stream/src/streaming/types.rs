//! Types for live telemetry subscriptions

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Metric names understood by the telemetry feed
///
/// Shared with the historical query service. Other names are still sent to
/// the server, which answers with an `error` frame.
pub const KNOWN_METRICS: &[&str] = &["speed", "temp", "power", "traction", "brake"];

/// Check whether a metric belongs to the known vocabulary
pub fn is_known_metric(metric: &str) -> bool {
    KNOWN_METRICS.contains(&metric)
}

/// A single telemetry data point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Time the value was recorded by the vehicle
    pub timestamp: DateTime<Utc>,
    /// Metric value
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Identifies which live feed a connection follows
///
/// Two targets are equal only when both fields match exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionTarget {
    pub vehicle_id: String,
    pub metric: String,
}

impl SubscriptionTarget {
    pub fn new(vehicle_id: impl Into<String>, metric: impl Into<String>) -> Self {
        Self {
            vehicle_id: vehicle_id.into(),
            metric: metric.into(),
        }
    }
}

impl fmt::Display for SubscriptionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.vehicle_id, self.metric)
    }
}

/// A decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// Server accepted the subscription and started streaming
    Connected { vehicle_id: String, metric: String },
    /// One data point
    Sample(Sample),
    /// Server-reported application error (e.g. unknown vehicle)
    Error { message: String },
}

/// Lifecycle status of the tracked connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// No connection has been started
    #[default]
    Idle,
    /// Handshake in progress
    Connecting,
    /// Transport is up; `confirmed` once the server sent its `connected` frame
    Open { confirmed: bool },
    /// Connection is gone; a new one must be started to resume
    Closed,
}

impl ConnectionStatus {
    /// True while a connection is being established or is established
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Connecting | Self::Open { .. })
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Open { confirmed: false } => write!(f, "open"),
            Self::Open { confirmed: true } => write!(f, "streaming"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Errors surfaced through the observable `last_error`
///
/// None of these terminate the controller; every closed state can be left
/// with `reconnect()` or `subscribe()`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamError {
    /// Server sent an `error` frame; the connection stays open
    #[error("{message}")]
    Application { message: String },

    /// Socket-level failure
    #[error("Connection error: {message}")]
    Transport { message: String },

    /// Connection closed with a non-normal code, or without a close frame
    #[error("Connection closed unexpectedly{}: {reason}", .code.map(|c| format!(" (code {c})")).unwrap_or_default())]
    AbnormalClose { code: Option<u16>, reason: String },
}

/// Snapshot of everything a consumer can observe
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct StreamState {
    /// Current subscription target, if any
    pub target: Option<SubscriptionTarget>,
    /// Most recent samples in arrival order
    pub samples: Vec<Sample>,
    /// Samples accepted since the window was last cleared, evicted ones included
    pub received: u64,
    /// Last surfaced error, cleared by healthy data flow or a new connection
    pub last_error: Option<StreamError>,
    /// Status of the tracked connection
    pub status: ConnectionStatus,
}

impl StreamState {
    /// Most recent sample, if any
    pub fn latest(&self) -> Option<&Sample> {
        self.samples.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_equality_is_fieldwise() {
        let a = SubscriptionTarget::new("B183", "speed");
        assert_eq!(a, SubscriptionTarget::new("B183", "speed"));
        assert_ne!(a, SubscriptionTarget::new("B183", "temp"));
        assert_ne!(a, SubscriptionTarget::new("b183", "speed"));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ConnectionStatus::Idle.to_string(), "idle");
        assert_eq!(
            ConnectionStatus::Open { confirmed: true }.to_string(),
            "streaming"
        );
        assert!(ConnectionStatus::Connecting.is_live());
        assert!(!ConnectionStatus::Closed.is_live());
    }

    #[test]
    fn test_abnormal_close_message() {
        let err = StreamError::AbnormalClose {
            code: Some(1011),
            reason: "internal error".into(),
        };
        assert_eq!(
            err.to_string(),
            "Connection closed unexpectedly (code 1011): internal error"
        );

        let err = StreamError::AbnormalClose {
            code: None,
            reason: "stream ended".into(),
        };
        assert_eq!(err.to_string(), "Connection closed unexpectedly: stream ended");
    }

    #[test]
    fn test_known_metrics() {
        assert!(is_known_metric("speed"));
        assert!(is_known_metric("brake"));
        assert!(!is_known_metric("altitude"));
    }
}
