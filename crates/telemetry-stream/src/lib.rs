//! Live Telemetry Streaming Client
//!
//! Follows a server-pushed vehicle metric feed over a WebSocket and keeps a
//! sliding window of the most recent samples, surviving target changes,
//! transport failures, and teardown without leaking connections.
//!
//! # Example
//!
//! ```rust,no_run
//! use telemetry_stream::{StreamConfig, SubscriptionController, SubscriptionTarget};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let controller = SubscriptionController::from_config(&StreamConfig::default())?;
//!
//!     // Follow vehicle B183's speed
//!     controller.subscribe(SubscriptionTarget::new("B183", "speed"));
//!
//!     // Switching metric closes the old connection and starts a new one
//!     controller.update(SubscriptionTarget::new("B183", "temp"));
//!
//!     let state = controller.state();
//!     println!("{} samples, status {}", state.samples.len(), state.status);
//!     Ok(())
//! }
//! ```
//!
//! # Testing
//!
//! The `transport::mock` module scripts channels without any network, and the
//! `testing` module runs a real WebSocket feed:
//!
//! ```rust,ignore
//! use telemetry_stream::testing::{ServerPush, TestFeedServer};
//!
//! let server = TestFeedServer::start().await?;
//! let controller = SubscriptionController::from_config(&StreamConfig {
//!     endpoint: server.endpoint(),
//!     ..Default::default()
//! })?;
//! ```

mod config;
mod error;
pub mod streaming;
pub mod testing;
pub mod transport;

pub use config::StreamConfig;
pub use error::{Result, TelemetryStreamError};

// Re-export streaming types for convenience
pub use streaming::{
    ConnectionStatus, FeedEvent, HistoryBuffer, Sample, StreamError, StreamState,
    SubscriptionController, SubscriptionTarget, HISTORY_CAPACITY, KNOWN_METRICS,
};
