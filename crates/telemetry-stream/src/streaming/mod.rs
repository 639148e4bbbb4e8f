//! Live telemetry subscriptions
//!
//! Follows one `(vehicle, metric)` feed over a duplex channel and keeps a
//! sliding window of the most recent samples.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use telemetry_stream::transport::{WebSocketTransport, DEFAULT_ENDPOINT};
//! use telemetry_stream::{SubscriptionController, SubscriptionTarget};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = WebSocketTransport::new(DEFAULT_ENDPOINT)?;
//! let controller = SubscriptionController::new(Arc::new(transport));
//!
//! controller.subscribe(SubscriptionTarget::new("B183", "speed"));
//!
//! let mut updates = controller.watch();
//! while updates.changed().await.is_ok() {
//!     let state = updates.borrow_and_update().clone();
//!     if let Some(sample) = state.latest() {
//!         println!("{} = {}", sample.timestamp, sample.value);
//!     }
//!     if let Some(error) = &state.last_error {
//!         eprintln!("Stream error: {}", error);
//!     }
//! }
//!
//! // Explicit cleanup (also happens on drop)
//! controller.disconnect();
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod codec;
pub mod connection;
mod controller;
mod types;

pub use buffer::{HistoryBuffer, HISTORY_CAPACITY};
pub use codec::{decode, decode_str, DecodeError};
pub use connection::{CloseReason, Connection, ConnectionId, ConnectionInput, Effect};
pub use controller::SubscriptionController;
pub use types::{
    is_known_metric, ConnectionStatus, FeedEvent, Sample, StreamError, StreamState,
    SubscriptionTarget, KNOWN_METRICS,
};
