//! Transport layer for the live feed
//!
//! The streaming engine only needs a message-framed duplex channel. This
//! module defines that abstraction and ships two implementations:
//! - WebSocket transport (tokio-tungstenite)
//! - Mock transport for testing
//!
//! # Example
//!
//! ```ignore
//! use telemetry_stream::transport::{StreamTransport, WebSocketTransport};
//! use telemetry_stream::SubscriptionTarget;
//!
//! let transport = WebSocketTransport::new("ws://localhost:8080/live-trend")?;
//! let mut channel = transport.open(&SubscriptionTarget::new("B183", "speed")).await?;
//! while let Some(message) = channel.recv().await {
//!     println!("{:?}", message?);
//! }
//! ```

mod adapter;
pub mod error;
pub mod mock;
pub mod websocket;

pub use adapter::{ChannelMessage, CloseFrame, DuplexChannel, StreamTransport, NORMAL_CLOSURE};
pub use error::TransportError;
pub use mock::{MockChannelHandle, MockTransport};
pub use websocket::{WebSocketTransport, DEFAULT_ENDPOINT};
