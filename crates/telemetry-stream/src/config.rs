//! Streaming client configuration

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, TelemetryStreamError};
use crate::streaming::HISTORY_CAPACITY;
use crate::transport::DEFAULT_ENDPOINT;

/// Configuration for a live stream client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Live feed endpoint (`ws://` or `wss://`)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Number of samples kept in the sliding window
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_history_capacity() -> usize {
    HISTORY_CAPACITY
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            history_capacity: default_history_capacity(),
        }
    }
}

impl StreamConfig {
    /// Check the endpoint and capacity
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.endpoint)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(TelemetryStreamError::config(format!(
                "endpoint must use ws:// or wss://, got {}",
                self.endpoint
            )));
        }
        if self.history_capacity == 0 {
            return Err(TelemetryStreamError::config(
                "history_capacity must be at least 1",
            ));
        }
        Ok(())
    }
}
