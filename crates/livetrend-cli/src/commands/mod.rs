//! Command implementations for livetrend

pub mod metrics;
pub mod watch;

pub use metrics::metrics;
pub use watch::watch;
