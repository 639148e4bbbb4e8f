//! Subscription controller
//!
//! Owns at most one live connection, rebinds the history buffer when the
//! target changes, and exposes the observable [`StreamState`].

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, trace, warn};

use super::buffer::HistoryBuffer;
use super::codec;
use super::connection::{CloseReason, Connection, ConnectionId, ConnectionInput, Effect};
use super::types::{ConnectionStatus, Sample, StreamError, StreamState, SubscriptionTarget};
use crate::config::StreamConfig;
use crate::error::Result;
use crate::transport::{ChannelMessage, CloseFrame, StreamTransport, WebSocketTransport};

/// Follows one live telemetry feed at a time
///
/// All operations return immediately; connection progress and incoming data
/// are reported through [`state`](Self::state) and [`watch`](Self::watch).
/// Must be created and used inside a tokio runtime.
///
/// # Example
///
/// ```ignore
/// let controller = SubscriptionController::new(Arc::new(WebSocketTransport::new(DEFAULT_ENDPOINT)?));
/// controller.subscribe(SubscriptionTarget::new("B183", "speed"));
///
/// let mut updates = controller.watch();
/// while updates.changed().await.is_ok() {
///     let state = updates.borrow_and_update().clone();
///     println!("{} samples, status {}", state.samples.len(), state.status);
/// }
/// ```
pub struct SubscriptionController {
    transport: Arc<dyn StreamTransport>,
    shared: Arc<Shared>,
}

/// State shared between the controller and its connection tasks
struct Shared {
    inner: Mutex<Inner>,
    updates: watch::Sender<StreamState>,
}

struct Inner {
    target: Option<SubscriptionTarget>,
    /// The tracked connection; events from any other id are discarded
    connection: Option<Connection>,
    /// Close request for the tracked connection's task
    close_tx: Option<oneshot::Sender<CloseFrame>>,
    buffer: HistoryBuffer,
    last_error: Option<StreamError>,
    next_id: ConnectionId,
}

impl SubscriptionController {
    pub fn new(transport: Arc<dyn StreamTransport>) -> Self {
        Self::with_buffer(transport, HistoryBuffer::new())
    }

    /// Controller keeping at most `capacity` samples
    pub fn with_capacity(transport: Arc<dyn StreamTransport>, capacity: usize) -> Self {
        Self::with_buffer(transport, HistoryBuffer::with_capacity(capacity))
    }

    /// Controller over a WebSocket transport built from `config`
    pub fn from_config(config: &StreamConfig) -> Result<Self> {
        config.validate()?;
        let transport = WebSocketTransport::new(&config.endpoint)?;
        Ok(Self::with_capacity(
            Arc::new(transport),
            config.history_capacity,
        ))
    }

    fn with_buffer(transport: Arc<dyn StreamTransport>, buffer: HistoryBuffer) -> Self {
        let (updates, _) = watch::channel(StreamState::default());
        Self {
            transport,
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    target: None,
                    connection: None,
                    close_tx: None,
                    buffer,
                    last_error: None,
                    next_id: ConnectionId::new(1),
                }),
                updates,
            }),
        }
    }

    /// Follow `target`
    ///
    /// Same as [`update`](Self::update); reads better for the first call.
    pub fn subscribe(&self, target: SubscriptionTarget) {
        self.update(target);
    }

    /// Switch to `target`
    ///
    /// An unchanged target is a no-op. Otherwise the live connection is closed
    /// normally, the buffer and error are cleared, and a new connection starts.
    pub fn update(&self, target: SubscriptionTarget) {
        let mut inner = self.shared.inner.lock();

        if inner.target.as_ref() == Some(&target) {
            debug!(%target, "Subscription target unchanged");
            return;
        }

        info!(%target, "Subscribing");
        inner.teardown(CloseReason::TargetChanged);
        inner.target = Some(target);
        self.start(&mut inner);
        self.shared.publish(&inner);
    }

    /// Start a connection for the current target unless one is already live
    pub fn connect(&self) {
        let mut inner = self.shared.inner.lock();

        if inner.target.is_none() {
            debug!("Connect without a subscription target, ignoring");
            return;
        }

        if let Some(connection) = inner.connection.as_mut() {
            if connection.state().is_live() {
                // The state machine treats this as a guarded no-op
                connection.dispatch(ConnectionInput::Connect);
                return;
            }
        }

        self.start(&mut inner);
        self.shared.publish(&inner);
    }

    /// Tear down and restart the connection for the current target
    pub fn reconnect(&self) {
        let mut inner = self.shared.inner.lock();

        if inner.target.is_none() {
            debug!("Reconnect without a subscription target, ignoring");
            return;
        }

        info!(target = ?inner.target, "Reconnecting");
        inner.teardown(CloseReason::Reconnect);
        self.start(&mut inner);
        self.shared.publish(&inner);
    }

    /// Close the connection without restarting it
    pub fn disconnect(&self) {
        let mut inner = self.shared.inner.lock();
        inner.teardown(CloseReason::Disconnect);
        self.shared.publish(&inner);
    }

    /// Snapshot of the observable state
    pub fn state(&self) -> StreamState {
        self.shared.inner.lock().snapshot()
    }

    /// Alias for [`state`](Self::state)
    pub fn get_state(&self) -> StreamState {
        self.state()
    }

    /// Receiver notified on every state change
    pub fn watch(&self) -> watch::Receiver<StreamState> {
        self.shared.updates.subscribe()
    }

    pub fn target(&self) -> Option<SubscriptionTarget> {
        self.shared.inner.lock().target.clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.inner.lock().status()
    }

    pub fn samples(&self) -> Vec<Sample> {
        self.shared.inner.lock().buffer.snapshot()
    }

    pub fn last_error(&self) -> Option<StreamError> {
        self.shared.inner.lock().last_error.clone()
    }

    /// Begin a fresh connection for the current target
    fn start(&self, inner: &mut Inner) {
        let Some(target) = inner.target.clone() else {
            return;
        };

        let id = inner.next_id;
        inner.next_id = id.next();
        inner.buffer.clear();
        inner.last_error = None;

        let mut connection = Connection::new(id, target.clone());
        let effects = connection.dispatch(ConnectionInput::Connect);
        inner.connection = Some(connection);

        if !effects.contains(&Effect::OpenChannel) {
            return;
        }

        let (close_tx, close_rx) = oneshot::channel();
        inner.close_tx = Some(close_tx);

        debug!(connection_id = %id, %target, "Starting connection");
        tokio::spawn(run_connection(
            id,
            target,
            self.transport.clone(),
            self.shared.clone(),
            close_rx,
        ));
    }
}

impl Drop for SubscriptionController {
    fn drop(&mut self) {
        let mut inner = self.shared.inner.lock();
        inner.teardown(CloseReason::Teardown);
        self.shared.publish(&inner);
    }
}

impl Shared {
    /// Feed an input from connection `id` through the state machine
    ///
    /// Returns false when `id` is no longer the tracked connection.
    fn handle_input(&self, id: ConnectionId, input: ConnectionInput) -> bool {
        let mut inner = self.inner.lock();

        let Some(connection) = inner.connection.as_mut().filter(|c| c.id() == id) else {
            trace!(connection_id = %id, ?input, "Discarding event from superseded connection");
            return false;
        };

        let effects = connection.dispatch(input);
        if !effects.is_empty() {
            inner.apply(effects);
        }
        self.publish(&inner);
        true
    }

    fn publish(&self, inner: &Inner) {
        self.updates.send_replace(inner.snapshot());
    }
}

impl Inner {
    fn status(&self) -> ConnectionStatus {
        self.connection
            .as_ref()
            .map(Connection::state)
            .unwrap_or_default()
    }

    fn snapshot(&self) -> StreamState {
        StreamState {
            target: self.target.clone(),
            samples: self.buffer.snapshot(),
            received: self.buffer.received(),
            last_error: self.last_error.clone(),
            status: self.status(),
        }
    }

    /// Normal-closure teardown of the tracked connection, if live
    fn teardown(&mut self, reason: CloseReason) {
        if let Some(connection) = self.connection.as_mut() {
            let effects = connection.dispatch(ConnectionInput::Disconnect(reason));
            self.apply(effects);
        }
        // A finished task no longer listens; dropping the sender is enough
        self.close_tx = None;
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::OpenChannel => {}
                Effect::ClearError => self.last_error = None,
                Effect::PushSample(sample) => self.buffer.push(sample),
                Effect::SetError(error) => {
                    debug!(%error, "Live stream error");
                    self.last_error = Some(error);
                }
                Effect::SendClose(frame) => {
                    if let Some(close_tx) = self.close_tx.take() {
                        let _ = close_tx.send(frame);
                    }
                }
            }
        }
    }
}

/// Drive one connection: handshake, then read until closed
async fn run_connection(
    id: ConnectionId,
    target: SubscriptionTarget,
    transport: Arc<dyn StreamTransport>,
    shared: Arc<Shared>,
    mut close_rx: oneshot::Receiver<CloseFrame>,
) {
    let opened = tokio::select! {
        biased;
        _ = &mut close_rx => {
            // Dropping the pending handshake releases whatever it acquired
            debug!(connection_id = %id, "Closed during handshake");
            return;
        }
        result = transport.open(&target) => result,
    };

    let mut channel = match opened {
        Ok(channel) => channel,
        Err(e) => {
            shared.handle_input(id, ConnectionInput::TransportFailed(e.to_string()));
            return;
        }
    };

    info!(connection_id = %id, vehicle = %target.vehicle_id, metric = %target.metric, "Live stream connected");
    shared.handle_input(id, ConnectionInput::TransportOpened);

    loop {
        tokio::select! {
            biased;
            request = &mut close_rx => {
                let frame = request.unwrap_or_else(|_| CloseReason::Teardown.close_frame());
                debug!(connection_id = %id, code = frame.code, reason = %frame.reason, "Closing live stream");
                if let Err(e) = channel.close(frame).await {
                    debug!(connection_id = %id, error = %e, "Close handshake failed");
                }
                return;
            }
            message = channel.recv() => {
                let input = match message {
                    Some(Ok(ChannelMessage::Text(text))) => decode_frame(id, text.as_bytes()),
                    Some(Ok(ChannelMessage::Binary(data))) => decode_frame(id, &data),
                    Some(Ok(ChannelMessage::Close(frame))) => Some(ConnectionInput::PeerClosed(frame)),
                    Some(Err(e)) => Some(ConnectionInput::TransportFailed(e.to_string())),
                    None => Some(ConnectionInput::PeerClosed(None)),
                };

                let Some(input) = input else {
                    continue;
                };

                let finished = matches!(
                    input,
                    ConnectionInput::PeerClosed(_) | ConnectionInput::TransportFailed(_)
                );
                shared.handle_input(id, input);

                if finished {
                    info!(connection_id = %id, "Live stream closed by peer");
                    return;
                }
            }
        }
    }
}

fn decode_frame(id: ConnectionId, raw: &[u8]) -> Option<ConnectionInput> {
    match codec::decode(raw) {
        Ok(event) => Some(ConnectionInput::Frame(event)),
        Err(e) => {
            warn!(connection_id = %id, reason = %e.reason, raw = %e.raw, "Dropping malformed frame");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::FeedEvent;
    use crate::transport::MockTransport;
    use chrono::Utc;
    use std::time::Duration;

    async fn settle<F: Fn(&StreamState) -> bool>(controller: &SubscriptionController, f: F) {
        let mut updates = controller.watch();
        tokio::time::timeout(Duration::from_secs(2), updates.wait_for(|s| f(s)))
            .await
            .expect("state did not settle")
            .expect("controller dropped");
    }

    #[tokio::test]
    async fn test_initial_state_is_idle() {
        let controller = SubscriptionController::new(Arc::new(MockTransport::new()));
        let state = controller.state();
        assert_eq!(state.status, ConnectionStatus::Idle);
        assert!(state.samples.is_empty());
        assert!(state.target.is_none());
        assert!(state.last_error.is_none());
    }

    #[tokio::test]
    async fn test_connect_without_target_is_noop() {
        let transport = MockTransport::new();
        let controller = SubscriptionController::new(Arc::new(transport.clone()));

        controller.connect();
        controller.reconnect();

        tokio::task::yield_now().await;
        assert_eq!(transport.open_count(), 0);
        assert_eq!(controller.status(), ConnectionStatus::Idle);
    }

    #[tokio::test]
    async fn test_samples_flow_into_buffer() {
        let transport = MockTransport::new();
        let controller = SubscriptionController::with_capacity(Arc::new(transport.clone()), 3);
        controller.subscribe(SubscriptionTarget::new("B183", "speed"));

        let channel = transport.channel(0).await.unwrap();
        for i in 0..5 {
            channel.send_event(&FeedEvent::Sample(Sample::new(Utc::now(), i as f64)));
        }

        settle(&controller, |s| s.samples.last().map(|p| p.value) == Some(4.0)).await;
        let values: Vec<f64> = controller.samples().iter().map(|s| s.value).collect();
        assert_eq!(values, vec![2.0, 3.0, 4.0]);
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    #[tokio::test]
    async fn test_surfaced_errors_stay_below_warn() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let transport = MockTransport::new();
        let controller = SubscriptionController::new(Arc::new(transport.clone()));
        controller.subscribe(SubscriptionTarget::new("B183", "rpm"));

        let channel = transport.channel(0).await.unwrap();
        channel.send_text("not json");
        channel.send_event(&FeedEvent::Error {
            message: "unsupported metric: rpm".into(),
        });
        settle(&controller, |s| s.last_error.is_some()).await;

        let output = logs.contents();
        assert!(output.contains("Dropping malformed frame"), "{output}");
        assert!(!output.contains("Live stream error"), "{output}");
    }

    #[tokio::test]
    async fn test_drop_closes_connection_normally() {
        let transport = MockTransport::new();
        let controller = SubscriptionController::new(Arc::new(transport.clone()));
        controller.subscribe(SubscriptionTarget::new("B183", "speed"));
        settle(&controller, |s| s.status.is_open()).await;

        let channel = transport.channel(0).await.unwrap();
        drop(controller);

        let closed = crate::testing::wait_for(
            || {
                let channel = channel.clone();
                async move { !channel.is_alive() }
            },
            Duration::from_secs(2),
        )
        .await;
        assert!(closed);
        assert_eq!(channel.client_close_frame(), Some(CloseFrame::normal("teardown")));
    }
}
