//! Test utilities for telemetry-stream
//!
//! Provides a scripted live feed server speaking the real WebSocket wire
//! format, for integration tests of the WebSocket transport.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{self, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::streaming::{FeedEvent, SubscriptionTarget};
use crate::transport::CloseFrame;
use crate::Result;

/// Something the test server pushes to the clients of one target
#[derive(Debug, Clone)]
pub enum ServerPush {
    /// A well-formed feed event
    Event(FeedEvent),
    /// An arbitrary text frame
    Raw(String),
    /// Close the connection with this frame
    Close(CloseFrame),
}

#[derive(Clone)]
struct FeedState {
    feed: broadcast::Sender<(SubscriptionTarget, ServerPush)>,
    requests: Arc<Mutex<Vec<SubscriptionTarget>>>,
    client_closes: Arc<Mutex<Vec<CloseFrame>>>,
    live: Arc<AtomicUsize>,
}

#[derive(Debug, Deserialize)]
struct LiveTrendParams {
    vehicle_id: Option<String>,
    metric: Option<String>,
}

/// A live feed server that automatically shuts down when dropped
///
/// Every connection first receives a `connected` frame for its target, then
/// whatever the test pushes for that target.
pub struct TestFeedServer {
    pub addr: SocketAddr,
    state: FeedState,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl TestFeedServer {
    /// Bind to an available local port and start serving `/live-trend`
    ///
    /// # Example
    ///
    /// ```ignore
    /// let server = TestFeedServer::start().await?;
    /// let transport = WebSocketTransport::new(&server.endpoint())?;
    /// ```
    pub async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let (feed, _) = broadcast::channel(256);
        let state = FeedState {
            feed,
            requests: Arc::new(Mutex::new(Vec::new())),
            client_closes: Arc::new(Mutex::new(Vec::new())),
            live: Arc::new(AtomicUsize::new(0)),
        };

        let router = Router::new()
            .route("/live-trend", get(live_trend))
            .with_state(state.clone());

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        // Give server a moment to start
        tokio::time::sleep(Duration::from_millis(10)).await;

        Ok(Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// WebSocket endpoint of the feed
    pub fn endpoint(&self) -> String {
        format!("ws://{}/live-trend", self.addr)
    }

    /// Push to every client currently subscribed to `target`
    pub fn push(&self, target: &SubscriptionTarget, push: ServerPush) {
        let _ = self.state.feed.send((target.clone(), push));
    }

    /// Targets requested by clients, in connection order
    pub fn requests(&self) -> Vec<SubscriptionTarget> {
        self.state.requests.lock().clone()
    }

    /// Close frames sent by clients
    pub fn client_close_frames(&self) -> Vec<CloseFrame> {
        self.state.client_closes.lock().clone()
    }

    /// Number of currently connected clients
    pub fn live_connections(&self) -> usize {
        self.state.live.load(Ordering::SeqCst)
    }

    /// Shutdown the server gracefully
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for TestFeedServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn live_trend(
    ws: WebSocketUpgrade,
    Query(params): Query<LiveTrendParams>,
    State(state): State<FeedState>,
) -> Response {
    let target = SubscriptionTarget::new(
        params.vehicle_id.unwrap_or_default(),
        params.metric.unwrap_or_else(|| "speed".to_string()),
    );
    state.requests.lock().push(target.clone());
    let rx = state.feed.subscribe();

    ws.on_upgrade(move |socket| serve_feed(socket, target, rx, state))
}

async fn serve_feed(
    mut socket: WebSocket,
    target: SubscriptionTarget,
    mut rx: broadcast::Receiver<(SubscriptionTarget, ServerPush)>,
    state: FeedState,
) {
    state.live.fetch_add(1, Ordering::SeqCst);

    let hello = FeedEvent::Connected {
        vehicle_id: target.vehicle_id.clone(),
        metric: target.metric.clone(),
    };

    if socket
        .send(Message::Text(hello.to_frame().into()))
        .await
        .is_ok()
    {
        loop {
            tokio::select! {
                push = rx.recv() => {
                    let push = match push {
                        Ok((to, push)) if to == target => push,
                        Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    };

                    let message = match push {
                        ServerPush::Event(event) => Message::Text(event.to_frame().into()),
                        ServerPush::Raw(text) => Message::Text(text.into()),
                        ServerPush::Close(frame) => Message::Close(Some(ws::CloseFrame {
                            code: frame.code,
                            reason: frame.reason.into(),
                        })),
                    };
                    let closing = matches!(message, Message::Close(_));

                    if socket.send(message).await.is_err() || closing {
                        break;
                    }
                }
                incoming = socket.recv() => match incoming {
                    Some(Ok(Message::Close(frame))) => {
                        if let Some(frame) = frame {
                            state
                                .client_closes
                                .lock()
                                .push(CloseFrame::new(frame.code, frame.reason.as_str()));
                        }
                        break;
                    }
                    Some(Ok(_)) => continue,
                    None | Some(Err(_)) => break,
                },
            }
        }
    }

    state.live.fetch_sub(1, Ordering::SeqCst);
}

/// Wait for a condition with timeout
pub async fn wait_for<F, Fut>(condition: F, timeout: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;

    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_endpoint_format() {
        let server = TestFeedServer::start().await.unwrap();
        assert_eq!(
            server.endpoint(),
            format!("ws://127.0.0.1:{}/live-trend", server.addr.port())
        );
        assert_eq!(server.live_connections(), 0);
        server.shutdown().await;
    }
}
