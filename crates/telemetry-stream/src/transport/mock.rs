//! Mock transport for testing
//!
//! Every `open` call is recorded and produces a scripted channel. Tests grab
//! the server side of a channel with [`MockTransport::channel`] and push
//! frames, closes, or failures through it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use super::{ChannelMessage, CloseFrame, DuplexChannel, StreamTransport, TransportError};
use crate::streaming::{FeedEvent, SubscriptionTarget};

/// How long [`MockTransport::channel`] waits for a channel to appear
const CHANNEL_WAIT: Duration = Duration::from_secs(2);

type Inbound = Result<ChannelMessage, TransportError>;

/// Mock transport adapter for testing
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<MockInner>,
}

struct MockInner {
    /// Targets passed to `open`, in call order
    opens: Mutex<Vec<SubscriptionTarget>>,
    /// Server side of every channel handed out
    channels: Mutex<Vec<MockChannelHandle>>,
    /// Errors returned by upcoming `open` calls, oldest first
    failures: Mutex<VecDeque<TransportError>>,
    /// While true, `open` waits before completing the handshake
    hold: watch::Sender<bool>,
    /// Number of channels currently held by a client
    live: Arc<AtomicUsize>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        let (hold, _) = watch::channel(false);
        Self {
            inner: Arc::new(MockInner {
                opens: Mutex::new(Vec::new()),
                channels: Mutex::new(Vec::new()),
                failures: Mutex::new(VecDeque::new()),
                hold,
                live: Arc::new(AtomicUsize::new(0)),
            }),
        }
    }

    /// Keep handshakes pending until [`release_handshakes`](Self::release_handshakes)
    pub fn hold_handshakes(&self) {
        self.inner.hold.send_replace(true);
    }

    pub fn release_handshakes(&self) {
        self.inner.hold.send_replace(false);
    }

    /// Make an upcoming `open` call fail with `error`
    ///
    /// Queued failures are returned in the order they were queued.
    pub fn fail_next_open(&self, error: TransportError) {
        self.inner.failures.lock().push_back(error);
    }

    /// Number of `open` calls so far (socket operations)
    pub fn open_count(&self) -> usize {
        self.inner.opens.lock().len()
    }

    /// Targets passed to `open`, in call order
    pub fn opened_targets(&self) -> Vec<SubscriptionTarget> {
        self.inner.opens.lock().clone()
    }

    /// Number of channels the client still holds open
    pub fn live_channels(&self) -> usize {
        self.inner.live.load(Ordering::SeqCst)
    }

    /// Server side of the `index`-th channel, waiting for it to be opened
    pub async fn channel(&self, index: usize) -> Option<MockChannelHandle> {
        let deadline = tokio::time::Instant::now() + CHANNEL_WAIT;

        loop {
            if let Some(handle) = self.inner.channels.lock().get(index) {
                return Some(handle.clone());
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn wait_for_release(&self) {
        let mut hold = self.inner.hold.subscribe();
        loop {
            let held = *hold.borrow_and_update();
            if !held || hold.changed().await.is_err() {
                return;
            }
        }
    }
}

#[async_trait]
impl StreamTransport for MockTransport {
    async fn open(
        &self,
        target: &SubscriptionTarget,
    ) -> Result<Box<dyn DuplexChannel>, TransportError> {
        self.inner.opens.lock().push(target.clone());
        tracing::debug!(%target, "Mock transport: open");

        self.wait_for_release().await;

        if let Some(error) = self.inner.failures.lock().pop_front() {
            return Err(error);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let alive = Arc::new(AtomicBool::new(true));
        let close_frame = Arc::new(Mutex::new(None));

        self.inner.live.fetch_add(1, Ordering::SeqCst);
        self.inner.channels.lock().push(MockChannelHandle {
            target: target.clone(),
            tx,
            alive: alive.clone(),
            close_frame: close_frame.clone(),
        });

        Ok(Box::new(MockChannel {
            rx,
            alive,
            close_frame,
            live: self.inner.live.clone(),
        }))
    }
}

/// Server side of a mock channel
#[derive(Clone)]
pub struct MockChannelHandle {
    target: SubscriptionTarget,
    tx: mpsc::UnboundedSender<Inbound>,
    alive: Arc<AtomicBool>,
    close_frame: Arc<Mutex<Option<CloseFrame>>>,
}

impl MockChannelHandle {
    /// Target this channel was opened for
    pub fn target(&self) -> &SubscriptionTarget {
        &self.target
    }

    /// Push a feed event in wire format
    pub fn send_event(&self, event: &FeedEvent) {
        self.send_text(&event.to_frame());
    }

    /// Push a raw text frame
    pub fn send_text(&self, text: &str) {
        let _ = self.tx.send(Ok(ChannelMessage::Text(text.to_string())));
    }

    /// Close from the server side
    pub fn close(&self, frame: Option<CloseFrame>) {
        let _ = self.tx.send(Ok(ChannelMessage::Close(frame)));
    }

    /// Fail the channel with a transport error
    pub fn fail(&self, error: TransportError) {
        let _ = self.tx.send(Err(error));
    }

    /// True until the client closes or drops the channel
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Close frame the client sent, if any
    pub fn client_close_frame(&self) -> Option<CloseFrame> {
        self.close_frame.lock().clone()
    }
}

struct MockChannel {
    rx: mpsc::UnboundedReceiver<Inbound>,
    alive: Arc<AtomicBool>,
    close_frame: Arc<Mutex<Option<CloseFrame>>>,
    live: Arc<AtomicUsize>,
}

impl MockChannel {
    fn release(&self) {
        if self.alive.swap(false, Ordering::SeqCst) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl DuplexChannel for MockChannel {
    async fn recv(&mut self) -> Option<Inbound> {
        self.rx.recv().await
    }

    async fn close(&mut self, frame: CloseFrame) -> Result<(), TransportError> {
        tracing::debug!(code = frame.code, reason = %frame.reason, "Mock transport: close");
        *self.close_frame.lock() = Some(frame);
        self.release();
        Ok(())
    }
}

impl Drop for MockChannel {
    fn drop(&mut self) {
        self.release();
    }
}
