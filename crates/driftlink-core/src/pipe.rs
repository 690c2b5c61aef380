//! The abstract bidirectional transport the transfer engines run over.
//!
//! A `Pipe` is assumed ordered, reliable, and capable of carrying both
//! binary (chunk) and text (control) frames — the same contract a WebRTC
//! `DataChannel` or a WebSocket already provides. This crate ships a single
//! concrete implementation, [`ChannelPipe`], built from a pair of in-process
//! channels; adapters for real transports live outside this crate.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, Notify};

use crate::error::{Error, Result};

/// A message delivered by [`Pipe::recv`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipeMessage {
    /// A binary chunk frame.
    Binary(Vec<u8>),
    /// A text (control) frame.
    Text(String),
    /// The peer closed the pipe; no further messages will arrive.
    Closed,
}

/// An ordered, reliable, bidirectional transport carrying binary and text frames.
///
/// Implementations expose an outbound-buffer byte counter
/// ([`buffered_amount`](Pipe::buffered_amount)) and a way to wait for it to
/// drop below a low-watermark threshold
/// ([`wait_buffered_low`](Pipe::wait_buffered_low)), mirroring
/// `RTCDataChannel::buffered_amount` / `on_buffered_amount_low` — the
/// transport-level half of the two-tier backpressure the transfer engines
/// rely on.
#[async_trait::async_trait]
pub trait Pipe: Send + Sync {
    /// Send a binary (chunk) frame. Increments the outbound buffer counter
    /// until the frame is considered delivered.
    async fn send_binary(&self, frame: Vec<u8>) -> Result<()>;

    /// Send a text (control) frame.
    async fn send_text(&self, text: String) -> Result<()>;

    /// Receive the next inbound message, or `None` once the pipe is closed
    /// and drained.
    async fn recv(&self) -> Option<PipeMessage>;

    /// Current number of bytes queued for send but not yet delivered.
    fn buffered_amount(&self) -> usize;

    /// Threshold below which [`wait_buffered_low`](Pipe::wait_buffered_low) resolves.
    fn buffered_amount_low_threshold(&self) -> usize;

    /// Set the low-watermark threshold.
    fn set_buffered_amount_low_threshold(&self, threshold: usize);

    /// Resolve once `buffered_amount() <= buffered_amount_low_threshold()`.
    ///
    /// Resolves immediately if already below threshold.
    async fn wait_buffered_low(&self);

    /// Whether the pipe is still open for sending.
    fn is_open(&self) -> bool;

    /// Close the pipe. Idempotent.
    async fn close(&self);
}

struct ChannelPipeInner {
    out_tx: mpsc::UnboundedSender<PipeMessage>,
    in_rx: Mutex<mpsc::UnboundedReceiver<PipeMessage>>,
    buffered: AtomicUsize,
    low_threshold: AtomicUsize,
    low_notify: Notify,
    open: AtomicBool,
}

/// An in-process, channel-backed [`Pipe`] implementation.
///
/// Used by the demo CLI and the integration tests to exercise the transfer
/// engines without a real network transport. `send_binary`/`send_text`
/// deliver synchronously into the peer's inbound channel, so the buffered
/// byte counter only reflects frames that have not yet been consumed by
/// [`recv`](Pipe::recv) on the other end — a reasonable stand-in for a
/// transport's outbound send queue.
pub struct ChannelPipe {
    inner: Arc<ChannelPipeInner>,
}

impl ChannelPipe {
    /// Create a connected pair of pipes, each the other's peer.
    #[must_use]
    pub fn duplex_pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();

        let a = Self {
            inner: Arc::new(ChannelPipeInner {
                out_tx: b_tx,
                in_rx: Mutex::new(a_rx),
                buffered: AtomicUsize::new(0),
                low_threshold: AtomicUsize::new(0),
                low_notify: Notify::new(),
                open: AtomicBool::new(true),
            }),
        };
        let b = Self {
            inner: Arc::new(ChannelPipeInner {
                out_tx: a_tx,
                in_rx: Mutex::new(b_rx),
                buffered: AtomicUsize::new(0),
                low_threshold: AtomicUsize::new(0),
                low_notify: Notify::new(),
                open: AtomicBool::new(true),
            }),
        };

        (a, b)
    }

    fn message_len(msg: &PipeMessage) -> usize {
        match msg {
            PipeMessage::Binary(b) => b.len(),
            PipeMessage::Text(t) => t.len(),
            PipeMessage::Closed => 0,
        }
    }

    async fn send(&self, msg: PipeMessage) -> Result<()> {
        if !self.inner.open.load(Ordering::Acquire) {
            return Err(Error::TransportClosed);
        }
        let len = Self::message_len(&msg);
        self.inner.buffered.fetch_add(len, Ordering::AcqRel);
        self.inner
            .out_tx
            .send(msg)
            .map_err(|_| Error::TransportClosed)?;
        // This in-process pipe delivers synchronously; treat the frame as
        // drained from the outbound buffer as soon as it's handed off.
        self.inner.buffered.fetch_sub(len, Ordering::AcqRel);
        if self.inner.buffered.load(Ordering::Acquire)
            <= self.inner.low_threshold.load(Ordering::Acquire)
        {
            self.inner.low_notify.notify_waiters();
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Pipe for ChannelPipe {
    async fn send_binary(&self, frame: Vec<u8>) -> Result<()> {
        self.send(PipeMessage::Binary(frame)).await
    }

    async fn send_text(&self, text: String) -> Result<()> {
        self.send(PipeMessage::Text(text)).await
    }

    async fn recv(&self) -> Option<PipeMessage> {
        let mut rx = self.inner.in_rx.lock().await;
        match rx.recv().await {
            Some(PipeMessage::Closed) | None => {
                self.inner.open.store(false, Ordering::Release);
                None
            }
            Some(msg) => Some(msg),
        }
    }

    fn buffered_amount(&self) -> usize {
        self.inner.buffered.load(Ordering::Acquire)
    }

    fn buffered_amount_low_threshold(&self) -> usize {
        self.inner.low_threshold.load(Ordering::Acquire)
    }

    fn set_buffered_amount_low_threshold(&self, threshold: usize) {
        self.inner.low_threshold.store(threshold, Ordering::Release);
        if self.buffered_amount() <= threshold {
            self.inner.low_notify.notify_waiters();
        }
    }

    async fn wait_buffered_low(&self) {
        if self.buffered_amount() <= self.buffered_amount_low_threshold() {
            return;
        }
        self.inner.low_notify.notified().await;
    }

    fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    async fn close(&self) {
        self.inner.open.store(false, Ordering::Release);
        let _ = self.inner.out_tx.send(PipeMessage::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplex_pair_delivers_both_directions() {
        let (a, b) = ChannelPipe::duplex_pair();
        a.send_text("hello".into()).await.unwrap();
        assert_eq!(b.recv().await, Some(PipeMessage::Text("hello".into())));

        b.send_binary(vec![1, 2, 3]).await.unwrap();
        assert_eq!(a.recv().await, Some(PipeMessage::Binary(vec![1, 2, 3])));
    }

    #[tokio::test]
    async fn close_signals_none_to_peer() {
        let (a, b) = ChannelPipe::duplex_pair();
        a.close().await;
        assert_eq!(b.recv().await, None);
        assert!(!b.is_open());
    }

    #[tokio::test]
    async fn wait_buffered_low_resolves_immediately_under_threshold() {
        let (a, _b) = ChannelPipe::duplex_pair();
        a.set_buffered_amount_low_threshold(1024);
        tokio::time::timeout(std::time::Duration::from_millis(100), a.wait_buffered_low())
            .await
            .expect("should resolve immediately");
    }
}
