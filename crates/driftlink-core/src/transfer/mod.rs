//! Sender and receiver state machines driving a single file transfer over a
//! [`Pipe`](crate::pipe::Pipe), with sliding-window/NACK flow control.

pub mod receiver;
pub mod resume;
pub mod sender;

use std::time::{Duration, Instant};

/// Tunable parameters for a transfer, shared by sender and receiver.
#[derive(Debug, Clone, Copy)]
pub struct TransferConfig {
    /// Chunk payload size in bytes.
    pub chunk_size: usize,
    /// Application-level window cap, in bytes of outstanding (unacknowledged) data.
    pub max_outstanding_bytes: u64,
    /// Receiver batches this many received chunks before sending an `ack`.
    pub ack_batch_size: usize,
    /// Interval between receiver NACK sweeps for missing chunks.
    pub nack_timeout: Duration,
    /// Maximum number of missing-chunk indices to request in a single NACK.
    pub nack_max_request: usize,
    /// Above this many missing chunks, skip NACKs (the whole transfer is
    /// still in its early, bulk-sending phase).
    pub nack_fresh_threshold: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: crate::codec::CHUNK_SIZE,
            max_outstanding_bytes: crate::window::DEFAULT_MAX_OUTSTANDING_BYTES,
            ack_batch_size: 4,
            nack_timeout: Duration::from_millis(2000),
            nack_max_request: 20,
            nack_fresh_threshold: 100,
        }
    }
}

/// Sender-side lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    /// Constructed, no transfer started yet.
    Idle,
    /// `file-meta` sent, about to start the chunk loop.
    Metadata,
    /// Actively sending/retransmitting chunks.
    Transferring,
    /// Sending suspended by a `control.pause` from the peer or a local call.
    Paused,
    /// Peer confirmed receipt of every chunk.
    Complete,
    /// The transfer ended in an unrecoverable error or was cancelled.
    Failed,
}

/// Receiver-side lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    /// Constructed, nothing received yet.
    Idle,
    /// Waiting for the sender's `file-meta`.
    AwaitingMeta,
    /// Accepting chunks.
    Receiving,
    /// Receiving suspended.
    Paused,
    /// Every chunk received, assembling/syncing the destination.
    Finalising,
    /// Transfer fully written and verified complete.
    Complete,
    /// The transfer ended in an unrecoverable error or was cancelled.
    Failed,
}

/// A point-in-time snapshot of transfer progress, broadcast over a
/// [`tokio::sync::watch`] channel so callers can observe it without polling
/// the engine directly.
#[derive(Debug, Clone)]
pub struct TransferProgress {
    /// Bytes accounted for so far (sent-and-acked, or received).
    pub bytes_done: u64,
    /// Total bytes in the transfer.
    pub total_bytes: u64,
    /// When the transfer started, for throughput/ETA calculations.
    pub started_at: Instant,
}

impl TransferProgress {
    /// Create a fresh progress snapshot for a transfer of `total_bytes`.
    #[must_use]
    pub fn new(total_bytes: u64) -> Self {
        Self {
            bytes_done: 0,
            total_bytes,
            started_at: Instant::now(),
        }
    }

    /// Percentage complete, in `[0.0, 100.0]`.
    #[must_use]
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            return 100.0;
        }
        (self.bytes_done as f64 / self.total_bytes as f64) * 100.0
    }

    /// Bytes per second since `started_at`.
    #[must_use]
    pub fn throughput_bps(&self) -> f64 {
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        self.bytes_done as f64 / elapsed
    }
}
