//! Application-level flow control: a chunk-count-bounded sliding window.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::time::Instant;

use tokio::sync::oneshot;
use tokio::sync::Mutex;

use crate::codec::CHUNK_SIZE;
use crate::error::{Error, Result};

/// Default cap on unacknowledged bytes in flight, 8 MiB.
pub const DEFAULT_MAX_OUTSTANDING_BYTES: u64 = 8 * 1024 * 1024;

/// Snapshot of window occupancy, returned by [`SlidingWindow::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowStats {
    /// Number of chunks currently in flight.
    pub outstanding_chunks: usize,
    /// Number of bytes those chunks account for (at `chunk_size` each, except
    /// the bookkeeping is chunk-count based so this is an upper bound).
    pub outstanding_bytes: u64,
    /// Whether the window is paused.
    pub paused: bool,
}

struct State {
    outstanding: BTreeMap<u32, Instant>,
    waiters: VecDeque<oneshot::Sender<()>>,
    paused: bool,
}

/// Bounds the number of unacknowledged chunks a sender may have in flight.
///
/// Mirrors the shape of a TCP-like congestion window but counts chunks, not
/// bytes, per the sizing rule `max_chunks = max_outstanding_bytes / chunk_size`.
pub struct SlidingWindow {
    max_chunks: usize,
    state: Mutex<State>,
}

impl SlidingWindow {
    /// Create a window sized from a byte budget and chunk size.
    #[must_use]
    pub fn new(max_outstanding_bytes: u64, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        #[allow(clippy::cast_possible_truncation)]
        let max_chunks = ((max_outstanding_bytes / chunk_size as u64).max(1)) as usize;
        Self {
            max_chunks,
            state: Mutex::new(State {
                outstanding: BTreeMap::new(),
                waiters: VecDeque::new(),
                paused: false,
            }),
        }
    }

    /// A window using the crate defaults ([`DEFAULT_MAX_OUTSTANDING_BYTES`] / [`CHUNK_SIZE`]).
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_MAX_OUTSTANDING_BYTES, CHUNK_SIZE)
    }

    /// Whether a new chunk can be sent right now without blocking.
    pub async fn can_send(&self) -> bool {
        let state = self.state.lock().await;
        !state.paused && state.outstanding.len() < self.max_chunks
    }

    /// Record that `index` has been sent and is now outstanding.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WindowFull`] if the window has no free slot — callers
    /// are expected to have called [`wait_for_space`](Self::wait_for_space)
    /// first, so this indicates a caller bug, not a recoverable condition.
    pub async fn mark_sent(&self, index: u32) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.outstanding.contains_key(&index) && state.outstanding.len() >= self.max_chunks {
            return Err(Error::WindowFull);
        }
        state.outstanding.insert(index, Instant::now());
        Ok(())
    }

    /// Acknowledge a single chunk index, freeing its slot and waking one waiter.
    pub async fn on_ack(&self, index: u32) {
        let mut state = self.state.lock().await;
        state.outstanding.remove(&index);
        Self::wake_one(&mut state);
    }

    /// Acknowledge a batch of chunk indices at once, waking as many waiters
    /// as slots were freed.
    pub async fn on_ack_batch(&self, indices: &[u32]) {
        let mut state = self.state.lock().await;
        for idx in indices {
            state.outstanding.remove(idx);
        }
        let freed = indices.len().min(state.waiters.len());
        for _ in 0..freed {
            Self::wake_one(&mut state);
        }
    }

    fn wake_one(state: &mut State) {
        while let Some(waiter) = state.waiters.pop_front() {
            if waiter.send(()).is_ok() {
                break;
            }
        }
    }

    /// Wait until a slot is free (and the window is not paused).
    ///
    /// Resolves immediately if space is already available. Waiters are woken
    /// in FIFO order as slots free up via [`on_ack`](Self::on_ack),
    /// [`on_ack_batch`](Self::on_ack_batch), or [`resume`](Self::resume).
    pub async fn wait_for_space(&self) {
        let rx = {
            let mut state = self.state.lock().await;
            if !state.paused && state.outstanding.len() < self.max_chunks {
                return;
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            rx
        };
        let _ = rx.await;
    }

    /// Pause the window: `can_send`/`wait_for_space` will block until [`resume`](Self::resume).
    pub async fn pause(&self) {
        let mut state = self.state.lock().await;
        state.paused = true;
    }

    /// Resume a paused window, waking every current waiter so they can
    /// re-check their slot.
    pub async fn resume(&self) {
        let mut state = self.state.lock().await;
        state.paused = false;
        while let Some(waiter) = state.waiters.pop_front() {
            let _ = waiter.send(());
        }
    }

    /// Chunk indices currently outstanding that also appear in `requested`,
    /// in ascending order — the set a sender should retransmit on NACK.
    pub async fn chunks_for_retransmit(&self, requested: &[u32]) -> Vec<u32> {
        let state = self.state.lock().await;
        requested
            .iter()
            .copied()
            .filter(|idx| state.outstanding.contains_key(idx))
            .collect()
    }

    /// Drop all outstanding bookkeeping and wake every waiter (used on cancel).
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.outstanding.clear();
        while let Some(waiter) = state.waiters.pop_front() {
            let _ = waiter.send(());
        }
    }

    /// Snapshot the current occupancy.
    pub async fn stats(&self) -> WindowStats {
        let state = self.state.lock().await;
        WindowStats {
            outstanding_chunks: state.outstanding.len(),
            #[allow(clippy::cast_possible_truncation)]
            outstanding_bytes: (state.outstanding.len() * CHUNK_SIZE) as u64,
            paused: state.paused,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn respects_chunk_capacity() {
        let window = SlidingWindow::new(CHUNK_SIZE as u64 * 2, CHUNK_SIZE);
        assert!(window.can_send().await);
        window.mark_sent(0).await.unwrap();
        assert!(window.can_send().await);
        window.mark_sent(1).await.unwrap();
        assert!(!window.can_send().await);
        assert!(matches!(
            window.mark_sent(2).await,
            Err(Error::WindowFull)
        ));
    }

    #[tokio::test]
    async fn ack_frees_a_slot() {
        let window = SlidingWindow::new(CHUNK_SIZE as u64, CHUNK_SIZE);
        window.mark_sent(0).await.unwrap();
        assert!(!window.can_send().await);
        window.on_ack(0).await;
        assert!(window.can_send().await);
    }

    #[tokio::test]
    async fn wait_for_space_wakes_in_fifo_order() {
        let window = Arc::new(SlidingWindow::new(CHUNK_SIZE as u64, CHUNK_SIZE));
        window.mark_sent(0).await.unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..3u32 {
            let window = window.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                window.wait_for_space().await;
                order.lock().await.push(i);
            }));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        window.on_ack(0).await;
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(*order.lock().await, vec![0]);
    }

    #[tokio::test]
    async fn pause_blocks_wait_for_space_until_resume() {
        let window = Arc::new(SlidingWindow::new(CHUNK_SIZE as u64 * 4, CHUNK_SIZE));
        window.pause().await;
        let w2 = window.clone();
        let handle = tokio::spawn(async move {
            w2.wait_for_space().await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());
        window.resume().await;
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn retransmit_set_intersects_outstanding() {
        let window = SlidingWindow::new(CHUNK_SIZE as u64 * 4, CHUNK_SIZE);
        window.mark_sent(0).await.unwrap();
        window.mark_sent(1).await.unwrap();
        let to_retransmit = window.chunks_for_retransmit(&[0, 1, 5]).await;
        assert_eq!(to_retransmit, vec![0, 1]);
    }

    #[tokio::test]
    async fn clear_resets_state_and_wakes_waiters() {
        let window = Arc::new(SlidingWindow::new(CHUNK_SIZE as u64, CHUNK_SIZE));
        window.mark_sent(0).await.unwrap();
        let w2 = window.clone();
        let handle = tokio::spawn(async move {
            w2.wait_for_space().await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        window.clear().await;
        handle.await.unwrap();
        assert!(window.can_send().await);
    }
}
