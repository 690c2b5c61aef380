//! Sender-side transfer engine: the windowed, NACK-aware replacement for a
//! stop-and-wait chunk loop.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Mutex, Notify};

use crate::codec::{encode_chunk, encode_control, ControlAction, ControlMessage, FileMeta};
use crate::error::{Error, Result};
use crate::io::{chunk_byte_range, ChunkSource};
use crate::pipe::{Pipe, PipeMessage};
use crate::transfer::{SenderState, TransferConfig, TransferProgress};
use crate::window::SlidingWindow;

/// Drives a single outbound file transfer.
///
/// Construct once per transfer; [`run`](Self::run) consumes the engine and
/// runs to completion, failure, or cancellation. Call [`cancel`](Self::cancel)
/// from another task/thread to interrupt it.
pub struct SenderEngine {
    config: TransferConfig,
    cancelled: Arc<AtomicBool>,
    state_tx: watch::Sender<SenderState>,
    progress_tx: watch::Sender<TransferProgress>,
}

impl SenderEngine {
    /// Create an engine and its observable state/progress channels.
    #[must_use]
    pub fn new(
        config: TransferConfig,
    ) -> (
        Self,
        watch::Receiver<SenderState>,
        watch::Receiver<TransferProgress>,
    ) {
        let (state_tx, state_rx) = watch::channel(SenderState::Idle);
        let (progress_tx, progress_rx) = watch::channel(TransferProgress::new(0));
        (
            Self {
                config,
                cancelled: Arc::new(AtomicBool::new(false)),
                state_tx,
                progress_tx,
            },
            state_rx,
            progress_rx,
        )
    }

    /// Request cancellation. Observed at the next suspension point in [`run`](Self::run).
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    fn set_state(&self, state: SenderState) {
        let _ = self.state_tx.send(state);
    }

    /// Send `meta`'s file over `pipe`, reading chunk bytes from `source`.
    ///
    /// # Errors
    ///
    /// Returns an error if the pipe closes unexpectedly, the transfer is
    /// cancelled, or the chunk source fails to read.
    pub async fn run(
        &self,
        pipe: Arc<dyn Pipe>,
        source: Arc<dyn ChunkSource>,
        meta: FileMeta,
    ) -> Result<()> {
        self.run_inner(pipe, source, meta, &[]).await
    }

    /// Resume a transfer on a fresh pipe after a reconnect, skipping the
    /// chunk ranges `already_received` reports the receiver already has
    /// (as carried by a `received-ranges` control message).
    ///
    /// # Errors
    ///
    /// Same as [`run`](Self::run).
    pub async fn resume(
        &self,
        pipe: Arc<dyn Pipe>,
        source: Arc<dyn ChunkSource>,
        meta: FileMeta,
        already_received: &[(u32, u32)],
    ) -> Result<()> {
        self.run_inner(pipe, source, meta, already_received).await
    }

    async fn run_inner(
        &self,
        pipe: Arc<dyn Pipe>,
        source: Arc<dyn ChunkSource>,
        meta: FileMeta,
        already_received: &[(u32, u32)],
    ) -> Result<()> {
        if !pipe.is_open() {
            return Err(Error::NotReady("pipe is not open".into()));
        }

        self.set_state(SenderState::Metadata);
        let _ = self
            .progress_tx
            .send(TransferProgress::new(meta.size));

        let meta_json = encode_control(&ControlMessage::FileMeta(meta.clone()))?;
        pipe.send_text(String::from_utf8_lossy(&meta_json).into_owned())
            .await?;

        let pending = crate::transfer::resume::remaining_chunks(&meta, already_received);

        let window = Arc::new(SlidingWindow::new(
            self.config.max_outstanding_bytes,
            self.config.chunk_size,
        ));
        let retransmit_queue: Arc<Mutex<VecDeque<u32>>> = Arc::new(Mutex::new(VecDeque::new()));
        let completed = Arc::new(AtomicBool::new(false));
        let completion_notify = Arc::new(Notify::new());
        let acked_bytes = Arc::new(std::sync::atomic::AtomicU64::new(0));
        // Set once every pending chunk index has been sent at least once, so
        // the ack-driven completion check (§4.4.1: nextChunkIndex >= totalChunks
        // && outstandingChunks == 0) knows when it is meaningful to fire.
        let all_sent = Arc::new(AtomicBool::new(false));

        let inbound_task = tokio::spawn(Self::inbound_loop(
            pipe.clone(),
            window.clone(),
            retransmit_queue.clone(),
            completed.clone(),
            completion_notify.clone(),
            acked_bytes.clone(),
            self.progress_tx.clone(),
            meta.clone(),
            all_sent.clone(),
        ));

        let run_result = self
            .send_loop(
                pipe.as_ref(),
                source.as_ref(),
                &meta,
                pending,
                &window,
                &retransmit_queue,
                &completed,
                &completion_notify,
                &all_sent,
            )
            .await;

        inbound_task.abort();

        match run_result {
            Ok(()) => {
                self.set_state(SenderState::Complete);
                Ok(())
            }
            Err(e) => {
                self.set_state(SenderState::Failed);
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn send_loop(
        &self,
        pipe: &dyn Pipe,
        source: &dyn ChunkSource,
        meta: &FileMeta,
        pending: Vec<u32>,
        window: &SlidingWindow,
        retransmit_queue: &Mutex<VecDeque<u32>>,
        completed: &AtomicBool,
        completion_notify: &Notify,
        all_sent: &AtomicBool,
    ) -> Result<()> {
        self.set_state(SenderState::Transferring);

        let mut pending = pending.into_iter();
        loop {
            if self.cancelled.load(Ordering::Acquire) {
                window.clear().await;
                return Err(Error::Cancelled);
            }
            if completed.load(Ordering::Acquire) {
                return Ok(());
            }

            let next = retransmit_queue.lock().await.pop_front();
            let index = match next {
                Some(idx) => idx,
                None if pending.len() > 0 => pending.next().expect("just checked len() > 0"),
                None => {
                    // Every chunk has been sent at least once. This is the
                    // sender half of the ack-driven completion check: if
                    // nothing is outstanding right now (a zero-chunk
                    // transfer, or the last ack already landed before we
                    // got here), complete immediately rather than waiting
                    // on a `transfer-complete` that may never arrive.
                    if !all_sent.swap(true, Ordering::AcqRel)
                        && window.stats().await.outstanding_chunks == 0
                    {
                        completed.store(true, Ordering::Release);
                        completion_notify.notify_waiters();
                        continue;
                    }
                    // Otherwise wait for the remaining acks to drain (the
                    // inbound loop completes us), or for a NACK to requeue
                    // work, without busy-looping.
                    tokio::select! {
                        () = completion_notify.notified() => continue,
                        () = tokio::time::sleep(std::time::Duration::from_millis(200)) => continue,
                    }
                }
            };

            window.wait_for_space().await;
            if self.cancelled.load(Ordering::Acquire) {
                window.clear().await;
                return Err(Error::Cancelled);
            }
            pipe.wait_buffered_low().await;

            let (offset, len) = chunk_byte_range(index, meta.size);
            let data = source.read_range(offset, len).await?;
            let frame = encode_chunk(index, &data);
            pipe.send_binary(frame).await?;
            window.mark_sent(index).await?;
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn inbound_loop(
        pipe: Arc<dyn Pipe>,
        window: Arc<SlidingWindow>,
        retransmit_queue: Arc<Mutex<VecDeque<u32>>>,
        completed: Arc<AtomicBool>,
        completion_notify: Arc<Notify>,
        acked_bytes: Arc<std::sync::atomic::AtomicU64>,
        progress_tx: watch::Sender<TransferProgress>,
        meta: FileMeta,
        all_sent: Arc<AtomicBool>,
    ) {
        let mut acked_chunks: std::collections::HashSet<u32> = std::collections::HashSet::new();
        while let Some(msg) = pipe.recv().await {
            let PipeMessage::Text(text) = msg else {
                continue;
            };
            let Ok(control) = crate::codec::decode_control(text.as_bytes()) else {
                tracing::debug!("sender: ignoring malformed control message");
                continue;
            };
            match control {
                ControlMessage::Ack { indices } => {
                    window.on_ack_batch(&indices).await;
                    for idx in &indices {
                        if acked_chunks.insert(*idx) {
                            let (_, len) = chunk_byte_range(*idx, meta.size);
                            acked_bytes.fetch_add(len as u64, Ordering::AcqRel);
                        }
                    }
                    let _ = progress_tx.send(TransferProgress {
                        bytes_done: acked_bytes.load(Ordering::Acquire).min(meta.size),
                        total_bytes: meta.size,
                        started_at: progress_tx.borrow().started_at,
                    });
                    if all_sent.load(Ordering::Acquire) && !completed.load(Ordering::Acquire) {
                        let stats = window.stats().await;
                        if stats.outstanding_chunks == 0 {
                            completed.store(true, Ordering::Release);
                            completion_notify.notify_waiters();
                        }
                    }
                }
                ControlMessage::Nack { indices } => {
                    let to_retransmit = window.chunks_for_retransmit(&indices).await;
                    let mut queue = retransmit_queue.lock().await;
                    for idx in to_retransmit {
                        if !queue.contains(&idx) {
                            queue.push_back(idx);
                        }
                    }
                }
                ControlMessage::Control { action } => match action {
                    ControlAction::Pause => window.pause().await,
                    ControlAction::Resume | ControlAction::Ready => window.resume().await,
                },
                ControlMessage::TransferComplete { .. } => {
                    completed.store(true, Ordering::Release);
                    completion_notify.notify_waiters();
                    break;
                }
                ControlMessage::FileMeta(_)
                | ControlMessage::ReceivedRanges { .. }
                | ControlMessage::Unknown => {}
            }
        }
    }
}
