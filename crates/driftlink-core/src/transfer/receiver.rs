//! Receiver-side transfer engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Mutex};

use crate::codec::{decode_chunk, encode_control, ControlAction, ControlMessage, FileMeta};
use crate::error::{Error, Result};
use crate::io::WriteSink;
use crate::pipe::{Pipe, PipeMessage};
use crate::ranges::ReceivedRanges;
use crate::transfer::{ReceiverState, TransferConfig, TransferProgress};

/// What a completed receive produced, for callers that used the in-memory fallback.
pub enum TransferOutcome {
    /// Chunks were written directly to the sink; nothing further to do.
    WrittenToSink,
    /// The sink buffered chunks in memory; here is the assembled file.
    Assembled(Vec<u8>),
}

/// Drives a single inbound file transfer.
pub struct ReceiverEngine {
    config: TransferConfig,
    cancelled: Arc<AtomicBool>,
    state_tx: watch::Sender<ReceiverState>,
    progress_tx: watch::Sender<TransferProgress>,
}

impl ReceiverEngine {
    /// Create an engine and its observable state/progress channels.
    #[must_use]
    pub fn new(
        config: TransferConfig,
    ) -> (
        Self,
        watch::Receiver<ReceiverState>,
        watch::Receiver<TransferProgress>,
    ) {
        let (state_tx, state_rx) = watch::channel(ReceiverState::Idle);
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

    fn set_state(&self, state: ReceiverState) {
        let _ = self.state_tx.send(state);
    }

    /// Accept a transfer over `pipe`, writing chunks to a sink built by
    /// `sink_factory` once `file-meta` arrives. Returns `None` from
    /// `sink_factory` to fall back to an in-memory assembly buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the pipe closes before `file-meta` arrives, the
    /// peer violates message ordering, or a sink write fails.
    pub async fn run(
        &self,
        pipe: Arc<dyn Pipe>,
        sink_factory: impl FnOnce(&FileMeta) -> Option<Arc<dyn WriteSink>>,
    ) -> Result<(FileMeta, TransferOutcome)> {
        self.set_state(ReceiverState::AwaitingMeta);

        let meta = self.await_file_meta(pipe.as_ref()).await?;
        let _ = self.progress_tx.send(TransferProgress::new(meta.size));

        let in_memory = Arc::new(crate::io::InMemorySink::new());
        let sink: Arc<dyn WriteSink> = sink_factory(&meta).unwrap_or_else(|| in_memory.clone());
        let used_in_memory = Arc::ptr_eq(&sink, &(in_memory.clone() as Arc<dyn WriteSink>));

        pipe.send_text(String::from_utf8(encode_control(&ControlMessage::Control {
            action: ControlAction::Ready,
        })?)?)
        .await?;

        self.set_state(ReceiverState::Receiving);
        let ranges = Arc::new(Mutex::new(ReceivedRanges::new(meta.total_chunks)));
        let pending_acks: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));

        let nack_task = tokio::spawn(Self::nack_loop(
            pipe.clone(),
            ranges.clone(),
            self.config,
            self.cancelled.clone(),
        ));

        let receive_result = self
            .receive_loop(pipe.as_ref(), &meta, &sink, &ranges, &pending_acks)
            .await;

        nack_task.abort();

        match receive_result {
            Ok(()) => {
                self.set_state(ReceiverState::Finalising);
                // Flush any indices batched but not yet acked before telling
                // the sender the transfer is complete, so a low final batch
                // under `ack_batch_size` isn't silently dropped.
                let remaining: Vec<u32> = std::mem::take(&mut *pending_acks.lock().await);
                if !remaining.is_empty() {
                    pipe.send_text(String::from_utf8(encode_control(
                        &ControlMessage::Ack { indices: remaining },
                    )?)?)
                    .await?;
                }
                sink.finalize().await?;
                pipe.send_text(String::from_utf8(encode_control(
                    &ControlMessage::TransferComplete {
                        success: true,
                        bytes_received: meta.size,
                    },
                )?)?)
                .await?;
                self.set_state(ReceiverState::Complete);
                let _ = self.progress_tx.send(TransferProgress {
                    bytes_done: meta.size,
                    total_bytes: meta.size,
                    started_at: self.progress_tx.borrow().started_at,
                });
                let outcome = if used_in_memory {
                    TransferOutcome::Assembled(in_memory.assemble().await)
                } else {
                    TransferOutcome::WrittenToSink
                };
                Ok((meta, outcome))
            }
            Err(e) => {
                self.set_state(ReceiverState::Failed);
                Err(e)
            }
        }
    }

    async fn await_file_meta(&self, pipe: &dyn Pipe) -> Result<FileMeta> {
        loop {
            match pipe.recv().await {
                Some(PipeMessage::Text(text)) => match crate::codec::decode_control(text.as_bytes()) {
                    Ok(ControlMessage::FileMeta(meta)) => return Ok(meta),
                    Ok(_) | Err(_) => continue,
                },
                Some(PipeMessage::Binary(_)) => {
                    return Err(Error::ProtocolViolation(
                        "received a chunk frame before file-meta".into(),
                    ))
                }
                Some(PipeMessage::Closed) | None => return Err(Error::TransportClosed),
            }
        }
    }

    async fn receive_loop(
        &self,
        pipe: &dyn Pipe,
        meta: &FileMeta,
        sink: &Arc<dyn WriteSink>,
        ranges: &Mutex<ReceivedRanges>,
        pending_acks: &Mutex<Vec<u32>>,
    ) -> Result<()> {
        if ranges.lock().await.is_complete() {
            return Ok(());
        }

        loop {
            if self.cancelled.load(Ordering::Acquire) {
                return Err(Error::Cancelled);
            }

            let Some(msg) = pipe.recv().await else {
                return Err(Error::TransportClosed);
            };

            match msg {
                PipeMessage::Binary(frame) => {
                    let (index, data) = decode_chunk(&frame)?;
                    if index >= meta.total_chunks {
                        tracing::warn!(index, "dropping chunk index outside transfer bounds");
                        continue;
                    }

                    let is_new = {
                        let mut ranges = ranges.lock().await;
                        ranges.mark_received(index)
                    };

                    if is_new {
                        sink.write_chunk(index, &data)
                            .await
                            .map_err(|e| Error::SinkWriteFailed(e.to_string()))?;

                        let bytes_done = {
                            let ranges = ranges.lock().await;
                            #[allow(clippy::cast_precision_loss)]
                            let fraction = ranges.progress_percent() / 100.0;
                            (fraction * meta.size as f64) as u64
                        };
                        let _ = self.progress_tx.send(TransferProgress {
                            bytes_done,
                            total_bytes: meta.size,
                            started_at: self.progress_tx.borrow().started_at,
                        });

                        let mut pending = pending_acks.lock().await;
                        pending.push(index);
                        if pending.len() >= self.config.ack_batch_size {
                            let indices = std::mem::take(&mut *pending);
                            drop(pending);
                            pipe.send_text(String::from_utf8(encode_control(
                                &ControlMessage::Ack { indices },
                            )?)?)
                            .await?;
                        }
                    }

                    if ranges.lock().await.is_complete() {
                        return Ok(());
                    }
                }
                PipeMessage::Text(text) => {
                    match crate::codec::decode_control(text.as_bytes()) {
                        Ok(ControlMessage::Control {
                            action: crate::codec::ControlAction::Pause,
                        }) => self.set_state(ReceiverState::Paused),
                        Ok(ControlMessage::Control {
                            action: crate::codec::ControlAction::Resume,
                        }) => self.set_state(ReceiverState::Receiving),
                        Ok(_) | Err(_) => {}
                    }
                }
                PipeMessage::Closed => return Err(Error::TransportClosed),
            }
        }
    }

    async fn nack_loop(
        pipe: Arc<dyn Pipe>,
        ranges: Arc<Mutex<ReceivedRanges>>,
        config: TransferConfig,
        cancelled: Arc<AtomicBool>,
    ) {
        let mut interval = tokio::time::interval(config.nack_timeout);
        loop {
            interval.tick().await;
            if cancelled.load(Ordering::Acquire) {
                return;
            }
            let missing = {
                let ranges = ranges.lock().await;
                if ranges.is_complete() {
                    return;
                }
                ranges.missing_chunks()
            };
            if missing.is_empty() || missing.len() >= config.nack_fresh_threshold {
                continue;
            }
            let indices: Vec<u32> = missing.into_iter().take(config.nack_max_request).collect();
            let Ok(bytes) = encode_control(&ControlMessage::Nack { indices }) else {
                continue;
            };
            let Ok(text) = String::from_utf8(bytes) else {
                continue;
            };
            if pipe.send_text(text).await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_chunk;
    use crate::pipe::ChannelPipe;

    #[tokio::test]
    async fn rejects_chunk_before_meta() {
        let (sender_pipe, receiver_pipe) = ChannelPipe::duplex_pair();
        let receiver_pipe = Arc::new(receiver_pipe);

        sender_pipe
            .send_binary(encode_chunk(0, b"oops"))
            .await
            .unwrap();
        drop(sender_pipe);

        let (engine, _state_rx, _progress_rx) = ReceiverEngine::new(TransferConfig::default());
        let result = engine.run(receiver_pipe, |_| None).await;
        assert!(matches!(result, Err(Error::ProtocolViolation(_))));
    }

    #[tokio::test]
    async fn receives_single_chunk_and_completes() {
        let (sender_pipe, receiver_pipe) = ChannelPipe::duplex_pair();
        let receiver_pipe = Arc::new(receiver_pipe);

        let meta = FileMeta {
            name: "f.bin".into(),
            size: 5,
            mime_type: "application/octet-stream".into(),
            total_chunks: 1,
            checksum: None,
        };
        let meta_bytes = encode_control(&ControlMessage::FileMeta(meta.clone())).unwrap();
        sender_pipe
            .send_text(String::from_utf8(meta_bytes).unwrap())
            .await
            .unwrap();
        sender_pipe
            .send_binary(encode_chunk(0, b"hello"))
            .await
            .unwrap();

        let (engine, _state_rx, _progress_rx) = ReceiverEngine::new(TransferConfig::default());
        let (received_meta, outcome) = engine.run(receiver_pipe, |_| None).await.unwrap();
        assert_eq!(received_meta, meta);
        match outcome {
            TransferOutcome::Assembled(data) => assert_eq!(data, b"hello"),
            TransferOutcome::WrittenToSink => panic!("expected in-memory assembly"),
        }

        let ready = sender_pipe.recv().await.unwrap();
        match ready {
            PipeMessage::Text(text) => {
                assert_eq!(
                    crate::codec::decode_control(text.as_bytes()).unwrap(),
                    ControlMessage::Control { action: ControlAction::Ready }
                );
            }
            other => panic!("expected control.ready before the transfer starts, got {other:?}"),
        }

        let ack = sender_pipe.recv().await.unwrap();
        match ack {
            PipeMessage::Text(text) => {
                assert_eq!(
                    crate::codec::decode_control(text.as_bytes()).unwrap(),
                    ControlMessage::Ack { indices: vec![0] }
                );
            }
            other => panic!("expected ack flush before transfer-complete, got {other:?}"),
        }

        let done = sender_pipe.recv().await.unwrap();
        match done {
            PipeMessage::Text(text) => {
                assert_eq!(
                    crate::codec::decode_control(text.as_bytes()).unwrap(),
                    ControlMessage::TransferComplete {
                        success: true,
                        bytes_received: 5,
                    }
                );
            }
            other => panic!("expected transfer-complete, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn zero_byte_file_completes_immediately_on_meta() {
        let (sender_pipe, receiver_pipe) = ChannelPipe::duplex_pair();
        let receiver_pipe = Arc::new(receiver_pipe);

        let meta = FileMeta {
            name: "empty.bin".into(),
            size: 0,
            mime_type: "application/octet-stream".into(),
            total_chunks: 0,
            checksum: None,
        };
        let meta_bytes = encode_control(&ControlMessage::FileMeta(meta.clone())).unwrap();
        sender_pipe
            .send_text(String::from_utf8(meta_bytes).unwrap())
            .await
            .unwrap();

        let (engine, _state_rx, _progress_rx) = ReceiverEngine::new(TransferConfig::default());
        let handle = tokio::spawn(async move { engine.run(receiver_pipe, |_| None).await });

        let ready = sender_pipe.recv().await.unwrap();
        assert_eq!(
            crate::codec::decode_control(match &ready {
                PipeMessage::Text(text) => text.as_bytes(),
                other => panic!("expected control.ready, got {other:?}"),
            })
            .unwrap(),
            ControlMessage::Control { action: ControlAction::Ready }
        );
        let (_, outcome) = handle.await.unwrap().unwrap();
        match outcome {
            TransferOutcome::Assembled(data) => assert!(data.is_empty()),
            TransferOutcome::WrittenToSink => panic!("expected in-memory assembly"),
        }
    }
}
