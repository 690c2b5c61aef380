use std::sync::Arc;

use driftlink_core::codec::FileMeta;
use driftlink_core::io::{total_chunks_for, FileChunkSource};
use driftlink_core::pipe::ChannelPipe;
use driftlink_core::transfer::receiver::{ReceiverEngine, TransferOutcome};
use driftlink_core::transfer::sender::SenderEngine;
use driftlink_core::transfer::TransferConfig;
use tempfile::TempDir;

async fn run_transfer(content: &[u8], config: TransferConfig) -> Vec<u8> {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("input.bin");
    tokio::fs::write(&path, content).await.unwrap();

    let source = Arc::new(FileChunkSource::open(&path).await.unwrap());
    let meta = FileMeta {
        name: "input.bin".into(),
        size: content.len() as u64,
        mime_type: "application/octet-stream".into(),
        total_chunks: total_chunks_for(content.len() as u64),
        checksum: None,
    };

    let (sender_pipe, receiver_pipe) = ChannelPipe::duplex_pair();
    let (sender_pipe, receiver_pipe) = (Arc::new(sender_pipe), Arc::new(receiver_pipe));

    let (sender, _s_state, _s_progress) = SenderEngine::new(config);
    let (receiver, _r_state, _r_progress) = ReceiverEngine::new(config);

    let sender_handle = tokio::spawn({
        let meta = meta.clone();
        async move { sender.run(sender_pipe, source, meta).await }
    });
    let receiver_handle =
        tokio::spawn(async move { receiver.run(receiver_pipe, |_| None).await });

    sender_handle.await.unwrap().expect("sender should succeed");
    let (_, outcome) = receiver_handle.await.unwrap().expect("receiver should succeed");

    match outcome {
        TransferOutcome::Assembled(data) => data,
        TransferOutcome::WrittenToSink => panic!("expected in-memory assembly"),
    }
}

#[tokio::test]
async fn zero_byte_file_transfers_cleanly() {
    let received = run_transfer(b"", TransferConfig::default()).await;
    assert!(received.is_empty());
}

#[tokio::test]
async fn exact_chunk_size_file_transfers() {
    let content = vec![9u8; driftlink_core::codec::CHUNK_SIZE];
    let received = run_transfer(&content, TransferConfig::default()).await;
    assert_eq!(received, content);
}

#[tokio::test]
async fn off_by_one_chunk_size_file_transfers() {
    let content = vec![3u8; driftlink_core::codec::CHUNK_SIZE + 1];
    let received = run_transfer(&content, TransferConfig::default()).await;
    assert_eq!(received, content);
}

#[tokio::test]
async fn multi_chunk_file_under_small_window_transfers() {
    // Force the window down to a couple of chunks so backpressure actually
    // kicks in during the transfer.
    let mut config = TransferConfig::default();
    config.max_outstanding_bytes = (config.chunk_size * 2) as u64;
    let content: Vec<u8> = (0..(config.chunk_size * 5 + 123))
        .map(|i| (i % 256) as u8)
        .collect();
    let received = run_transfer(&content, config).await;
    assert_eq!(received, content);
}

#[tokio::test]
async fn cancelling_sender_surfaces_cancelled_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("big.bin");
    let content = vec![1u8; driftlink_core::codec::CHUNK_SIZE * 20];
    tokio::fs::write(&path, &content).await.unwrap();
    let source = Arc::new(FileChunkSource::open(&path).await.unwrap());

    let meta = FileMeta {
        name: "big.bin".into(),
        size: content.len() as u64,
        mime_type: "application/octet-stream".into(),
        total_chunks: total_chunks_for(content.len() as u64),
        checksum: None,
    };

    let (sender_pipe, _receiver_pipe) = ChannelPipe::duplex_pair();
    let sender_pipe = Arc::new(sender_pipe);

    let config = TransferConfig::default();
    let (sender, _state, _progress) = SenderEngine::new(config);
    let sender = Arc::new(sender);

    sender.cancel();
    let handle = tokio::spawn({
        let sender = sender.clone();
        async move { sender.run(sender_pipe, source, meta).await }
    });

    let result = handle.await.unwrap();
    assert!(matches!(result, Err(driftlink_core::Error::Cancelled)));
}
