//! Demo binary for `driftlink-core`: wires a real file on disk through one
//! [`SenderEngine`]/[`ReceiverEngine`] pair connected by an in-process
//! [`ChannelPipe`], printing progress the way the teacher's commands read
//! `ShareSession::progress()`/`ReceiveSession::progress()`.
//!
//! This is ambient scaffolding, not a product surface: no discovery, no
//! clipboard, no TUI. Its only job is to give the core engines one real,
//! compilable caller outside their own test suite.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use driftlink_core::codec::FileMeta;
use driftlink_core::io::{total_chunks_for, FileChunkSource, FileWriteSink};
use driftlink_core::pipe::ChannelPipe;
use driftlink_core::transfer::receiver::{ReceiverEngine, TransferOutcome};
use driftlink_core::transfer::sender::SenderEngine;
use driftlink_core::transfer::{TransferConfig, TransferProgress};

#[derive(Parser)]
#[command(name = "driftlink", version, about = "DriftLink chunked-transfer demo")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Transfer a file to a destination path over an in-process pipe and
    /// report on it.
    ///
    /// There is no network and no rendezvous PIN here — this exercises the
    /// same `SenderEngine`/`ReceiverEngine` pair a real peer-to-peer
    /// transfer would use, just connected directly by a `ChannelPipe`
    /// instead of a WebRTC data channel.
    Demo {
        /// Path to the file to send.
        source: PathBuf,
        /// Where the receiver should write the reassembled file.
        destination: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "driftlink_cli=info".into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Demo { source, destination } => run_demo(source, destination).await,
    }
}

async fn run_demo(source: PathBuf, destination: PathBuf) -> Result<()> {
    let metadata = tokio::fs::metadata(&source)
        .await
        .with_context(|| format!("reading metadata for {}", source.display()))?;
    let size = metadata.len();
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());

    let meta = FileMeta {
        name,
        size,
        mime_type: "application/octet-stream".into(),
        total_chunks: total_chunks_for(size),
        checksum: None,
    };

    let chunk_source = Arc::new(
        FileChunkSource::open(&source)
            .await
            .with_context(|| format!("opening {}", source.display()))?,
    );

    let (sender_pipe, receiver_pipe) = ChannelPipe::duplex_pair();
    let (sender_pipe, receiver_pipe) = (Arc::new(sender_pipe), Arc::new(receiver_pipe));

    // The sink factory the receiver engine calls is synchronous (it only
    // learns `FileMeta` once `file-meta` arrives over the wire), but
    // `FileWriteSink::create` is async. This demo already knows the size up
    // front, so the sink is created before the engines start and the
    // factory just hands back the already-open handle.
    let sink: Arc<dyn driftlink_core::io::WriteSink> =
        Arc::new(FileWriteSink::create(destination.clone(), size).await.with_context(|| {
            format!("creating destination file {}", destination.display())
        })?);

    let config = TransferConfig::default();
    let (sender, _sender_state, sender_progress) = SenderEngine::new(config);
    let (receiver, _receiver_state, receiver_progress) = ReceiverEngine::new(config);

    tokio::spawn(report_progress("send", sender_progress));
    tokio::spawn(report_progress("recv", receiver_progress));

    let sender_handle = tokio::spawn({
        let meta = meta.clone();
        async move { sender.run(sender_pipe, chunk_source, meta).await }
    });
    let receiver_handle = tokio::spawn(async move {
        receiver.run(receiver_pipe, move |_meta| Some(sink)).await
    });

    sender_handle
        .await
        .context("sender task panicked")?
        .context("sender failed")?;
    let (received_meta, outcome) = receiver_handle
        .await
        .context("receiver task panicked")?
        .context("receiver failed")?;

    match outcome {
        TransferOutcome::WrittenToSink => {
            tracing::info!(
                name = received_meta.name.as_str(),
                bytes = received_meta.size,
                destination = %destination.display(),
                "transfer complete"
            );
        }
        TransferOutcome::Assembled(data) => {
            tokio::fs::write(&destination, &data)
                .await
                .with_context(|| format!("writing {}", destination.display()))?;
            tracing::info!(
                name = received_meta.name.as_str(),
                bytes = data.len(),
                destination = %destination.display(),
                "transfer complete (in-memory fallback)"
            );
        }
    }

    Ok(())
}

async fn report_progress(label: &str, mut progress: tokio::sync::watch::Receiver<TransferProgress>) {
    while progress.changed().await.is_ok() {
        let snapshot = progress.borrow().clone();
        println!(
            "[{label}] {:>6.2}% ({}/{} bytes, {:.0} B/s)",
            snapshot.percentage(),
            snapshot.bytes_done,
            snapshot.total_bytes,
            snapshot.throughput_bps(),
        );
        if snapshot.bytes_done >= snapshot.total_bytes {
            break;
        }
    }
}
