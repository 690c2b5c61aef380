//! # DriftLink Core Library
//!
//! `driftlink-core` implements the chunked, flow-controlled file transfer
//! engine that sits behind a DriftLink rendezvous session: a binary chunk
//! codec, an application-level sliding window, a received-ranges tracker,
//! and the sender/receiver state machines that drive a transfer end to end
//! over an abstract, ordered/reliable/bidirectional [`pipe::Pipe`].
//!
//! ## Modules
//!
//! - [`codec`] - binary chunk frames and JSON control messages
//! - [`pipe`] - the abstract transport the engines run over
//! - [`window`] - application-level sliding window flow control
//! - [`ranges`] - received-chunk bookkeeping and coalesced ranges
//! - [`io`] - chunk sources and write sinks (file-backed and in-memory)
//! - [`transfer`] - sender and receiver engines, progress, and resume
//!
//! This crate has no networking dependencies beyond [`tokio`] and
//! [`async_trait`] — it never opens a socket itself. A rendezvous/signaling
//! service (pairing two peers and exchanging an implementation of
//! [`pipe::Pipe`] between them) is a separate concern.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::unused_async)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]

pub mod codec;
pub mod error;
pub mod io;
pub mod pipe;
pub mod ranges;
pub mod transfer;
pub mod window;

pub use error::{Error, Result};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
