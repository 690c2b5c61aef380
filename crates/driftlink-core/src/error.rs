//! Error types for the transfer engine.

use thiserror::Error;

/// A specialized `Result` type for transfer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type covering the codec, flow-control, and engine layers.
#[derive(Error, Debug)]
pub enum Error {
    /// A binary chunk frame failed header or length validation.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// A JSON control message failed to parse or carried an invalid shape.
    #[error("malformed control message: {0}")]
    MalformedControl(String),

    /// `mark_sent` was called with no free slot in the sliding window.
    #[error("sliding window is full")]
    WindowFull,

    /// An operation was attempted before the engine reached the state it requires.
    #[error("engine is not ready: {0}")]
    NotReady(String),

    /// The underlying pipe reported (or was observed to be) closed.
    #[error("transport closed")]
    TransportClosed,

    /// The transfer was cancelled by the caller.
    #[error("transfer cancelled")]
    Cancelled,

    /// The peer violated the expected message sequencing.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The receiver's sink failed to accept a write.
    #[error("sink write failed: {0}")]
    SinkWriteFailed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Returns a short stable code for this error kind, for logging/metrics.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MalformedFrame(_) => "E101",
            Self::MalformedControl(_) => "E102",
            Self::WindowFull => "E103",
            Self::NotReady(_) => "E104",
            Self::TransportClosed => "E105",
            Self::Cancelled => "E106",
            Self::ProtocolViolation(_) => "E107",
            Self::SinkWriteFailed(_) => "E108",
            Self::Io(_) => "E109",
            Self::Serialization(_) => "E110",
        }
    }

    /// Returns whether retrying the same operation could plausibly succeed.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::TransportClosed | Self::NotReady(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
