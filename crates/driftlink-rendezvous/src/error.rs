//! Error types for the session registry and its HTTP/WebSocket surface.

use thiserror::Error;

/// A specialized `Result` type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors raised by [`crate::pin`], [`crate::session`], and [`crate::signaling`].
///
/// Every variant maps to one of the closed set of wire codes in spec.md §6
/// (`PIN_IN_USE`, `INVALID_PIN`, `SESSION_FULL`, `RATE_LIMITED`,
/// `CAPACITY_EXCEEDED`, `MALFORMED_MESSAGE`) via [`Self::wire_code`] — no
/// other code is ever sent to a client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The PIN failed the normalization/alphabet/length contract, or no
    /// session exists for it (expired, never created, or already removed).
    ///
    /// Both cases share a wire code: per spec.md §8's boundary case and
    /// invariant 5, a lookup miss must not let a client distinguish "bad
    /// PIN" from "PIN never existed" by error code alone.
    #[error("invalid PIN: {0}")]
    InvalidPin(String),

    /// A second peer tried to join a session that already has a receiver.
    #[error("session is full")]
    SessionFull,

    /// PIN generation exhausted its collision-retry budget.
    #[error("capacity exceeded: unable to allocate a unique PIN")]
    CapacityExceeded,

    /// A signaling envelope failed to parse or was missing a required field.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// Reserved for a future allocator that lets a client request a specific
    /// PIN; unreachable today since [`crate::session`] always mints PINs
    /// itself and retries internally on collision.
    #[error("PIN already in use")]
    PinInUse,

    /// Reserved for a future per-connection rate limiter; unreachable today
    /// since the registry does not yet throttle signaling traffic.
    #[error("rate limited")]
    RateLimited,

    /// The backing KV store rejected or failed an operation.
    #[error("store error: {0}")]
    Store(String),
}

impl RegistryError {
    /// The stable error code sent to clients over the signaling socket.
    #[must_use]
    pub const fn wire_code(&self) -> &'static str {
        match self {
            Self::InvalidPin(_) => "INVALID_PIN",
            Self::SessionFull => "SESSION_FULL",
            Self::CapacityExceeded => "CAPACITY_EXCEEDED",
            Self::MalformedMessage(_) => "MALFORMED_MESSAGE",
            Self::PinInUse => "PIN_IN_USE",
            Self::RateLimited => "RATE_LIMITED",
            // The store is an implementation detail the wire protocol has no
            // code for; surface it as a malformed-message-shaped failure
            // rather than inventing a code outside the closed set.
            Self::Store(_) => "MALFORMED_MESSAGE",
        }
    }
}
