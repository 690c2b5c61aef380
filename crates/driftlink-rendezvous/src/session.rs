//! Session registry: the PIN-keyed pairing operations signaling drives.
//!
//! Wraps a [`SessionStore`] with the allocation policy spec.md §4.5
//! describes — PIN minting with a bounded collision-retry loop, join/lookup/
//! removal — so [`crate::signaling`] never talks to the store directly.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::OsRng;

use crate::error::{RegistryError, Result};
use crate::pin;
use crate::store::{JoinOutcome, SessionRecord, SessionStore};

/// Number of PIN-allocation attempts before giving up with `CapacityExceeded`.
///
/// At 32^6 ≈ 1.07 billion possible PINs, a collision on any single attempt is
/// vanishingly unlikely outside of near-total alphabet exhaustion; eight
/// attempts is generous headroom, not a load-bearing retry budget.
pub const MAX_PIN_ATTEMPTS: u32 = 8;

/// Default session TTL, mirrored from [`crate::store::SESSION_TTL_SECS`].
pub const DEFAULT_TTL: Duration = Duration::from_secs(crate::store::SESSION_TTL_SECS);

/// The PIN-keyed pairing operations a signaling connection drives.
pub struct SessionRegistry {
    store: Arc<dyn SessionStore>,
    ttl: Duration,
}

impl SessionRegistry {
    /// Wrap `store`, minting sessions with the given `ttl`.
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Mint a new session for `sender_conn_id`, retrying on PIN collision.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::CapacityExceeded`] if [`MAX_PIN_ATTEMPTS`]
    /// consecutive PINs are already in use, or the store's error if it fails.
    pub async fn create_session(&self, sender_conn_id: &str) -> Result<String> {
        let mut rng = OsRng;
        for _ in 0..MAX_PIN_ATTEMPTS {
            let candidate = pin::generate(&mut rng);
            if self.store.create(&candidate, sender_conn_id, self.ttl).await? {
                return Ok(candidate);
            }
        }
        Err(RegistryError::CapacityExceeded)
    }

    /// Validate `pin_input` and attempt to join its session as the receiver.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidPin`] if the input fails the PIN
    /// contract or no session exists for it, or [`RegistryError::SessionFull`]
    /// if the session already has a receiver.
    pub async fn join_session(
        &self,
        pin_input: &str,
        receiver_conn_id: &str,
    ) -> Result<SessionRecord> {
        let normalized = pin::validate(pin_input)?;
        match self.store.join(&normalized, receiver_conn_id, self.ttl).await? {
            Some(JoinOutcome::Joined) => self
                .store
                .get(&normalized)
                .await?
                .ok_or_else(|| RegistryError::InvalidPin(normalized.clone())),
            Some(JoinOutcome::AlreadyFull) => Err(RegistryError::SessionFull),
            None => Err(RegistryError::InvalidPin(normalized)),
        }
    }

    /// Fetch a session record by PIN.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the lookup itself fails.
    pub async fn get_session(&self, pin: &str) -> Result<Option<SessionRecord>> {
        self.store.get(pin).await
    }

    /// Fetch the PIN a connection id is (or was) part of.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the lookup itself fails.
    pub async fn get_pin_by_connection_id(&self, conn_id: &str) -> Result<Option<String>> {
        self.store.pin_for_connection(conn_id).await
    }

    /// Remove a session and its reverse-mapping entries.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the removal itself fails.
    pub async fn remove_session(&self, pin: &str) -> Result<()> {
        self.store.remove(pin).await
    }
}
