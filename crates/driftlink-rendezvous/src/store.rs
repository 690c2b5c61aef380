//! The `SessionStore` abstraction over an external key-value store, plus an
//! in-memory implementation.
//!
//! Two key families back every session, matching a KV store's hash+TTL
//! primitives: `pin:{PIN}` holds the session record, `connection:{connId}`
//! is a reverse index from a connection id back to its PIN, so a
//! disconnect handler can look up "which session was this connection part
//! of" without scanning. Both keys share one TTL, refreshed independently
//! per store implementation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::error::Result;

/// Default time-to-live for a session, in seconds.
pub const SESSION_TTL_SECS: u64 = 600;

/// A paired (or half-paired) rendezvous session.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    /// The PIN this session is keyed by.
    pub pin: String,
    /// Connection id of the peer that created the session.
    pub sender_conn_id: String,
    /// Connection id of the peer that joined, once paired.
    pub receiver_conn_id: Option<String>,
    /// When this record expires and should be treated as gone.
    pub expires_at: Instant,
}

impl SessionRecord {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Outcome of attempting to join an existing session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The caller is now the session's receiver.
    Joined,
    /// The session already has a receiver.
    AlreadyFull,
}

/// The storage contract the session registry is built on.
///
/// Modeled as an external hash+TTL key-value store (e.g. Redis): an
/// implementation need not keep anything beyond what these methods require
/// in memory.
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a new session for `pin` with `sender_conn_id` as its creator.
    ///
    /// Returns `Ok(false)` without creating anything if `pin` is already in use.
    async fn create(&self, pin: &str, sender_conn_id: &str, ttl: Duration) -> Result<bool>;

    /// Attempt to join an existing session as its receiver.
    ///
    /// On success, refreshes `ttl` on both key families (the `pin:{PIN}`
    /// record and both connections' reverse mappings) — a join counts as
    /// renewed activity, so a just-paired session doesn't expire on the
    /// creator's original countdown.
    async fn join(
        &self,
        pin: &str,
        receiver_conn_id: &str,
        ttl: Duration,
    ) -> Result<Option<JoinOutcome>>;

    /// Fetch a session record by PIN, if present and unexpired.
    async fn get(&self, pin: &str) -> Result<Option<SessionRecord>>;

    /// Fetch the PIN a given connection id is (or was) part of.
    async fn pin_for_connection(&self, conn_id: &str) -> Result<Option<String>>;

    /// Remove a session and its reverse-mapping entries.
    async fn remove(&self, pin: &str) -> Result<()>;

    /// Drop any entries whose TTL has elapsed. Implementations backed by a
    /// store with native key expiry (Redis `EXPIRE`) can no-op this.
    async fn sweep_expired(&self);
}

/// An in-memory [`SessionStore`], backed by two [`DashMap`]s, mirroring the
/// shape a WebSocket signaling relay typically keeps its session table in.
#[derive(Default)]
pub struct InMemoryStore {
    sessions: DashMap<String, SessionRecord>,
    connections: DashMap<String, String>,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Spawn a background task that periodically sweeps expired entries.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                store.sweep_expired().await;
            }
        })
    }
}

#[async_trait::async_trait]
impl SessionStore for InMemoryStore {
    async fn create(&self, pin: &str, sender_conn_id: &str, ttl: Duration) -> Result<bool> {
        // A single `entry` call holds the shard lock across the
        // occupied-and-unexpired check and the insert, so two concurrent
        // creates racing on the same candidate PIN can't both win.
        let created = match self.sessions.entry(pin.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) if entry.get().is_expired() => {
                entry.insert(SessionRecord {
                    pin: pin.to_string(),
                    sender_conn_id: sender_conn_id.to_string(),
                    receiver_conn_id: None,
                    expires_at: Instant::now() + ttl,
                });
                true
            }
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(SessionRecord {
                    pin: pin.to_string(),
                    sender_conn_id: sender_conn_id.to_string(),
                    receiver_conn_id: None,
                    expires_at: Instant::now() + ttl,
                });
                true
            }
        };
        if created {
            self.connections
                .insert(sender_conn_id.to_string(), pin.to_string());
        }
        Ok(created)
    }

    async fn join(
        &self,
        pin: &str,
        receiver_conn_id: &str,
        ttl: Duration,
    ) -> Result<Option<JoinOutcome>> {
        let mut entry = match self.sessions.get_mut(pin) {
            Some(entry) if !entry.is_expired() => entry,
            _ => return Ok(None),
        };
        if entry.receiver_conn_id.is_some() {
            return Ok(Some(JoinOutcome::AlreadyFull));
        }
        entry.receiver_conn_id = Some(receiver_conn_id.to_string());
        entry.expires_at = Instant::now() + ttl;
        self.connections
            .insert(receiver_conn_id.to_string(), pin.to_string());
        Ok(Some(JoinOutcome::Joined))
    }

    async fn get(&self, pin: &str) -> Result<Option<SessionRecord>> {
        match self.sessions.get(pin) {
            Some(entry) if !entry.is_expired() => Ok(Some(entry.clone())),
            _ => Ok(None),
        }
    }

    async fn pin_for_connection(&self, conn_id: &str) -> Result<Option<String>> {
        Ok(self.connections.get(conn_id).map(|v| v.clone()))
    }

    async fn remove(&self, pin: &str) -> Result<()> {
        if let Some((_, record)) = self.sessions.remove(pin) {
            self.connections.remove(&record.sender_conn_id);
            if let Some(receiver) = &record.receiver_conn_id {
                self.connections.remove(receiver);
            }
        }
        Ok(())
    }

    async fn sweep_expired(&self) {
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.is_expired())
            .map(|entry| entry.key().clone())
            .collect();
        for pin in expired {
            let _ = self.remove(&pin).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_join_pairs_two_connections() {
        let store = InMemoryStore::new();
        assert!(store.create("ABCDEF", "conn-a", Duration::from_secs(60)).await.unwrap());
        let outcome = store
            .join("ABCDEF", "conn-b", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(outcome, Some(JoinOutcome::Joined));

        let record = store.get("ABCDEF").await.unwrap().unwrap();
        assert_eq!(record.sender_conn_id, "conn-a");
        assert_eq!(record.receiver_conn_id.as_deref(), Some("conn-b"));
    }

    #[tokio::test]
    async fn create_rejects_duplicate_pin() {
        let store = InMemoryStore::new();
        store.create("ABCDEF", "conn-a", Duration::from_secs(60)).await.unwrap();
        assert!(!store.create("ABCDEF", "conn-c", Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn join_rejects_second_receiver() {
        let store = InMemoryStore::new();
        store.create("ABCDEF", "conn-a", Duration::from_secs(60)).await.unwrap();
        store.join("ABCDEF", "conn-b", Duration::from_secs(60)).await.unwrap();
        let second = store
            .join("ABCDEF", "conn-c", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(second, Some(JoinOutcome::AlreadyFull));
    }

    #[tokio::test]
    async fn pin_for_connection_resolves_both_sides() {
        let store = InMemoryStore::new();
        store.create("ABCDEF", "conn-a", Duration::from_secs(60)).await.unwrap();
        store.join("ABCDEF", "conn-b", Duration::from_secs(60)).await.unwrap();
        assert_eq!(
            store.pin_for_connection("conn-a").await.unwrap().as_deref(),
            Some("ABCDEF")
        );
        assert_eq!(
            store.pin_for_connection("conn-b").await.unwrap().as_deref(),
            Some("ABCDEF")
        );
    }

    #[tokio::test]
    async fn remove_clears_reverse_mapping() {
        let store = InMemoryStore::new();
        store.create("ABCDEF", "conn-a", Duration::from_secs(60)).await.unwrap();
        store.remove("ABCDEF").await.unwrap();
        assert!(store.get("ABCDEF").await.unwrap().is_none());
        assert!(store.pin_for_connection("conn-a").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn join_refreshes_ttl_past_the_creator_original_countdown() {
        let store = InMemoryStore::new();
        store
            .create("ABCDEF", "conn-a", Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_millis(5)).await;
        store
            .join("ABCDEF", "conn-b", Duration::from_secs(60))
            .await
            .unwrap();
        // Past the creator's original 10ms countdown, the session should
        // still be alive because the join refreshed it to a 60s TTL.
        tokio::time::advance(Duration::from_millis(10)).await;
        assert!(store.get("ABCDEF").await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_session_is_treated_as_absent() {
        let store = InMemoryStore::new();
        store
            .create("ABCDEF", "conn-a", Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_millis(20)).await;
        assert!(store.get("ABCDEF").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_expired_removes_stale_entries() {
        let store = InMemoryStore::new();
        store
            .create("ABCDEF", "conn-a", Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_millis(20)).await;
        store.sweep_expired().await;
        assert!(store.pin_for_connection("conn-a").await.unwrap().is_none());
    }
}
