//! A [`SessionStore`] backed by Redis, for deployments that run more than
//! one rendezvous process behind a shared registry.
//!
//! Uses the two key families spec.md §6 specifies: `pin:{PIN}` is a hash
//! with fields `sender_conn_id`/`receiver_conn_id`, `connection:{connId}` is
//! a plain string holding the owning PIN. Both are `EXPIRE`d to the same
//! TTL on every write that touches them, so expiry is enforced by Redis
//! itself rather than a local sweep task.

use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::error::{RegistryError, Result};
use crate::store::{JoinOutcome, SessionRecord, SessionStore};

fn pin_key(pin: &str) -> String {
    format!("pin:{pin}")
}

fn connection_key(conn_id: &str) -> String {
    format!("connection:{conn_id}")
}

/// A Redis-backed [`SessionStore`].
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to `redis://{host}:{port}`, authenticating with `password` if given.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Store`] if the client cannot be built or the
    /// initial connection fails.
    pub async fn connect(host: &str, port: u16, password: Option<&str>) -> Result<Self> {
        let auth = password.map_or_else(String::new, |p| format!(":{p}@"));
        let url = format!("redis://{auth}{host}:{port}");
        let client =
            redis::Client::open(url).map_err(|e| RegistryError::Store(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| RegistryError::Store(e.to_string()))?;
        Ok(Self { conn })
    }
}

#[async_trait::async_trait]
impl SessionStore for RedisStore {
    async fn create(&self, pin: &str, sender_conn_id: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let key = pin_key(pin);
        let created: bool = conn
            .hset_nx(&key, "sender_conn_id", sender_conn_id)
            .await
            .map_err(|e| RegistryError::Store(e.to_string()))?;
        if !created {
            return Ok(false);
        }
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let _: () = conn
            .expire(&key, ttl_secs)
            .await
            .map_err(|e| RegistryError::Store(e.to_string()))?;
        let conn_key = connection_key(sender_conn_id);
        let _: () = conn
            .set_ex(&conn_key, pin, ttl.as_secs())
            .await
            .map_err(|e| RegistryError::Store(e.to_string()))?;
        Ok(true)
    }

    async fn join(
        &self,
        pin: &str,
        receiver_conn_id: &str,
        ttl: Duration,
    ) -> Result<Option<JoinOutcome>> {
        let mut conn = self.conn.clone();
        let key = pin_key(pin);
        let exists: bool = conn
            .exists(&key)
            .await
            .map_err(|e| RegistryError::Store(e.to_string()))?;
        if !exists {
            return Ok(None);
        }
        let existing_receiver: Option<String> = conn
            .hget(&key, "receiver_conn_id")
            .await
            .map_err(|e| RegistryError::Store(e.to_string()))?;
        if existing_receiver.is_some() {
            return Ok(Some(JoinOutcome::AlreadyFull));
        }
        let _: () = conn
            .hset(&key, "receiver_conn_id", receiver_conn_id)
            .await
            .map_err(|e| RegistryError::Store(e.to_string()))?;
        // A join is renewed activity same as a create: refresh both key
        // families back to the full TTL rather than inheriting whatever was
        // left on the creator's original countdown.
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let _: () = conn
            .expire(&key, ttl_secs)
            .await
            .map_err(|e| RegistryError::Store(e.to_string()))?;
        let conn_key = connection_key(receiver_conn_id);
        let _: () = conn
            .set_ex(&conn_key, pin, ttl.as_secs())
            .await
            .map_err(|e| RegistryError::Store(e.to_string()))?;
        Ok(Some(JoinOutcome::Joined))
    }

    async fn get(&self, pin: &str) -> Result<Option<SessionRecord>> {
        let mut conn = self.conn.clone();
        let key = pin_key(pin);
        let fields: Vec<(String, String)> = conn
            .hgetall(&key)
            .await
            .map_err(|e| RegistryError::Store(e.to_string()))?;
        if fields.is_empty() {
            return Ok(None);
        }
        let mut sender_conn_id = None;
        let mut receiver_conn_id = None;
        for (field, value) in fields {
            match field.as_str() {
                "sender_conn_id" => sender_conn_id = Some(value),
                "receiver_conn_id" => receiver_conn_id = Some(value),
                _ => {}
            }
        }
        let Some(sender_conn_id) = sender_conn_id else {
            return Ok(None);
        };
        let ttl: i64 = conn
            .ttl(&key)
            .await
            .map_err(|e| RegistryError::Store(e.to_string()))?;
        Ok(Some(SessionRecord {
            pin: pin.to_string(),
            sender_conn_id,
            receiver_conn_id,
            expires_at: std::time::Instant::now()
                + Duration::from_secs(u64::try_from(ttl.max(0)).unwrap_or(0)),
        }))
    }

    async fn pin_for_connection(&self, conn_id: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(connection_key(conn_id))
            .await
            .map_err(|e| RegistryError::Store(e.to_string()))
    }

    async fn remove(&self, pin: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let key = pin_key(pin);
        if let Some(record) = self.get(pin).await? {
            let _: () = conn
                .del(connection_key(&record.sender_conn_id))
                .await
                .map_err(|e| RegistryError::Store(e.to_string()))?;
            if let Some(receiver) = &record.receiver_conn_id {
                let _: () = conn
                    .del(connection_key(receiver))
                    .await
                    .map_err(|e| RegistryError::Store(e.to_string()))?;
            }
        }
        let _: () = conn
            .del(&key)
            .await
            .map_err(|e| RegistryError::Store(e.to_string()))?;
        Ok(())
    }

    async fn sweep_expired(&self) {
        // Redis enforces TTLs natively via `EXPIRE`; there is nothing for a
        // local sweep task to do.
    }
}
