//! Session checkpoint store.
//!
//! Maps a client-supplied session key to the last persisted `SessionState`,
//! along with the stage that wrote it. The engine only talks to the
//! `SessionStore` port; backends are chosen at startup.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::interview::schema::SessionState;
use crate::interview::stages::Stage;

const REDIS_KEY_PREFIX: &str = "interview:session:";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Corrupt checkpoint for session '{key}': {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Last persisted state of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub state: SessionState,
    /// Stage whose completion produced this state.
    pub stage: Stage,
    /// Number of writes recorded for the session, this one included.
    pub step: u64,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Checkpoint>, StoreError>;

    async fn put(
        &self,
        key: &str,
        state: &SessionState,
        stage: Stage,
    ) -> Result<Checkpoint, StoreError>;

    /// Persisted state, or the empty default for a session never written.
    async fn load(&self, key: &str) -> Result<SessionState, StoreError> {
        Ok(self
            .get(key)
            .await?
            .map(|checkpoint| checkpoint.state)
            .unwrap_or_default())
    }
}

fn next_checkpoint(
    previous: Option<&Checkpoint>,
    state: &SessionState,
    stage: Stage,
) -> Checkpoint {
    Checkpoint {
        state: state.clone(),
        stage,
        step: previous.map_or(1, |c| c.step + 1),
        updated_at: Utc::now(),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// In-memory backend (default)
// ────────────────────────────────────────────────────────────────────────────

/// Process-lifetime store. Sessions are never evicted.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Checkpoint>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, key: &str) -> Result<Option<Checkpoint>, StoreError> {
        Ok(self.sessions.read().await.get(key).cloned())
    }

    async fn put(
        &self,
        key: &str,
        state: &SessionState,
        stage: Stage,
    ) -> Result<Checkpoint, StoreError> {
        let mut sessions = self.sessions.write().await;
        let checkpoint = next_checkpoint(sessions.get(key), state, stage);
        sessions.insert(key.to_string(), checkpoint.clone());
        debug!(session = key, %stage, step = checkpoint.step, "checkpoint written");
        Ok(checkpoint)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Redis backend
// ────────────────────────────────────────────────────────────────────────────

/// Stores each checkpoint as a JSON string under `interview:session:<key>`.
#[derive(Clone)]
pub struct RedisSessionStore {
    conn: MultiplexedConnection,
    ttl: Option<Duration>,
}

impl RedisSessionStore {
    pub async fn connect(url: &str, ttl: Option<Duration>) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!(
            "Redis session store connected (ttl: {})",
            ttl.map_or("none".to_string(), |t| format!("{}s", t.as_secs()))
        );
        Ok(Self { conn, ttl })
    }

    fn redis_key(key: &str) -> String {
        format!("{REDIS_KEY_PREFIX}{key}")
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn get(&self, key: &str) -> Result<Option<Checkpoint>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(Self::redis_key(key))
            .query_async(&mut conn)
            .await?;

        raw.map(|json| {
            serde_json::from_str(&json).map_err(|source| StoreError::Corrupt {
                key: key.to_string(),
                source,
            })
        })
        .transpose()
    }

    async fn put(
        &self,
        key: &str,
        state: &SessionState,
        stage: Stage,
    ) -> Result<Checkpoint, StoreError> {
        // Writers for one key are serialized by the engine's session lock.
        let previous = self.get(key).await?;
        let checkpoint = next_checkpoint(previous.as_ref(), state, stage);
        let payload = serde_json::to_string(&checkpoint).map_err(|source| StoreError::Corrupt {
            key: key.to_string(),
            source,
        })?;

        let mut cmd = redis::cmd("SET");
        cmd.arg(Self::redis_key(key)).arg(payload);
        if let Some(ttl) = self.ttl {
            cmd.arg("EX").arg(ttl.as_secs().max(1));
        }
        let mut conn = self.conn.clone();
        cmd.query_async::<_, ()>(&mut conn).await?;

        debug!(session = key, %stage, step = checkpoint.step, "checkpoint written");
        Ok(checkpoint)
    }
}
