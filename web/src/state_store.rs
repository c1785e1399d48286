//! The durable State Store: one opaque [`SessionState`] blob per session,
//! colocated with the actor and surviving hibernation.

use async_trait::async_trait;
use bb8_redis::bb8::Pool;
use bb8_redis::redis::AsyncCommands;
use bb8_redis::RedisConnectionManager;
use classroom_engine::session_state::SessionState;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("no persisted state for session {0}")]
    NotFound(String),
    #[error("state store connection error: {0}")]
    Connection(#[from] bb8_redis::bb8::RunError<bb8_redis::redis::RedisError>),
    #[error("state store error: {0}")]
    Redis(#[from] bb8_redis::redis::RedisError),
    #[error("state blob was corrupt: {0}")]
    Serde(#[from] serde_json::Error),
}

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, session_id: &str) -> Result<Option<SessionState>, StateStoreError>;
    async fn put(&self, session_id: &str, state: &SessionState) -> Result<(), StateStoreError>;
    async fn delete(&self, session_id: &str) -> Result<(), StateStoreError>;
}

fn redis_key(session_id: &str) -> String {
    format!("session-runtime-state:{session_id}")
}

/// The production store, backed by Redis. One key per session holding the
/// JSON-serialized [`SessionState`]; no TTL is set here because a
/// completed session's state is cleared explicitly rather than left to
/// expire mid-game.
pub struct RedisStateStore {
    pool: Pool<RedisConnectionManager>,
}

impl RedisStateStore {
    pub async fn connect(redis_url: &str) -> Result<Self, StateStoreError> {
        let manager = RedisConnectionManager::new(redis_url)
            .map_err(bb8_redis::bb8::RunError::User)?;
        let pool = Pool::builder().build(manager).await?;
        Ok(RedisStateStore { pool })
    }
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn get(&self, session_id: &str) -> Result<Option<SessionState>, StateStoreError> {
        let mut conn = self.pool.get().await?;
        let raw: Option<String> = conn.get(redis_key(session_id)).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, session_id: &str, state: &SessionState) -> Result<(), StateStoreError> {
        let mut conn = self.pool.get().await?;
        let json = serde_json::to_string(state)?;
        conn.set(redis_key(session_id), json).await?;
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<(), StateStoreError> {
        let mut conn = self.pool.get().await?;
        conn.del(redis_key(session_id)).await?;
        Ok(())
    }
}

/// An in-process store used by tests and by single-host deployments that
/// don't wire up Redis. Not crash-safe across process restarts, which is
/// exactly the hibernation guarantee the real store exists to provide.
pub struct InMemoryStateStore {
    states: tokio::sync::RwLock<std::collections::HashMap<String, SessionState>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        InMemoryStateStore { states: tokio::sync::RwLock::new(std::collections::HashMap::new()) }
    }
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get(&self, session_id: &str) -> Result<Option<SessionState>, StateStoreError> {
        Ok(self.states.read().await.get(session_id).cloned())
    }

    async fn put(&self, session_id: &str, state: &SessionState) -> Result<(), StateStoreError> {
        self.states.write().await.insert(session_id.to_string(), state.clone());
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<(), StateStoreError> {
        self.states.write().await.remove(session_id);
        Ok(())
    }
}
