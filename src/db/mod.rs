use std::fmt;
use std::sync::Arc;

use axum::async_trait;
use sqlx::SqlitePool;
use tracing::info;

pub mod memory;
pub mod redis;
pub mod store;

pub use store::{AuthStore, RateLimitDecision};

#[derive(Debug)]
pub struct StoreError(pub String);

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<::redis::RedisError> for StoreError {
    fn from(err: ::redis::RedisError) -> Self {
        StoreError(err.to_string())
    }
}

impl From<StoreError> for crate::error::AuthError {
    fn from(err: StoreError) -> Self {
        crate::error::AuthError::Store(err.0)
    }
}

/// Minimal key-value surface the auth subsystem needs: TTL-bound strings for
/// sessions and revocations, sets for per-user indexes, atomic counters for
/// rate limiting. Backed by Redis in deployment and by an in-process map in
/// tests and single-instance setups.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError>;
    async fn del(&self, key: &str) -> Result<(), StoreError>;
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Atomic increment; creates the key at 1 if absent.
    async fn incr(&self, key: &str) -> Result<i64, StoreError>;
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), StoreError>;
    /// Remaining TTL in seconds; negative when absent or unbounded, matching
    /// Redis `TTL` semantics.
    async fn ttl(&self, key: &str) -> Result<i64, StoreError>;

    async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError>;
    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError>;
    async fn srem(&self, key: &str, member: &str) -> Result<(), StoreError>;
}

pub async fn create_db_pool(database_url: &str) -> SqlitePool {
    let pool = SqlitePool::connect(database_url)
        .await
        .expect("Failed to connect to database");

    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("Failed to run database migrations");

    pool
}

/// Pick the key-value backend from configuration. An empty `REDIS_URL`
/// selects the in-process store, which is only correct for a single deployed
/// instance.
pub fn create_auth_store(redis_url: &str) -> AuthStore {
    let kv: Arc<dyn KeyValueStore> = if redis_url.is_empty() {
        info!("REDIS_URL not set, using in-process key-value store (single instance only)");
        Arc::new(memory::MemoryStore::new())
    } else {
        Arc::new(redis::RedisStore::new(redis_url).expect("Failed to create Redis store"))
    };
    AuthStore::new(kv)
}
