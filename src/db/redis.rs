use axum::async_trait;
use redis::{AsyncCommands, Client};
use tracing::{error, info, instrument};

use super::{KeyValueStore, StoreError};

/// Redis-backed [`KeyValueStore`]; the deployment default.
#[derive(Clone)]
pub struct RedisStore {
    client: Client,
}

impl RedisStore {
    #[instrument]
    pub fn new(redis_url: &str) -> Result<Self, redis::RedisError> {
        info!(url = %redis_url, "Initializing Redis connection");

        match Client::open(redis_url) {
            Ok(client) => {
                info!("Redis client successfully created");
                Ok(Self { client })
            }
            Err(e) => {
                error!(error = %e, "Failed to create Redis client");
                Err(e)
            }
        }
    }

    async fn conn(&self) -> Result<redis::aio::Connection, StoreError> {
        self.client.get_async_connection().await.map_err(|e| {
            error!(error = %e, "Failed to get Redis connection");
            StoreError::from(e)
        })
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut con = self.conn().await?;
        Ok(con.get(key).await.map_err(StoreError::from)?)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError> {
        let mut con = self.conn().await?;
        redis::cmd("SETEX")
            .arg(key)
            .arg(ttl_secs)
            .arg(value)
            .query_async::<_, ()>(&mut con)
            .await
            .map_err(StoreError::from)
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        let mut con = self.conn().await?;
        con.del::<_, ()>(key).await.map_err(StoreError::from)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut con = self.conn().await?;
        Ok(con.exists(key).await.map_err(StoreError::from)?)
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let mut con = self.conn().await?;
        Ok(con.incr(key, 1i64).await.map_err(StoreError::from)?)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), StoreError> {
        let mut con = self.conn().await?;
        redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl_secs)
            .query_async::<_, ()>(&mut con)
            .await
            .map_err(StoreError::from)
    }

    async fn ttl(&self, key: &str) -> Result<i64, StoreError> {
        let mut con = self.conn().await?;
        redis::cmd("TTL")
            .arg(key)
            .query_async(&mut con)
            .await
            .map_err(StoreError::from)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut con = self.conn().await?;
        con.sadd::<_, _, ()>(key, member)
            .await
            .map_err(StoreError::from)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut con = self.conn().await?;
        Ok(con.smembers(key).await.map_err(StoreError::from)?)
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut con = self.conn().await?;
        con.srem::<_, _, ()>(key, member)
            .await
            .map_err(StoreError::from)
    }
}
