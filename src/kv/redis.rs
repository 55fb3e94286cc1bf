//! Redis backend.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::kv::{KvError, KvStore};

/// Key-value store backed by a remote Redis server.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Open a managed connection, failing if Redis is not reachable in time.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, KvError> {
        let client = redis::Client::open(url)?;
        let conn = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| KvError::ConnectionFailed(format!("timed out after {:?}", timeout)))??;
        Ok(Self { conn })
    }

    fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn exists(&self, key: &str) -> Result<bool, KvError> {
        let found: bool = self.connection().exists(key).await?;
        Ok(found)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let value: Option<String> = self.connection().get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<(), KvError> {
        let mut conn = self.connection();
        match ttl_secs {
            Some(ttl) => {
                let _: () = conn.set_ex(key, value, ttl).await?;
            }
            None => {
                let _: () = conn.set(key, value).await?;
            }
        }
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, KvError> {
        let value: i64 = self.connection().incr(key, 1).await?;
        Ok(value)
    }

    async fn expire(&self, key: &str, secs: i64) -> Result<bool, KvError> {
        let applied: bool = self.connection().expire(key, secs).await?;
        Ok(applied)
    }

    async fn del(&self, key: &str) -> Result<bool, KvError> {
        let removed: i64 = self.connection().del(key).await?;
        Ok(removed > 0)
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<i64, KvError> {
        let len: i64 = self.connection().rpush(key, value).await?;
        Ok(len)
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, KvError> {
        let items: Vec<String> = self
            .connection()
            .lrange(key, start as isize, stop as isize)
            .await?;
        Ok(items)
    }

    async fn flush_db(&self) -> Result<(), KvError> {
        let mut conn = self.connection();
        let _: () = redis::cmd("FLUSHDB").query_async(&mut conn).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
