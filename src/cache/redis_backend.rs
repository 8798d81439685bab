//! Thin wrapper over the handful of Redis commands the resolver uses:
//! `PING`, `SET`, `EXPIRE`, `GET`, `INCR`.

use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::{error, info, warn};

use crate::error::{ResolverError, Result};

#[derive(Clone)]
pub struct RedisBackend {
    conn: ConnectionManager,
}

impl RedisBackend {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| ResolverError::Redis(format!("invalid redis url: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| ResolverError::Redis(format!("connection failed: {e}")))?;
        info!("connected to redis at {}", redis_url);
        Ok(Self { conn })
    }

    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| ResolverError::Redis(format!("ping failed: {e}")))?;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let mut conn = self.conn.clone();
        match conn.get::<_, Option<String>>(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!("redis GET {} failed: {}", key, e);
                None
            }
        }
    }

    pub async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) {
        let mut conn = self.conn.clone();
        if let Err(e) = conn.set_ex::<_, _, ()>(key, value, ttl_secs.max(1)).await {
            error!("redis SET {} failed: {}", key, e);
        }
    }

    pub async fn set(&self, key: &str, value: &str) {
        let mut conn = self.conn.clone();
        if let Err(e) = conn.set::<_, _, ()>(key, value).await {
            error!("redis SET {} failed: {}", key, e);
        }
    }

    pub async fn incr(&self, key: &str) {
        let mut conn = self.conn.clone();
        if let Err(e) = conn.incr::<_, _, ()>(key, 1).await {
            warn!("redis INCR {} failed: {}", key, e);
        }
    }
}
