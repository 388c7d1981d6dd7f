//! Redis-backed `TokenStore` (§6), grounded on the original source's
//! `base.py` (`save_key`/`get_key_info`/`destroy_key` over raw
//! `SET`/`GET`/`DEL`). A connection-pooled client replaces the source's
//! single `aioredis` connection, since this core is reused across
//! concurrent envelopes (§5).

use super::TokenStore;
use async_trait::async_trait;
use deadpool_redis::{redis::AsyncCommands, Pool};

pub struct RedisTokenStore {
    pool: Pool,
}

impl RedisTokenStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenStore for RedisTokenStore {
    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut conn = self.pool.get().await?;
        conn.set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let mut conn = self.pool.get().await?;
        Ok(conn.get(key).await?)
    }

    async fn del(&self, key: &str) -> anyhow::Result<()> {
        let mut conn = self.pool.get().await?;
        conn.del::<_, ()>(key).await?;
        Ok(())
    }
}
