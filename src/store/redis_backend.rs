//! Redis backend

use crate::error::{BackendError, PoolError};
use crate::store::connection::{Backend, HashConnection};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::Client;
use std::collections::HashMap;

/// Dials Redis sessions for the connection pool
pub struct RedisBackend {
    client: Client,
}

impl RedisBackend {
    /// Parse the connection URL; nothing is dialed yet
    pub fn open(url: &str) -> Result<Self, PoolError> {
        let client = Client::open(url).map_err(|e| PoolError::Config(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Backend for RedisBackend {
    type Connection = RedisConnection;

    async fn dial(&self) -> Result<RedisConnection, BackendError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(RedisConnection { conn })
    }
}

/// One Redis session
pub struct RedisConnection {
    conn: MultiplexedConnection,
}

#[async_trait]
impl HashConnection for RedisConnection {
    async fn hset(&mut self, key: &str, field: &str, value: &str) -> Result<(), BackendError> {
        let _: () = redis::cmd("HSET")
            .arg(key)
            .arg(field)
            .arg(value)
            .query_async(&mut self.conn)
            .await?;
        Ok(())
    }

    async fn hget(&mut self, key: &str, field: &str) -> Result<Option<String>, BackendError> {
        let value: Option<String> = redis::cmd("HGET")
            .arg(key)
            .arg(field)
            .query_async(&mut self.conn)
            .await?;
        Ok(value)
    }

    async fn hdel(&mut self, key: &str, field: &str) -> Result<(), BackendError> {
        let _: () = redis::cmd("HDEL")
            .arg(key)
            .arg(field)
            .query_async(&mut self.conn)
            .await?;
        Ok(())
    }

    async fn hlen(&mut self, key: &str) -> Result<usize, BackendError> {
        let len: usize = redis::cmd("HLEN").arg(key).query_async(&mut self.conn).await?;
        Ok(len)
    }

    async fn hgetall(&mut self, key: &str) -> Result<Vec<(String, String)>, BackendError> {
        let fields: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(key)
            .query_async(&mut self.conn)
            .await?;
        Ok(fields.into_iter().collect())
    }
}
