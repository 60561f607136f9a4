//! Networked cache backed by Redis with per-key expiry.

use super::{CacheError, ResultCache};
use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::Client;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::debug;

/// Default connect and response timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Reconnect attempts made per failed command before giving up.
const RECONNECT_RETRIES: usize = 2;

/// Redis-backed result cache.
///
/// The connection is opened on first use. A failed first attempt is retried
/// on the next call, and an established connection reconnects on its own
/// after the server goes away.
pub struct RedisCache {
    client: Client,
    connection: OnceCell<ConnectionManager>,
    ttl_seconds: u64,
    timeout: Duration,
}

impl RedisCache {
    /// Create a cache for the server at `url` (e.g. `redis://127.0.0.1:6379`).
    pub fn new(url: &str, ttl_seconds: u64) -> Result<Self, CacheError> {
        let client = Client::open(url)
            .map_err(|e| CacheError::Unavailable(format!("invalid redis url: {}", e)))?;

        Ok(Self {
            client,
            connection: OnceCell::new(),
            ttl_seconds: ttl_seconds.max(1),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Bound connection attempts and responses by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Expiry applied to every stored key, in seconds.
    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }

    /// Whether a connection has been established.
    pub fn is_connected(&self) -> bool {
        self.connection.initialized()
    }

    async fn connection(&self) -> Result<ConnectionManager, redis::RedisError> {
        let conn = self
            .connection
            .get_or_try_init(|| async {
                debug!("Opening redis connection");
                let config = ConnectionManagerConfig::new()
                    .set_connection_timeout(self.timeout)
                    .set_response_timeout(self.timeout)
                    .set_number_of_retries(RECONNECT_RETRIES);
                self.client.get_connection_manager_with_config(config).await
            })
            .await?;
        Ok(conn.clone())
    }
}

#[async_trait]
impl ResultCache for RedisCache {
    async fn get_record(&self, key: &str) -> Result<String, CacheError> {
        let mut conn = self
            .connection()
            .await
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;

        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;

        value.ok_or(CacheError::RecordNotFound)
    }

    async fn set_record(&self, key: &str, value: String) -> Result<(), CacheError> {
        let mut conn = self
            .connection()
            .await
            .map_err(|e| CacheError::SaveFailure(e.to_string()))?;

        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(self.ttl_seconds)
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::SaveFailure(e.to_string()))?;

        Ok(())
    }

    fn name(&self) -> &str {
        "redis"
    }
}
