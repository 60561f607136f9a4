//! Result cache capability and backends.
//!
//! A backend stores serialized [`AnalysisRecord`]s by key. Misses are an
//! expected outcome and are reported as [`CacheError::RecordNotFound`], never
//! as a fault.

pub mod memory;
pub mod redis;

use crate::record::AnalysisRecord;
use async_trait::async_trait;
use thiserror::Error;

pub use self::memory::MemoryCache;
pub use self::redis::RedisCache;

/// Error from a cache backend.
#[derive(Debug, Error)]
pub enum CacheError {
    /// No record stored under the key (or it expired).
    #[error("record not found")]
    RecordNotFound,

    /// The record could not be persisted.
    #[error("failed to save record: {0}")]
    SaveFailure(String),

    /// The backend could not be reached for a read.
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    /// A stored entry could not be decoded.
    #[error("corrupt cache entry: {0}")]
    Corrupt(String),
}

impl CacheError {
    /// Whether this is an ordinary miss.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::RecordNotFound)
    }
}

/// Key/value store for serialized analysis records.
#[async_trait]
pub trait ResultCache: Send + Sync {
    /// Fetch the last stored value for `key`.
    async fn get_record(&self, key: &str) -> Result<String, CacheError>;

    /// Store `value` under `key`, replacing any previous entry.
    async fn set_record(&self, key: &str, value: String) -> Result<(), CacheError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// Load and decode the record stored under `key`.
pub async fn load(cache: &dyn ResultCache, key: &str) -> Result<AnalysisRecord, CacheError> {
    let raw = cache.get_record(key).await?;
    AnalysisRecord::from_json(&raw).map_err(|e| CacheError::Corrupt(e.to_string()))
}

/// Encode and store `record` under `key`.
pub async fn store(
    cache: &dyn ResultCache,
    key: &str,
    record: &AnalysisRecord,
) -> Result<(), CacheError> {
    let raw = record
        .to_json()
        .map_err(|e| CacheError::SaveFailure(e.to_string()))?;
    cache.set_record(key, raw).await
}
