//! Durable state in Redis: file/video associations and host media records.

pub mod association;
pub mod media;
pub mod redis;

pub use association::{Association, AssociationStore, CompletionMarker, LockToken};
pub use media::RedisMediaHost;
pub use redis::RedisAssociationStore;

use crate::error::StoreError;

/// Opens a Redis connection manager.
pub async fn connect(redis_url: &str) -> Result<::redis::aio::ConnectionManager, StoreError> {
    let client = ::redis::Client::open(redis_url).map_err(|e| StoreError::ConnectionFailed {
        url: redis_url.to_string(),
        message: e.to_string(),
    })?;

    client
        .get_connection_manager()
        .await
        .map_err(|e| StoreError::ConnectionFailed {
            url: redis_url.to_string(),
            message: e.to_string(),
        })
}
