//! Redis connection management.

use dualgraph_core::error::StreamError;
use redis::aio::ConnectionManager;
use thiserror::Error;

/// Redis error types.
#[derive(Error, Debug)]
pub enum RedisError {
    #[error("Redis connection error: {0}")]
    Connection(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for Redis operations.
pub type RedisResult<T> = Result<T, RedisError>;

/// ConnectionManager multiplexes and reconnects internally. It is Clone, so
/// callers clone it to get a mutable handle for each operation.
pub type RedisPool = ConnectionManager;

/// Initialize a Redis connection pool from a URL.
///
/// Example URL: `redis://127.0.0.1:6379`
pub async fn init_pool(redis_url: &str) -> RedisResult<RedisPool> {
    let client = redis::Client::open(redis_url)?;
    let manager = ConnectionManager::new(client).await?;
    Ok(manager)
}

/// Map a driver error onto the stream taxonomy.
pub(crate) fn stream_error(err: redis::RedisError) -> StreamError {
    if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout() {
        StreamError::unavailable(err.to_string())
    } else {
        StreamError::protocol(err.to_string())
    }
}

impl From<RedisError> for StreamError {
    fn from(err: RedisError) -> Self {
        match err {
            RedisError::Connection(e) => stream_error(e),
            RedisError::Serialization(e) => StreamError::protocol(e.to_string()),
        }
    }
}
