//! Durable applied-event ledger.
//!
//! One expiring marker per applied event, stored next to the stream it came
//! from: `SET <stream>:applied:<event_id> 1 NX EX <ttl>`. Markers survive a
//! worker restart, and the TTL bounds the ledger without an eviction pass.

use async_trait::async_trait;
use redis::AsyncCommands;

use dualgraph_core::error::StreamError;
use dualgraph_core::ports::DedupStore;

use crate::client::{stream_error, RedisPool};

pub struct RedisDedupStore {
    pool: RedisPool,
    stream_key: String,
    ttl_secs: u64,
}

fn marker_key(stream_key: &str, event_id: &str) -> String {
    format!("{}:applied:{}", stream_key, event_id)
}

impl RedisDedupStore {
    pub fn new(pool: RedisPool, stream_key: &str, ttl_secs: u64) -> Self {
        Self {
            pool,
            stream_key: stream_key.to_string(),
            ttl_secs,
        }
    }
}

#[async_trait]
impl DedupStore for RedisDedupStore {
    async fn contains(&self, event_id: &str) -> Result<bool, StreamError> {
        let mut conn = self.pool.clone();
        conn.exists(marker_key(&self.stream_key, event_id)).await.map_err(stream_error)
    }

    async fn mark_applied(&self, event_id: &str) -> Result<(), StreamError> {
        let mut conn = self.pool.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(marker_key(&self.stream_key, event_id)).arg(1).arg("NX");
        if self.ttl_secs > 0 {
            cmd.arg("EX").arg(self.ttl_secs);
        }
        let _: Option<String> = cmd.query_async(&mut conn).await.map_err(stream_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::marker_key;

    #[test]
    fn test_marker_key_is_scoped_to_stream() {
        assert_eq!(marker_key("repo:events", "evt-9"), "repo:events:applied:evt-9");
        assert_ne!(marker_key("a:events", "evt-9"), marker_key("b:events", "evt-9"));
    }
}
