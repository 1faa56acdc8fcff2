//! Consumer-group reader over one Redis stream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use redis::streams::{StreamId, StreamPendingReply, StreamReadOptions, StreamReadReply};
use serde::Serialize;
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use dualgraph_core::config::StreamConfig;
use dualgraph_core::error::StreamError;
use dualgraph_core::event::model::{RawEvent, StreamOffset};
use dualgraph_core::ports::EventStream;

use crate::client::{init_pool, stream_error, RedisPool, RedisResult};

/// Field added to dead-lettered entries.
pub const FIELD_REASON: &str = "reason";
/// Offset the entry had in its source stream.
pub const FIELD_SOURCE_OFFSET: &str = "source_offset";

/// `XREADGROUP`-based implementation of [`EventStream`].
///
/// Owns its own connection: a blocking read parks the connection for up to
/// `block_ms`, which must not delay commands issued by anything else.
pub struct RedisEventStream {
    conn: RedisPool,
    key: String,
    group: String,
    consumer: String,
    block_ms: u64,
    dead_letter_key: String,
    /// Read this consumer's pending list before new entries.
    replay: AtomicBool,
}

impl RedisEventStream {
    /// Open a dedicated connection to `key` and make sure the group exists.
    pub async fn connect(redis_url: &str, key: &str, config: &StreamConfig) -> RedisResult<Self> {
        let conn = init_pool(redis_url).await?;
        let stream = Self::new(conn, key, config);
        stream.ensure_group().await?;
        Ok(stream)
    }

    pub fn new(conn: RedisPool, key: &str, config: &StreamConfig) -> Self {
        Self {
            conn,
            key: key.to_string(),
            group: config.group.clone(),
            consumer: config.consumer.clone(),
            block_ms: config.block_ms,
            dead_letter_key: format!("{}{}", key, config.dead_letter_suffix),
            replay: AtomicBool::new(true),
        }
    }

    /// `XGROUP CREATE <key> <group> 0 MKSTREAM`, tolerating an existing group.
    pub async fn ensure_group(&self) -> RedisResult<()> {
        let mut conn = self.conn.clone();
        let created: redis::RedisResult<()> = conn.xgroup_create_mkstream(&self.key, &self.group, "0").await;
        match created {
            Ok(()) => {
                info!(stream = %self.key, group = %self.group, "Created consumer group");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn dead_letter_key(&self) -> &str {
        &self.dead_letter_key
    }

    async fn read_group(&self, id: &str, count: usize, block: bool) -> Result<Vec<RawEvent>, StreamError> {
        let mut opts = StreamReadOptions::default().group(&self.group, &self.consumer).count(count);
        if block && self.block_ms > 0 {
            opts = opts.block(self.block_ms as usize);
        }

        let mut conn = self.conn.clone();
        let reply: redis::RedisResult<Option<StreamReadReply>> =
            conn.xread_options(&[&self.key], &[id], &opts).await;

        let reply = match reply {
            Ok(reply) => reply,
            Err(e) if e.code() == Some("NOGROUP") => {
                warn!(stream = %self.key, group = %self.group, "Consumer group missing, recreating");
                self.ensure_group().await?;
                return Ok(Vec::new());
            }
            Err(e) => return Err(stream_error(e)),
        };

        Ok(reply
            .map(|r| r.keys.into_iter().flat_map(|k| k.ids).map(to_raw_event).collect())
            .unwrap_or_default())
    }
}

/// Backlog figures for one stream, for status output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamStatus {
    pub key: String,
    pub length: u64,
    /// Delivered to the group but not yet acknowledged.
    pub pending: u64,
    pub dead_lettered: u64,
}

pub async fn stream_status(pool: &RedisPool, key: &str, config: &StreamConfig) -> RedisResult<StreamStatus> {
    let mut conn = pool.clone();
    let length: u64 = conn.xlen(key).await?;
    let dead_lettered: u64 = conn.xlen(format!("{}{}", key, config.dead_letter_suffix)).await?;

    let pending: redis::RedisResult<StreamPendingReply> = conn.xpending(key, &config.group).await;
    let pending = match pending {
        Ok(reply) => reply.count() as u64,
        Err(e) if e.code() == Some("NOGROUP") => 0,
        Err(e) => return Err(e.into()),
    };

    Ok(StreamStatus {
        key: key.to_string(),
        length,
        pending,
        dead_lettered,
    })
}

fn to_raw_event(entry: StreamId) -> RawEvent {
    let fields: HashMap<String, String> = entry
        .map
        .iter()
        .filter_map(|(name, value)| {
            redis::from_redis_value::<String>(value)
                .ok()
                .map(|v| (name.clone(), v))
        })
        .collect();
    RawEvent::new(StreamOffset::new(entry.id), fields)
}

#[async_trait]
impl EventStream for RedisEventStream {
    async fn read_batch(&self, max_items: usize) -> Result<Vec<RawEvent>, StreamError> {
        if max_items == 0 {
            return Ok(Vec::new());
        }

        let mut batch = Vec::new();
        if self.replay.load(Ordering::Acquire) {
            batch = self.read_group("0", max_items, false).await?;
            if batch.len() == max_items {
                debug!(stream = %self.key, count = batch.len(), "Replaying pending entries");
                return Ok(batch);
            }
            self.replay.store(false, Ordering::Release);
        }

        // Top up with new entries; only wait for them when nothing is pending.
        let remaining = max_items - batch.len();
        let fresh = self.read_group(">", remaining, batch.is_empty()).await?;
        batch.extend(fresh);
        Ok(batch)
    }

    async fn acknowledge(&self, offsets: &[StreamOffset]) -> Result<(), StreamError> {
        if offsets.is_empty() {
            return Ok(());
        }
        let ids: Vec<&str> = offsets.iter().map(StreamOffset::as_str).collect();
        let mut conn = self.conn.clone();
        let acked: i64 = conn.xack(&self.key, &self.group, &ids).await.map_err(stream_error)?;
        debug!(stream = %self.key, requested = ids.len(), acked, "Acknowledged entries");
        Ok(())
    }

    async fn replay_pending(&self) {
        self.replay.store(true, Ordering::Release);
    }

    async fn dead_letter(&self, event: &RawEvent, reason: &str) -> Result<(), StreamError> {
        let mut fields: Vec<(&str, &str)> = event.fields.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        fields.push((FIELD_REASON, reason));
        fields.push((FIELD_SOURCE_OFFSET, event.offset.as_str()));

        let mut conn = self.conn.clone();
        let id: String = conn
            .xadd(&self.dead_letter_key, "*", &fields)
            .await
            .map_err(stream_error)?;
        warn!(
            stream = %self.key,
            dead_letter = %self.dead_letter_key,
            offset = %event.offset,
            dead_letter_offset = %id,
            reason,
            "Dead-lettered entry"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        &self.key
    }
}
