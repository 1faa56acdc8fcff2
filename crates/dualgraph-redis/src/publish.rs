//! Writer side of the event log.

use redis::AsyncCommands;
use tracing::debug;

use dualgraph_core::event::model::{GraphEvent, StreamOffset};

use crate::client::{RedisPool, RedisResult};

/// Append one event with `XADD <key> * event_id .. kind .. payload ..`.
pub async fn publish_event(pool: &RedisPool, stream_key: &str, event: &GraphEvent) -> RedisResult<StreamOffset> {
    let fields = event.to_fields()?;
    let mut conn = pool.clone();
    let id: String = conn.xadd(stream_key, "*", &fields).await?;
    debug!(stream = stream_key, event_id = %event.event_id, kind = %event.kind(), offset = %id, "Published event");
    Ok(StreamOffset::new(id))
}

