//! dualgraph Redis Layer
//!
//! Redis Streams implementation of the CDC event log: consumer-group reads
//! with explicit acknowledgment, a publisher for the writer side, the durable
//! de-dup ledger and the dead-letter stream. `memory` holds in-process
//! stand-ins with the same delivery semantics for tests and local runs.

pub mod client;
pub mod dedup;
pub mod memory;
pub mod publish;
pub mod stream;

pub use client::{init_pool, RedisError, RedisPool, RedisResult};
pub use dedup::RedisDedupStore;
pub use memory::{InMemoryEventStream, MemoryDedupStore};
pub use publish::publish_event;
pub use stream::{stream_status, RedisEventStream, StreamStatus};
