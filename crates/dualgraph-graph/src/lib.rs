//! # dualgraph Graph
//!
//! Persistent side of the dual-backend graph: the Neo4j client and schema,
//! the mutation model with its Cypher rendering, the CDC event processor,
//! and the sync worker that mirrors the event log into the store.

pub mod client;
pub mod memory;
pub mod mutation;
pub mod processor;
pub mod queries;
pub mod schema;
pub mod store;
pub mod sync;

pub use client::{GraphClient, GraphCounts};
pub use memory::InMemoryGraphStore;
pub use mutation::{Mutation, MutationOp, NODE_LABEL};
pub use processor::{EventProcessor, MalformedEvent};
pub use store::{Direction, GraphStore};
pub use sync::retry::{RecordingSleeper, RetryPolicy, Sleeper, TokioSleeper};
pub use sync::{SyncError, SyncWorker, WorkerState};
