//! dualgraph Core Library
//!
//! Domain models, error taxonomy, configuration and ports shared by the
//! query router and the CDC replication pipeline.

pub mod config;
pub mod error;
pub mod event;
pub mod ports;
pub mod routing;
pub mod stats;

pub use config::Config;
pub use error::{ConfigError, StoreError, StreamError};
pub use event::model::{EdgePayload, EventKind, GraphChange, GraphEvent, NodePayload, RawEvent, StreamOffset};
pub use ports::{DedupStore, EventStream};
pub use routing::model::{ComplexityScore, RoutingDecision, RoutingReason, RoutingTarget, RoutingThresholds};
pub use stats::SyncStatistics;
