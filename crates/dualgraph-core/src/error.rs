//! Centralized error types for dualgraph.

use thiserror::Error;

/// Failure talking to the event log or the de-dup ledger stored next to it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// The log is temporarily unreachable (connection reset, timeout, failover).
    #[error("Event stream unavailable: {0}")]
    Unavailable(String),

    /// The log answered with something we cannot use (wrong type, missing group).
    #[error("Event stream protocol error: {0}")]
    Protocol(String),
}

impl StreamError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Whether a later attempt may succeed without operator intervention.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Failure applying a mutation to, or querying, the persistent graph store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Graph store temporarily unavailable: {0}")]
    Transient(String),

    #[error("Graph store rejected the operation: {0}")]
    Permanent(String),
}

impl StoreError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Startup configuration problems. Never produced at runtime.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration file: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ConfigError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StreamError::unavailable("reset").is_transient());
        assert!(!StreamError::protocol("NOGROUP").is_transient());
        assert!(StoreError::transient("pool exhausted").is_transient());
        assert!(!StoreError::permanent("syntax").is_transient());
    }

    #[test]
    fn test_invalid_config_message() {
        let err = ConfigError::invalid("batch_size must be > 0");
        assert_eq!(err.to_string(), "Invalid configuration: batch_size must be > 0");
    }
}
