//! Error types for the low-rank engine
//!
//! Numeric degeneracy (a vector whose norm collapses during power iteration)
//! is deliberately absent from this taxonomy: the decomposer degrades to a
//! zero vector and keeps going instead of failing the whole channel.

use std::fmt;

use crate::config::ConfigError;

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Error type shared by the decomposer, worker channels and the coordinator
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Empty or non-rectangular matrix input. Never retried.
    Shape { context: String, details: String },

    /// A channel answered with a reply kind the caller did not ask for
    Protocol { expected: String, got: String },

    /// A worker reported a failure while serving a request
    Worker { channel: String, message: String },

    /// The other side of a channel has gone away
    Disconnected { endpoint: String },

    /// Decomposition abandoned because its worker is shutting down
    Cancelled { context: String },

    /// Operation reached a session that was already disposed
    Disposed { operation: String },

    /// Configuration could not be loaded or validated
    Config(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Shape { context, details } => {
                write!(f, "Invalid matrix shape in {}: {}", context, details)
            }
            EngineError::Protocol { expected, got } => {
                write!(
                    f,
                    "Protocol violation: expected {} reply, got {}",
                    expected, got
                )
            }
            EngineError::Worker { channel, message } => {
                write!(f, "Worker '{}' failed: {}", channel, message)
            }
            EngineError::Disconnected { endpoint } => {
                write!(f, "Channel to {} is disconnected", endpoint)
            }
            EngineError::Cancelled { context } => {
                write!(f, "Computation cancelled: {}", context)
            }
            EngineError::Disposed { operation } => {
                write!(f, "Operation '{}' reached a disposed session", operation)
            }
            EngineError::Config(details) => write!(f, "Configuration error: {}", details),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<ConfigError> for EngineError {
    fn from(err: ConfigError) -> Self {
        EngineError::Config(err.to_string())
    }
}

impl EngineError {
    /// Create a shape error
    pub fn shape(context: impl Into<String>, details: impl Into<String>) -> Self {
        EngineError::Shape {
            context: context.into(),
            details: details.into(),
        }
    }

    /// Create a protocol violation error
    pub fn protocol(expected: impl Into<String>, got: impl Into<String>) -> Self {
        EngineError::Protocol {
            expected: expected.into(),
            got: got.into(),
        }
    }

    /// Create a worker failure error
    pub fn worker(channel: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Worker {
            channel: channel.into(),
            message: message.into(),
        }
    }

    /// Create a disconnected error
    pub fn disconnected(endpoint: impl Into<String>) -> Self {
        EngineError::Disconnected {
            endpoint: endpoint.into(),
        }
    }

    /// Create a cancellation error
    pub fn cancelled(context: impl Into<String>) -> Self {
        EngineError::Cancelled {
            context: context.into(),
        }
    }

    /// Whether the error is fatal for its input and must not be retried
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Shape { .. } | EngineError::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_display() {
        let err = EngineError::shape("decompose", "matrix has 0 rows");
        let msg = err.to_string();
        assert!(msg.contains("decompose"));
        assert!(msg.contains("0 rows"));
    }

    #[test]
    fn test_protocol_display() {
        let err = EngineError::protocol("SingularValues", "DisplayFrame");
        let msg = err.to_string();
        assert!(msg.contains("SingularValues"));
        assert!(msg.contains("DisplayFrame"));
    }

    #[test]
    fn test_config_error_conversion() {
        let err: EngineError = ConfigError::Parse("engine.block_size must be ≥ 1".into()).into();
        assert!(matches!(err, EngineError::Config(_)));
        assert!(err.to_string().contains("block_size"));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(EngineError::shape("x", "y").is_fatal());
        assert!(!EngineError::worker("exact/red", "boom").is_fatal());
        assert!(!EngineError::disconnected("coordinator").is_fatal());
    }

    #[test]
    fn test_error_equality() {
        let a = EngineError::worker("approximate/green", "nan");
        let b = EngineError::worker("approximate/green", "nan");
        let c = EngineError::worker("exact/green", "nan");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<EngineError>();
    }
}
