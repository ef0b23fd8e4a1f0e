//! Actor Runtime Error Types
//!
//! Errors reported synchronously to callers: wrap-time protocol violations,
//! marshal-time callback violations, deferred construction outcomes and
//! runtime setup failures. Faults raised inside actor methods never surface
//! here; they travel through the installed [`FaultPolicy`](crate::FaultPolicy).

use crate::actor::ActorId;
use thiserror::Error;

/// Main actor runtime error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActorError {
    /// Interface shape violations detected when wrapping
    #[error("Protocol error: {interface}: {message}")]
    Protocol { interface: String, message: String },

    /// A callback that cannot be rehomed onto its owner's queue
    #[error("Callback shape error: {message}")]
    CallbackShape { message: String },

    /// A callback whose captured environment reaches more than one actor
    #[error("Ambiguous callback owner: {} candidate actors", owners.len())]
    AmbiguousOwner { owners: Vec<ActorId> },

    /// Wrong arity or argument type handed to an adapter method
    #[error("Argument mismatch in {method}: {message}")]
    ArgumentMismatch { method: String, message: String },

    /// Failure reported by an actor method body
    #[error("Invocation of {method} failed: {message}")]
    Invocation { method: String, message: String },

    /// The actor's factory failed; the handle will never become ready
    #[error("Construction of {actor} failed: {reason}")]
    ConstructionFailed { actor: ActorId, reason: String },

    /// The actor did not become ready within the wait budget
    #[error("Construction of {actor} not finished after {timeout_ms}ms")]
    ConstructionTimeout { actor: ActorId, timeout_ms: u64 },

    /// Blocking wait exceeded its budget
    #[error("Timeout error: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// The completion side of a future was dropped without a value
    #[error("Completion abandoned: {operation}")]
    Abandoned { operation: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// Worker pool or runtime setup errors
    #[error("Runtime error: {message}")]
    Runtime { message: String },
}

/// Result type alias for actor runtime operations
pub type Result<T> = std::result::Result<T, ActorError>;

impl ActorError {
    /// Create a protocol error
    pub fn protocol(interface: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Protocol {
            interface: interface.into(),
            message: message.into(),
        }
    }

    /// Create a callback shape error
    pub fn callback_shape(message: impl Into<String>) -> Self {
        Self::CallbackShape {
            message: message.into(),
        }
    }

    /// Create an ambiguous owner error
    pub fn ambiguous_owner(owners: Vec<ActorId>) -> Self {
        Self::AmbiguousOwner { owners }
    }

    /// Create an argument mismatch error
    pub fn argument_mismatch(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ArgumentMismatch {
            method: method.into(),
            message: message.into(),
        }
    }

    /// Create an invocation error
    pub fn invocation(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invocation {
            method: method.into(),
            message: message.into(),
        }
    }

    /// Create a construction failure
    pub fn construction_failed(actor: ActorId, reason: impl Into<String>) -> Self {
        Self::ConstructionFailed {
            actor,
            reason: reason.into(),
        }
    }

    /// Create a construction timeout
    pub fn construction_timeout(actor: ActorId, timeout: std::time::Duration) -> Self {
        Self::ConstructionTimeout {
            actor,
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Create an abandoned completion error
    pub fn abandoned(operation: impl Into<String>) -> Self {
        Self::Abandoned {
            operation: operation.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::Configuration {
            message: message.into(),
            field: field.map(|s| s.to_string()),
        }
    }

    /// Create a runtime setup error
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime {
            message: message.into(),
        }
    }

    /// Check if retrying the same operation can succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ActorError::ConstructionTimeout { .. } => true,
            ActorError::Timeout { .. } => true,
            ActorError::Runtime { .. } => true,
            ActorError::Protocol { .. } => false,
            ActorError::CallbackShape { .. } => false,
            ActorError::AmbiguousOwner { .. } => false,
            ActorError::ArgumentMismatch { .. } => false,
            ActorError::Invocation { .. } => false,
            ActorError::ConstructionFailed { .. } => false,
            ActorError::Abandoned { .. } => false,
            ActorError::Configuration { .. } => false,
        }
    }

    /// Get error category for metrics
    pub fn category(&self) -> &'static str {
        match self {
            ActorError::Protocol { .. } => "protocol",
            ActorError::CallbackShape { .. } => "callback_shape",
            ActorError::AmbiguousOwner { .. } => "ambiguous_owner",
            ActorError::ArgumentMismatch { .. } => "argument_mismatch",
            ActorError::Invocation { .. } => "invocation",
            ActorError::ConstructionFailed { .. } => "construction_failed",
            ActorError::ConstructionTimeout { .. } => "construction_timeout",
            ActorError::Timeout { .. } => "timeout",
            ActorError::Abandoned { .. } => "abandoned",
            ActorError::Configuration { .. } => "configuration",
            ActorError::Runtime { .. } => "runtime",
        }
    }
}
