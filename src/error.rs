//! Error handling for the coopnet engine
//!
//! Every fallible engine operation returns [`EngineError`]. Variants map
//! one-to-one onto the stable wire codes returned by [`EngineError::code`],
//! so API consumers can localize without parsing messages.

use thiserror::Error;

/// Main error type for engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// An entity id did not resolve in the subsystem it was presented to
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A state machine was asked to perform a transition its current state
    /// does not permit
    #[error("invalid transition for {entity} {id}: {detail}")]
    InvalidTransition {
        entity: &'static str,
        id: String,
        detail: String,
    },

    /// A numeric input fell outside policy bounds in a context where
    /// clamping is not authorized
    #[error("{field} out of range: {value} not in [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    /// A redemption was attempted against an account that cannot cover it
    #[error("insufficient balance: required {required:.4}, available {available:.4}")]
    InsufficientBalance { required: f64, available: f64 },

    /// A cooperative norm or structural constraint was violated
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Ledger corruption. Fatal for the owning subsystem: no further writes
    /// are accepted until the chain has been audited.
    #[error("ledger integrity failure at entry {index}: {detail}")]
    Integrity { index: usize, detail: String },

    /// A deadline elapsed before the operation completed; no mutation was
    /// performed
    #[error("deadline exceeded during {0}")]
    DeadlineExceeded(&'static str),

    /// The operation observed its cancellation flag; no mutation was
    /// performed
    #[error("cancelled during {0}")]
    Cancelled(&'static str),

    /// The operation is well-formed but the active policy forbids it
    #[error("policy rejected: {0}")]
    PolicyRejected(String),

    /// A federation envelope failed signature or format verification
    #[error("federation rejected: {0}")]
    FederationRejected(String),

    /// Generic I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NotFound { .. } => "not_found",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::OutOfRange { .. } => "out_of_range",
            EngineError::InsufficientBalance { .. } => "insufficient_balance",
            EngineError::ConstraintViolation(_) => "constraint_violation",
            EngineError::Integrity { .. } => "integrity_error",
            EngineError::DeadlineExceeded(_) => "deadline_exceeded",
            EngineError::Cancelled(_) => "cancelled",
            EngineError::PolicyRejected(_) => "policy_rejected",
            EngineError::FederationRejected(_) => "federation_rejected",
            EngineError::Io(_) => "io_error",
            EngineError::Json(_) => "serialization_error",
        }
    }

    /// Shorthand for a [`EngineError::NotFound`] with an owned id.
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Shorthand for an [`EngineError::InvalidTransition`].
    pub fn invalid_transition(
        entity: &'static str,
        id: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        EngineError::InvalidTransition {
            entity,
            id: id.into(),
            detail: detail.into(),
        }
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(EngineError::not_found("issue", "x").code(), "not_found");
        assert_eq!(
            EngineError::InsufficientBalance {
                required: 1.0,
                available: 0.0
            }
            .code(),
            "insufficient_balance"
        );
        assert_eq!(EngineError::Cancelled("analysis").code(), "cancelled");
    }

    #[test]
    fn test_error_display() {
        let err = EngineError::invalid_transition("task", "t-1", "done -> in_progress");
        assert!(err.to_string().contains("t-1"));
        assert!(err.to_string().contains("done -> in_progress"));
    }
}
