//! Error types for the scheduling engine.
//!
//! Scheduling outcomes (blocking conflicts, unresolved sessions, partial
//! batch failures) are returned as data in the operation results. `Error`
//! covers input that cannot be processed at all, missing records, illegal
//! state transitions and collaborator failures.

use thiserror::Error;

use crate::ports::PortError;
use crate::validation::ValidationError;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or missing request fields; nothing was computed.
    #[error("validation failed: {}", join_messages(.0))]
    Validation(Vec<ValidationError>),

    /// Optimization constraints out of range.
    #[error("invalid optimization constraints: {0}")]
    InvalidConstraints(String),

    /// Engine configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A referenced record does not exist.
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    /// A bulk operation or freeze is not in a state that permits the request.
    #[error("{entity} '{id}' cannot be {action} while {status}")]
    InvalidState {
        entity: &'static str,
        id: String,
        action: &'static str,
        status: String,
    },

    /// Freeze period overlaps an existing freeze of the same subscription.
    #[error("freeze overlaps existing freeze '{existing}' of subscription '{subscription_id}'")]
    FreezeOverlap {
        subscription_id: String,
        existing: String,
    },

    /// External collaborator failure.
    #[error(transparent)]
    Port(#[from] PortError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Single validation error.
    pub fn validation(error: ValidationError) -> Self {
        Self::Validation(vec![error])
    }

    /// Record lookup failure.
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
}

fn join_messages(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::ValidationErrorKind;

    #[test]
    fn test_validation_display_joins_messages() {
        let err = Error::Validation(vec![
            ValidationError::new(ValidationErrorKind::MissingField, "session id is empty"),
            ValidationError::new(ValidationErrorKind::InvalidInterval, "start >= end"),
        ]);
        assert_eq!(
            err.to_string(),
            "validation failed: session id is empty; start >= end"
        );
    }

    #[test]
    fn test_not_found_display() {
        let err = Error::not_found("bulk operation", "op-1");
        assert_eq!(err.to_string(), "bulk operation 'op-1' not found");
    }
}
