//! Engine error types.

use booksync_core::{AppointmentId, ValidationError, WindowId};
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by the scheduling service and its collaborators.
///
/// Provider failures are not represented here: they are recorded on sync
/// status rows and never abort a mutation.
#[derive(Debug, Error)]
pub enum EngineError {
    /// An entity invariant was violated.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("appointment not found: {0}")]
    AppointmentNotFound(AppointmentId),

    #[error("availability window not found: {0}")]
    WindowNotFound(WindowId),

    /// The background sync worker is no longer running.
    #[error("sync worker stopped")]
    WorkerStopped,

    #[error("configuration error: {message}")]
    Config { message: String },

    /// A subscriber failed to handle an event.
    #[error("subscriber {name} failed: {message}")]
    Subscriber { name: String, message: String },
}

impl EngineError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a subscriber error.
    pub fn subscriber(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Subscriber {
            name: name.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use booksync_core::Field;

    #[test]
    fn validation_converts() {
        let err: EngineError = ValidationError::MissingField(Field::Title).into();
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(
            err.to_string(),
            "validation failed: missing required field: title"
        );
    }

    #[test]
    fn config_message() {
        let err = EngineError::config("bad base url");
        assert_eq!(err.to_string(), "configuration error: bad base url");
    }
}
