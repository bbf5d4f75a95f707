//! Validation errors for entity invariants.

use chrono::{DateTime, NaiveTime, Utc};
use thiserror::Error;

use crate::appointment::AppointmentStatus;

/// A field that must be present on an appointment candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// The appointment title.
    Title,
    /// The start instant.
    Start,
    /// The end instant.
    End,
}

impl Field {
    /// Returns the field name as used in persisted shapes.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Start => "start",
            Self::End => "end",
        }
    }
}

/// An entity invariant was violated.
///
/// Validation errors are rejected synchronously and never retried; the
/// mutation that produced them is aborted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is absent (or blank, for the title).
    #[error("missing required field: {}", .0.as_str())]
    MissingField(Field),

    /// The end instant is not after the start instant.
    #[error("end ({end}) must be after start ({start})")]
    InvalidRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    /// The appointment starts before the minimum advance notice.
    #[error("appointment must start at or after {earliest} (minimum advance notice)")]
    TooSoon { earliest: DateTime<Utc> },

    /// The requested status change is not allowed by the lifecycle.
    #[error("cannot change status from {from} to {to}")]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    /// Day of week outside `0..=6`.
    #[error("invalid day of week {0}: expected 0 (Sunday) to 6 (Saturday)")]
    InvalidDayOfWeek(u8),

    /// Window end time is not after its start time.
    #[error("window end ({end}) must be after start ({start})")]
    InvalidWindowRange { start: NaiveTime, end: NaiveTime },
}
