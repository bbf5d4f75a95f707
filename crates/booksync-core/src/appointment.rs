//! Appointment entity, lifecycle and validation.
//!
//! An [`Appointment`] is a concrete booked time range belonging to an owner.
//! Appointments are only ever built through a [`Validator`], which enforces
//! the entity invariants:
//!
//! - title, start and end are present
//! - `end > start`
//! - on creation, `start >= now + minimum_advance`
//! - status changes follow the lifecycle
//!   `pending → confirmed → completed`, `pending | confirmed → cancelled`
//!
//! The validator does not check for conflicts with other appointments.
//! Double booking is allowed at this layer; callers consult the free-slot
//! calculator when they want to avoid it.

use std::fmt;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Field, ValidationError};
use crate::ids::{AppointmentId, OwnerId};
use crate::time::TimeRange;

/// Default minimum advance notice for new appointments, in minutes.
pub const DEFAULT_MINIMUM_ADVANCE_MINUTES: i64 = 60;

/// Lifecycle status of an appointment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    /// Booked, awaiting confirmation.
    #[default]
    Pending,
    /// Confirmed by the owner.
    Confirmed,
    /// Cancelled (terminal).
    Cancelled,
    /// Took place (terminal).
    Completed,
}

impl AppointmentStatus {
    /// Returns the status name as stored.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        }
    }

    /// Returns `true` for statuses with no outgoing transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed)
    }

    /// Returns `true` if moving from `self` to `next` is a legal transition.
    ///
    /// Staying in the same status is not a transition and returns `false`.
    pub fn can_transition_to(&self, next: AppointmentStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Confirmed)
                | (Self::Confirmed, Self::Completed)
                | (Self::Pending, Self::Cancelled)
                | (Self::Confirmed, Self::Cancelled)
        )
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A booked appointment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: AppointmentId,
    pub owner: OwnerId,
    pub title: String,
    pub description: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub location: Option<String>,
    /// External client reference, e.g. the messaging handle that booked it.
    pub client_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    /// Returns the booked time range.
    pub fn range(&self) -> TimeRange {
        TimeRange::new(self.start, self.end)
    }

    /// Returns the duration in whole minutes, or 0 for an inverted range.
    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes().max(0)
    }

    /// Returns `true` unless the appointment was cancelled.
    pub fn is_active(&self) -> bool {
        self.status != AppointmentStatus::Cancelled
    }

    /// Checks whether this appointment overlaps another one in time.
    pub fn overlaps_with(&self, other: &Appointment) -> bool {
        self.range().overlaps(&other.range())
    }

    /// Formats the booked range for messages, e.g. `10/03/2025 10:00-11:00`.
    pub fn formatted_range<Tz: TimeZone>(&self, tz: &Tz) -> String
    where
        Tz::Offset: fmt::Display,
    {
        let start = self.start.with_timezone(tz);
        let end = self.end.with_timezone(tz);
        format!(
            "{} {}-{}",
            start.format("%d/%m/%Y"),
            start.format("%H:%M"),
            end.format("%H:%M")
        )
    }
}

/// A booking request: the candidate for a new appointment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentDraft {
    pub owner: OwnerId,
    pub title: Option<String>,
    pub description: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// Initial status; `pending` when absent.
    pub status: Option<AppointmentStatus>,
    pub location: Option<String>,
    pub client_ref: Option<String>,
}

impl AppointmentDraft {
    /// Creates a draft for `owner` with the given title and time range.
    pub fn new(
        owner: OwnerId,
        title: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        Self {
            owner,
            title: Some(title.into()),
            start: Some(start),
            end: Some(end),
            ..Default::default()
        }
    }

    /// Builder: set description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Builder: set location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Builder: set the external client reference.
    pub fn with_client_ref(mut self, client_ref: impl Into<String>) -> Self {
        self.client_ref = Some(client_ref.into());
        self
    }

    /// Builder: set the initial status.
    pub fn with_status(mut self, status: AppointmentStatus) -> Self {
        self.status = Some(status);
        self
    }
}

/// A partial update. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub status: Option<AppointmentStatus>,
}

impl AppointmentPatch {
    /// A patch that only changes the status.
    pub fn status(status: AppointmentStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// A patch that moves the appointment to a new time range.
    pub fn reschedule(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
            ..Default::default()
        }
    }

    /// Builder: set title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Builder: set description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Builder: set location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

/// The outcome of a validated update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppointmentUpdate {
    /// The appointment with the patch applied.
    pub appointment: Appointment,
    /// Whether any of status, title, description, start, end or location
    /// changed. Only material changes are published to subscribers.
    pub material: bool,
}

/// Enforces appointment invariants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validator {
    minimum_advance: Duration,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(Duration::minutes(DEFAULT_MINIMUM_ADVANCE_MINUTES))
    }
}

impl Validator {
    /// Creates a validator with the given minimum advance notice.
    pub fn new(minimum_advance: Duration) -> Self {
        Self { minimum_advance }
    }

    /// Returns the configured minimum advance notice.
    pub fn minimum_advance(&self) -> Duration {
        self.minimum_advance
    }

    /// Validates a booking request and builds the appointment.
    ///
    /// # Errors
    ///
    /// `MissingField` when title, start or end is absent, `InvalidRange` when
    /// `end <= start`, `TooSoon` when `start < now + minimum_advance`, and
    /// `InvalidTransition` when the requested initial status is terminal.
    pub fn validate(
        &self,
        draft: AppointmentDraft,
        now: DateTime<Utc>,
    ) -> Result<Appointment, ValidationError> {
        let title = draft
            .title
            .filter(|t| !t.trim().is_empty())
            .ok_or(ValidationError::MissingField(Field::Title))?;
        let start = draft.start.ok_or(ValidationError::MissingField(Field::Start))?;
        let end = draft.end.ok_or(ValidationError::MissingField(Field::End))?;
        check_range(start, end)?;

        let earliest = now + self.minimum_advance;
        if start < earliest {
            return Err(ValidationError::TooSoon { earliest });
        }

        let status = draft.status.unwrap_or_default();
        if status.is_terminal() {
            return Err(ValidationError::InvalidTransition {
                from: AppointmentStatus::Pending,
                to: status,
            });
        }

        Ok(Appointment {
            id: AppointmentId::new(),
            owner: draft.owner,
            title,
            description: draft.description,
            start,
            end,
            status,
            location: draft.location,
            client_ref: draft.client_ref,
            created_at: now,
            updated_at: now,
        })
    }

    /// Applies a patch to an existing appointment.
    ///
    /// The minimum advance notice is not checked on update.
    ///
    /// # Errors
    ///
    /// `MissingField` for a blank title, `InvalidRange` when the resulting
    /// range is empty, `InvalidTransition` for an illegal status change.
    pub fn validate_update(
        &self,
        current: &Appointment,
        patch: AppointmentPatch,
        now: DateTime<Utc>,
    ) -> Result<AppointmentUpdate, ValidationError> {
        let mut next = current.clone();

        if let Some(title) = patch.title {
            if title.trim().is_empty() {
                return Err(ValidationError::MissingField(Field::Title));
            }
            next.title = title;
        }
        if let Some(description) = patch.description {
            next.description = Some(description);
        }
        if let Some(location) = patch.location {
            next.location = Some(location);
        }
        if let Some(start) = patch.start {
            next.start = start;
        }
        if let Some(end) = patch.end {
            next.end = end;
        }
        check_range(next.start, next.end)?;

        if let Some(status) = patch.status
            && status != current.status
        {
            if !current.status.can_transition_to(status) {
                return Err(ValidationError::InvalidTransition {
                    from: current.status,
                    to: status,
                });
            }
            next.status = status;
        }

        let material = is_material_change(current, &next);
        if material {
            next.updated_at = now;
        }

        Ok(AppointmentUpdate {
            appointment: next,
            material,
        })
    }
}

fn check_range(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<(), ValidationError> {
    if end <= start {
        return Err(ValidationError::InvalidRange { start, end });
    }
    Ok(())
}

/// Returns `true` if the two versions differ in a field subscribers care about.
pub fn is_material_change(before: &Appointment, after: &Appointment) -> bool {
    before.status != after.status
        || before.title != after.title
        || before.description != after.description
        || before.start != after.start
        || before.end != after.end
        || before.location != after.location
}
