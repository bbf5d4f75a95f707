//! Per-(appointment, provider) synchronization records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::AppointmentId;

/// Tag identifying a provider type, e.g. `google_calendar`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderType(String);

impl ProviderType {
    /// Tag of the Google Calendar provider.
    pub const GOOGLE_CALENDAR: &'static str = "google_calendar";

    /// Creates a provider type tag.
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Returns the tag.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a human-readable provider name.
    pub fn display_name(&self) -> String {
        match self.0.as_str() {
            "google_calendar" => "Google Calendar".to_string(),
            "outlook" => "Microsoft Outlook".to_string(),
            "apple_calendar" => "Apple Calendar".to_string(),
            other => humanize(other),
        }
    }
}

fn humanize(tag: &str) -> String {
    let spaced = tag.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderType {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

impl From<String> for ProviderType {
    fn from(tag: String) -> Self {
        Self(tag)
    }
}

/// Outcome of mirroring one appointment into one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    #[default]
    Pending,
    Synced,
    Failed,
    Deleted,
}

impl SyncState {
    /// Returns the state name as stored.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Synced => "synced",
            Self::Failed => "failed",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sync record for one (appointment, provider) pair.
///
/// Rows are created lazily on the first sync attempt and only the sync
/// orchestrator moves them between states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub appointment_id: AppointmentId,
    pub provider_type: ProviderType,
    pub external_id: Option<String>,
    pub status: SyncState,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    /// Whether the last failure may be retried by the sweep.
    #[serde(default)]
    pub retryable: bool,
}

impl SyncStatus {
    /// Creates a pending row.
    pub fn pending(appointment_id: AppointmentId, provider_type: ProviderType) -> Self {
        Self {
            appointment_id,
            provider_type,
            external_id: None,
            status: SyncState::Pending,
            last_synced_at: None,
            error_message: None,
            retryable: false,
        }
    }

    /// Records a successful create/update.
    pub fn mark_synced(&mut self, external_id: impl Into<String>, at: DateTime<Utc>) {
        self.external_id = Some(external_id.into());
        self.status = SyncState::Synced;
        self.error_message = None;
        self.retryable = false;
        self.last_synced_at = Some(at);
    }

    /// Records a failure. The stored external id is kept.
    pub fn mark_failed(&mut self, message: impl Into<String>, retryable: bool, at: DateTime<Utc>) {
        self.status = SyncState::Failed;
        self.error_message = Some(message.into());
        self.retryable = retryable;
        self.last_synced_at = Some(at);
    }

    /// Records that the remote copy is gone.
    pub fn mark_deleted(&mut self, at: DateTime<Utc>) {
        self.status = SyncState::Deleted;
        self.error_message = None;
        self.retryable = false;
        self.last_synced_at = Some(at);
    }

    /// Returns `true` for rows the retry sweep should look at.
    pub fn needs_sync(&self) -> bool {
        matches!(self.status, SyncState::Pending | SyncState::Failed)
    }

    /// Returns the error to show for a failed row.
    pub fn last_error(&self) -> Option<&str> {
        if self.status != SyncState::Failed {
            return None;
        }
        Some(
            self.error_message
                .as_deref()
                .filter(|m| !m.is_empty())
                .unwrap_or("unknown error"),
        )
    }
}
