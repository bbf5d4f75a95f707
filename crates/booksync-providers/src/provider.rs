//! The [`CalendarProvider`] trait.
//!
//! A provider mirrors appointments into one external calendar system. It
//! holds no per-appointment state: the sync orchestrator owns the mapping
//! from appointment to external event id and hands it back on update and
//! delete.

use std::future::Future;
use std::pin::Pin;

use booksync_core::{Appointment, BusyEvent, OwnerId, TimeRange};

use crate::error::ProviderResult;

/// A boxed future for object-safe async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// An external calendar backend.
///
/// # Implementation Notes
///
/// - `delete_event` treats an already-missing remote event as success
/// - `update_event` returns `NotFound` when the remote event is gone so the
///   caller can recreate it
/// - `list_busy_intervals` never fails; it returns an empty list when the
///   owner is not connected or the backend errors
pub trait CalendarProvider: Send + Sync {
    /// Returns the provider type tag (e.g. `google_calendar`).
    fn provider_type(&self) -> &str;

    /// Returns true if the owner has usable credentials for this provider.
    fn available(&self, owner: &OwnerId) -> bool;

    /// Creates a remote event and returns its id.
    fn create_event<'a>(&'a self, appointment: &'a Appointment)
    -> BoxFuture<'a, ProviderResult<String>>;

    /// Updates a remote event and returns its (possibly new) id.
    fn update_event<'a>(
        &'a self,
        appointment: &'a Appointment,
        external_id: &'a str,
    ) -> BoxFuture<'a, ProviderResult<String>>;

    /// Deletes a remote event.
    fn delete_event<'a>(
        &'a self,
        owner: &'a OwnerId,
        external_id: &'a str,
    ) -> BoxFuture<'a, ProviderResult<()>>;

    /// Lists the owner's busy events overlapping `range`.
    fn list_busy_intervals<'a>(
        &'a self,
        owner: &'a OwnerId,
        range: TimeRange,
    ) -> BoxFuture<'a, Vec<BusyEvent>>;
}
