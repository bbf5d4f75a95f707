//! In-memory relational store.
//!
//! Three tables, each behind its own `tokio::sync::RwLock`:
//!
//! - appointments keyed by id
//! - availability windows (a [`WindowRegistry`])
//! - sync status rows keyed by `(appointment, provider type)`
//!
//! Sync rows are not removed with their appointment. The orchestrator
//! purges them once the deletion has reached every provider.

use std::collections::{BTreeMap, HashMap};

use booksync_core::{
    Appointment, AppointmentId, AppointmentUpdate, OwnerId, ProviderType, SyncState, SyncStatus, TimeRange,
    WindowRegistry,
};
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::trace;

type SyncKey = (AppointmentId, ProviderType);

/// Shared store for appointments, windows and sync rows.
#[derive(Debug, Default)]
pub struct SchedulingStore {
    appointments: RwLock<HashMap<AppointmentId, Appointment>>,
    windows: RwLock<WindowRegistry>,
    syncs: RwLock<BTreeMap<SyncKey, SyncStatus>>,
}

impl SchedulingStore {
    pub fn new() -> Self {
        Self::default()
    }

    // --- appointments ---

    /// Inserts or replaces an appointment.
    pub async fn put_appointment(&self, appointment: Appointment) -> Option<Appointment> {
        trace!(appointment_id = %appointment.id, "storing appointment");
        self.appointments
            .write()
            .await
            .insert(appointment.id, appointment)
    }

    pub async fn appointment(&self, id: AppointmentId) -> Option<Appointment> {
        self.appointments.read().await.get(&id).cloned()
    }

    /// Reads, checks and replaces an appointment under one write guard.
    ///
    /// `f` sees the stored row; its update is written back only on `Ok`.
    /// Returns `None` when the id is unknown.
    pub async fn update_appointment_with<E, F>(
        &self,
        id: AppointmentId,
        f: F,
    ) -> Option<Result<AppointmentUpdate, E>>
    where
        F: FnOnce(&Appointment) -> Result<AppointmentUpdate, E>,
    {
        let mut table = self.appointments.write().await;
        let current = table.get_mut(&id)?;
        let result = f(current);
        if let Ok(update) = &result {
            trace!(appointment_id = %id, "replacing appointment");
            *current = update.appointment.clone();
        }
        Some(result)
    }

    pub async fn contains_appointment(&self, id: AppointmentId) -> bool {
        self.appointments.read().await.contains_key(&id)
    }

    pub async fn remove_appointment(&self, id: AppointmentId) -> Option<Appointment> {
        self.appointments.write().await.remove(&id)
    }

    /// Returns the owner's appointments overlapping `range`, ordered by start.
    pub async fn appointments_in(
        &self,
        owner: OwnerId,
        range: TimeRange,
        active_only: bool,
    ) -> Vec<Appointment> {
        let mut found: Vec<Appointment> = self
            .appointments
            .read()
            .await
            .values()
            .filter(|a| a.owner == owner)
            .filter(|a| !active_only || a.is_active())
            .filter(|a| a.range().overlaps(&range))
            .cloned()
            .collect();
        found.sort_by_key(|a| (a.start, a.id));
        found
    }

    /// Removes and returns every appointment of `owner`.
    pub async fn remove_appointments_of(&self, owner: OwnerId) -> Vec<Appointment> {
        let mut table = self.appointments.write().await;
        let ids: Vec<AppointmentId> = table
            .values()
            .filter(|a| a.owner == owner)
            .map(|a| a.id)
            .collect();
        ids.iter().filter_map(|id| table.remove(id)).collect()
    }

    // --- availability windows ---

    pub async fn windows(&self) -> RwLockReadGuard<'_, WindowRegistry> {
        self.windows.read().await
    }

    pub async fn windows_mut(&self) -> RwLockWriteGuard<'_, WindowRegistry> {
        self.windows.write().await
    }

    // --- sync status ---

    pub async fn sync(&self, id: AppointmentId, provider: &ProviderType) -> Option<SyncStatus> {
        self.syncs
            .read()
            .await
            .get(&(id, provider.clone()))
            .cloned()
    }

    /// Returns every row of an appointment.
    pub async fn syncs_for(&self, id: AppointmentId) -> Vec<SyncStatus> {
        self.syncs
            .read()
            .await
            .range((id, ProviderType::new(""))..)
            .take_while(|((appt, _), _)| *appt == id)
            .map(|(_, row)| row.clone())
            .collect()
    }

    /// Creates the row if missing, applies `f` and returns the result.
    ///
    /// The read-modify-write happens under one write lock.
    pub async fn upsert_sync<F>(&self, id: AppointmentId, provider: &ProviderType, f: F) -> SyncStatus
    where
        F: FnOnce(&mut SyncStatus),
    {
        let mut table = self.syncs.write().await;
        let row = table
            .entry((id, provider.clone()))
            .or_insert_with(|| SyncStatus::pending(id, provider.clone()));
        f(row);
        row.clone()
    }

    /// Returns rows that are pending or failed with a retryable error.
    pub async fn retryable_syncs(&self) -> Vec<SyncStatus> {
        self.syncs
            .read()
            .await
            .values()
            .filter(|row| row.needs_sync())
            .filter(|row| row.status == SyncState::Pending || row.retryable)
            .cloned()
            .collect()
    }

    /// Drops the `deleted` rows of an appointment. Returns how many went.
    pub async fn purge_deleted_syncs(&self, id: AppointmentId) -> usize {
        let mut table = self.syncs.write().await;
        let before = table.len();
        table.retain(|(appt, _), row| *appt != id || row.status != SyncState::Deleted);
        before - table.len()
    }

    /// Drops every row of an appointment.
    pub async fn remove_syncs_for(&self, id: AppointmentId) -> usize {
        let mut table = self.syncs.write().await;
        let before = table.len();
        table.retain(|(appt, _), _| *appt != id);
        before - table.len()
    }
}
