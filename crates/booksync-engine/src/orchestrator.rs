//! Sync orchestrator.
//!
//! Turns appointment events into provider calls and records the outcome on
//! one [`SyncStatus`](booksync_core::SyncStatus) row per (appointment,
//! provider). It is the only writer of sync rows.
//!
//! Rules:
//!
//! - providers are visited in registry order; a failure on one is recorded
//!   and the next provider still runs
//! - a provider that is enabled but not available for the owner is skipped,
//!   and an existing row for it is marked failed ("reconnect required")
//! - `update_event` answering `NotFound` falls back to `create_event`
//! - a deleted appointment is remembered only while a retry can still
//!   remove one of its remote copies
//! - every provider call is bounded by a timeout; expiry counts as
//!   `Unavailable`
//! - work for one appointment is serialized through a keyed async lock

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use booksync_core::{Appointment, AppointmentId, OwnerId, ProviderType, SyncSettings, SyncState};
use booksync_providers::{
    BoxFuture, CalendarProvider, ProviderError, ProviderErrorCode, ProviderRegistry,
    ProviderResult,
};
use chrono::Utc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};

use crate::dispatcher::{AppointmentEvent, EventKind, Subscriber};
use crate::error::EngineResult;
use crate::store::SchedulingStore;

/// Message stored on rows of providers the owner must reconnect.
pub const RECONNECT_REQUIRED: &str = "reconnect required";

/// Message stored on rows of providers left out of sync when their
/// appointment is deleted.
pub const PROVIDER_DISABLED: &str = "provider disabled";

/// Per-appointment async locks.
///
/// Entries are dropped once nobody holds or waits for them.
#[derive(Debug, Default)]
pub struct AppointmentLocks {
    locks: Mutex<HashMap<AppointmentId, Arc<AsyncMutex<()>>>>,
}

impl AppointmentLocks {
    /// Waits for exclusive access to `id`.
    pub async fn lock(&self, id: AppointmentId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            locks.entry(id).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Number of appointments currently locked or awaited.
    pub fn active(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|l| Arc::strong_count(l) > 1)
            .count()
    }
}

/// Outcome counts of a retry pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Drives provider sync for appointment events.
pub struct SyncOrchestrator {
    store: Arc<SchedulingStore>,
    providers: ProviderRegistry,
    settings: SyncSettings,
    timeout: Duration,
    locks: AppointmentLocks,
    /// Deleted appointments whose remote copies are not all gone yet.
    tombstones: Mutex<HashMap<AppointmentId, Appointment>>,
}

impl SyncOrchestrator {
    pub fn new(
        store: Arc<SchedulingStore>,
        providers: ProviderRegistry,
        settings: SyncSettings,
    ) -> Self {
        let timeout = settings.provider_timeout();
        Self {
            store,
            providers,
            settings,
            timeout,
            locks: AppointmentLocks::default(),
            tombstones: Mutex::new(HashMap::new()),
        }
    }

    /// Overrides the provider call timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Providers that are enabled and usable for the owner, in registry order.
    pub fn active_providers(&self, owner: &OwnerId) -> Vec<Arc<dyn CalendarProvider>> {
        self.providers
            .iter()
            .filter(|p| self.settings.is_enabled(p.provider_type()))
            .filter(|p| p.available(owner))
            .cloned()
            .collect()
    }

    /// Waits for exclusive access to an appointment's sync state.
    pub async fn lock(&self, id: AppointmentId) -> OwnedMutexGuard<()> {
        self.locks.lock(id).await
    }

    /// Locks the appointment and processes the event.
    pub async fn handle_event(&self, event: &AppointmentEvent) {
        let _guard = self.lock(event.appointment.id).await;
        self.process(event).await;
    }

    /// Processes an event. The caller must hold the appointment's lock.
    pub async fn process(&self, event: &AppointmentEvent) {
        match event.kind {
            EventKind::Changed => self.sync_changed(&event.appointment).await,
            EventKind::Deleted => self.sync_deleted(&event.appointment).await,
        }
    }

    #[instrument(skip_all, fields(appointment_id = %appointment.id))]
    async fn sync_changed(&self, appointment: &Appointment) {
        for provider in self.providers.iter() {
            let tag = ProviderType::new(provider.provider_type());
            if !self.settings.is_enabled(tag.as_str()) {
                continue;
            }
            self.sync_to(provider.as_ref(), &tag, appointment).await;
        }
    }

    /// Creates or updates the remote copy in one provider.
    async fn sync_to(
        &self,
        provider: &dyn CalendarProvider,
        tag: &ProviderType,
        appointment: &Appointment,
    ) -> bool {
        let id = appointment.id;

        if !provider.available(&appointment.owner) {
            debug!(provider = %tag, "Provider not available for owner, skipping");
            if self.store.sync(id, tag).await.is_some() {
                self.store
                    .upsert_sync(id, tag, |row| {
                        row.mark_failed(RECONNECT_REQUIRED, false, Utc::now())
                    })
                    .await;
            }
            return false;
        }

        let row = self.store.upsert_sync(id, tag, |_| {}).await;
        let result = match row.external_id.as_deref() {
            Some(external_id) => {
                match self
                    .call(tag, provider.update_event(appointment, external_id))
                    .await
                {
                    Err(e) if e.code() == ProviderErrorCode::NotFound => {
                        info!(provider = %tag, external_id, "Remote event missing, recreating");
                        self.call(tag, provider.create_event(appointment)).await
                    }
                    other => other,
                }
            }
            None => self.call(tag, provider.create_event(appointment)).await,
        };

        match result {
            Ok(external_id) => {
                info!(provider = %tag, external_id = %external_id, "Appointment synced");
                self.store
                    .upsert_sync(id, tag, |row| row.mark_synced(external_id, Utc::now()))
                    .await;
                true
            }
            Err(e) => {
                warn!(provider = %tag, error = %e, "Appointment sync failed");
                self.record_failure(id, tag, &e).await;
                false
            }
        }
    }

    #[instrument(skip_all, fields(appointment_id = %appointment.id))]
    async fn sync_deleted(&self, appointment: &Appointment) {
        let id = appointment.id;
        for row in self.store.syncs_for(id).await {
            if row.status == SyncState::Deleted {
                continue;
            }
            if !self.settings.is_enabled(row.provider_type.as_str()) {
                debug!(provider = %row.provider_type, "Provider disabled, leaving remote event");
                self.store
                    .upsert_sync(id, &row.provider_type, |row| {
                        row.mark_failed(PROVIDER_DISABLED, false, Utc::now())
                    })
                    .await;
                continue;
            }
            self.delete_from(appointment, &row.provider_type, row.external_id.as_deref())
                .await;
        }
        self.settle_deleted(appointment).await;
    }

    /// Purges finished rows and keeps a tombstone while a retry can still
    /// remove a remote copy. Rows that cannot be retried stay as a record.
    async fn settle_deleted(&self, appointment: &Appointment) {
        let id = appointment.id;
        let purged = self.store.purge_deleted_syncs(id).await;
        let rows = self.store.syncs_for(id).await;
        let retryable = rows
            .iter()
            .filter(|row| row.needs_sync())
            .filter(|row| row.status == SyncState::Pending || row.retryable)
            .count();
        debug!(
            appointment_id = %id,
            purged,
            remaining = rows.len(),
            retryable,
            "Settled deleted appointment"
        );

        let mut tombstones = self
            .tombstones
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if retryable == 0 {
            tombstones.remove(&id);
        } else {
            tombstones.insert(id, appointment.clone());
        }
    }

    /// Deleted appointments still waiting for a remote removal retry.
    pub fn pending_deletes(&self) -> usize {
        self.tombstones
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Removes the remote copy from one provider.
    async fn delete_from(
        &self,
        appointment: &Appointment,
        tag: &ProviderType,
        external_id: Option<&str>,
    ) -> bool {
        let id = appointment.id;
        let Some(external_id) = external_id else {
            self.store
                .upsert_sync(id, tag, |row| row.mark_deleted(Utc::now()))
                .await;
            return true;
        };
        let Some(provider) = self.providers.get(tag.as_str()) else {
            warn!(provider = %tag, "Provider no longer registered, cannot delete remote event");
            self.store
                .upsert_sync(id, tag, |row| {
                    row.mark_failed("provider not registered", false, Utc::now())
                })
                .await;
            return false;
        };

        match self
            .call(tag, provider.delete_event(&appointment.owner, external_id))
            .await
        {
            Ok(()) => {
                info!(provider = %tag, external_id, "Remote event deleted");
                self.store
                    .upsert_sync(id, tag, |row| row.mark_deleted(Utc::now()))
                    .await;
                true
            }
            Err(e) => {
                warn!(provider = %tag, external_id, error = %e, "Remote delete failed");
                self.record_failure(id, tag, &e).await;
                false
            }
        }
    }

    async fn record_failure(&self, id: AppointmentId, tag: &ProviderType, error: &ProviderError) {
        let message = if error.requires_reconnect() {
            format!("{RECONNECT_REQUIRED}: {}", error.message())
        } else {
            error.to_string()
        };
        let retryable = error.is_retryable();
        self.store
            .upsert_sync(id, tag, |row| row.mark_failed(message, retryable, Utc::now()))
            .await;
    }

    /// Runs a provider call under the configured timeout.
    async fn call<T>(
        &self,
        tag: &ProviderType,
        call: BoxFuture<'_, ProviderResult<T>>,
    ) -> ProviderResult<T> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::unavailable(format!(
                "timed out after {}ms",
                self.timeout.as_millis()
            ))
            .with_provider(tag.as_str())),
        }
    }

    fn tombstone(&self, id: AppointmentId) -> Option<Appointment> {
        self.tombstones
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Re-drives pending rows and retryable failures.
    ///
    /// Rows of a live appointment are re-synced. Rows of a deleted one
    /// retry the remote delete and are purged once it succeeds.
    pub async fn retry_pending(&self) -> RetryReport {
        let mut by_appointment: BTreeMap<AppointmentId, Vec<ProviderType>> = BTreeMap::new();
        for row in self.store.retryable_syncs().await {
            by_appointment
                .entry(row.appointment_id)
                .or_default()
                .push(row.provider_type);
        }

        let mut report = RetryReport::default();
        for (id, tags) in by_appointment {
            let _guard = self.lock(id).await;
            let live = self.store.appointment(id).await;
            let deleted = if live.is_none() {
                self.tombstone(id)
            } else {
                None
            };
            if live.is_none() && deleted.is_none() {
                debug!(appointment_id = %id, "No appointment or tombstone for sync rows");
                continue;
            }

            for tag in tags {
                // Re-read under the lock; a queued job may have settled it
                let Some(row) = self.store.sync(id, &tag).await else {
                    continue;
                };
                if !row.needs_sync() || (row.status == SyncState::Failed && !row.retryable) {
                    continue;
                }
                if !self.settings.is_enabled(tag.as_str()) {
                    continue;
                }

                report.attempted += 1;
                let ok = match (&live, &deleted) {
                    (Some(appointment), _) => self.resync(&tag, appointment).await,
                    (None, Some(appointment)) => {
                        self.delete_from(appointment, &tag, row.external_id.as_deref())
                            .await
                    }
                    (None, None) => false,
                };
                if ok {
                    report.succeeded += 1;
                } else {
                    report.failed += 1;
                }
            }

            if let Some(appointment) = deleted {
                self.settle_deleted(&appointment).await;
            }
        }

        if report.attempted > 0 {
            info!(
                attempted = report.attempted,
                succeeded = report.succeeded,
                failed = report.failed,
                "Retry pass finished"
            );
        }
        report
    }

    async fn resync(&self, tag: &ProviderType, appointment: &Appointment) -> bool {
        match self.providers.get(tag.as_str()) {
            Some(provider) => self.sync_to(provider.as_ref(), tag, appointment).await,
            None => {
                self.store
                    .upsert_sync(appointment.id, tag, |row| {
                        row.mark_failed("provider not registered", false, Utc::now())
                    })
                    .await;
                false
            }
        }
    }
}

impl fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("providers", &self.providers.provider_types())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Subscriber for SyncOrchestrator {
    fn name(&self) -> &str {
        "sync-orchestrator"
    }

    fn on_appointment_changed<'a>(
        &'a self,
        appointment: &'a Appointment,
    ) -> BoxFuture<'a, EngineResult<()>> {
        Box::pin(async move {
            self.handle_event(&AppointmentEvent::changed(appointment.clone()))
                .await;
            Ok(())
        })
    }

    fn on_appointment_deleted<'a>(
        &'a self,
        appointment: &'a Appointment,
    ) -> BoxFuture<'a, EngineResult<()>> {
        Box::pin(async move {
            self.handle_event(&AppointmentEvent::deleted(appointment.clone()))
                .await;
            Ok(())
        })
    }
}
