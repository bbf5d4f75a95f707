//! Scheduling service facade.
//!
//! [`SchedulingService`] is what an API layer talks to. Every mutation is
//! validated and committed to the store first; subscribers are notified
//! afterwards and can never undo it. Provider outcomes show up in
//! [`SchedulingService::sync_report`], not as errors.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use booksync_core::{
    Appointment, AppointmentDraft, AppointmentId, AppointmentPatch, AppointmentStatus,
    AvailabilityWindow, BusyInterval, DayOfWeek, EngineConfig, FreeSlot, OwnerId, SlotQuery,
    SlotSettings, SyncState, SyncStatus, TimeRange, Validator, WindowDraft, WindowId,
    WindowPatch, free_slots,
};
use booksync_providers::{CalendarProvider, ProviderRegistry};
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::dispatcher::{AppointmentEvent, Dispatcher, Subscriber};
use crate::error::{EngineError, EngineResult};
use crate::orchestrator::{AppointmentLocks, SyncOrchestrator};
use crate::store::SchedulingStore;
use crate::sweep::{RetrySweep, SweepConfig, SweepHandle};
use crate::worker::{SyncWorkerHandle, spawn_worker};

/// Status reported for providers an appointment has no row for.
pub const NOT_SYNCED: &str = "not_synced";

/// How provider sync is driven.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncMode {
    /// Events go through the background worker.
    #[default]
    Queued,
    /// Events are synced before the mutation returns.
    Inline,
}

/// Per-provider sync state of one appointment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub appointment_id: AppointmentId,
    pub rows: Vec<SyncStatus>,
}

impl SyncReport {
    /// Returns the status name for `provider_type`, or `not_synced`.
    pub fn status_for(&self, provider_type: &str) -> &'static str {
        self.rows
            .iter()
            .find(|r| r.provider_type.as_str() == provider_type)
            .map_or(NOT_SYNCED, |r| r.status.as_str())
    }

    /// Returns true when every row is synced.
    pub fn fully_synced(&self) -> bool {
        self.rows.iter().all(|r| r.status == SyncState::Synced)
    }

    /// Rows currently failed.
    pub fn failures(&self) -> impl Iterator<Item = &SyncStatus> {
        self.rows.iter().filter(|r| r.status == SyncState::Failed)
    }
}

/// One day of an owner's weekly schedule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DaySchedule {
    pub day_name: &'static str,
    pub windows: Vec<AvailabilityWindow>,
    pub total_hours: f64,
    pub available: bool,
}

/// What [`SchedulingService::remove_owner`] deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerRemoval {
    pub appointments: Vec<Appointment>,
    pub windows: usize,
}

/// Builds a [`SchedulingService`] from configuration.
pub struct ServiceBuilder {
    config: EngineConfig,
    providers: ProviderRegistry,
    subscribers: Vec<Arc<dyn Subscriber>>,
    mode: SyncMode,
    #[cfg(feature = "google")]
    credentials: Option<Arc<dyn booksync_providers::CredentialSource>>,
}

impl ServiceBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            providers: ProviderRegistry::new(),
            subscribers: Vec::new(),
            mode: SyncMode::default(),
            #[cfg(feature = "google")]
            credentials: None,
        }
    }

    /// Registers an extra provider, after any built from configuration.
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn CalendarProvider>) -> Self {
        self.providers.register(provider);
        self
    }

    /// Registers a subscriber notified after the sync subscriber.
    #[must_use]
    pub fn with_subscriber(mut self, subscriber: Arc<dyn Subscriber>) -> Self {
        self.subscribers.push(subscriber);
        self
    }

    #[must_use]
    pub fn sync_mode(mut self, mode: SyncMode) -> Self {
        self.mode = mode;
        self
    }

    /// Token source for the Google provider. Without one the provider is
    /// not built even when configured.
    #[cfg(feature = "google")]
    #[must_use]
    pub fn with_credentials(
        mut self,
        credentials: Arc<dyn booksync_providers::CredentialSource>,
    ) -> Self {
        self.credentials = Some(credentials);
        self
    }

    #[cfg(feature = "google")]
    fn configured_providers(&self) -> EngineResult<ProviderRegistry> {
        use booksync_providers::google::{GoogleCalendarProvider, GoogleConfig};

        let mut registry = ProviderRegistry::new();
        let Some(settings) = self.config.google.as_ref() else {
            return Ok(registry);
        };
        let Some(credentials) = self.credentials.clone() else {
            warn!("Google Calendar configured without credentials, provider disabled");
            return Ok(registry);
        };
        let config = GoogleConfig::from_settings(settings)
            .map_err(|e| EngineError::config(format!("invalid google.base_url: {e}")))?;
        let provider = GoogleCalendarProvider::new(config, credentials)
            .map_err(|e| EngineError::config(e.to_string()))?;
        registry.register(Arc::new(provider));
        Ok(registry)
    }

    #[cfg(not(feature = "google"))]
    fn configured_providers(&self) -> EngineResult<ProviderRegistry> {
        if self.config.google.is_some() {
            warn!("Google Calendar configured but support is not compiled in");
        }
        Ok(ProviderRegistry::new())
    }

    /// Assembles the service. Queued mode spawns the worker, so this must
    /// run inside a Tokio runtime.
    pub fn build(self) -> EngineResult<SchedulingService> {
        let mut providers = self.configured_providers()?;
        for provider in self.providers.iter() {
            providers.register(provider.clone());
        }
        info!(
            providers = ?providers.provider_types(),
            mode = ?self.mode,
            "Building scheduling service"
        );

        let store = Arc::new(SchedulingStore::new());
        let orchestrator = Arc::new(SyncOrchestrator::new(
            store.clone(),
            providers,
            self.config.sync.clone(),
        ));

        let mut dispatcher = Dispatcher::new();
        let worker = match self.mode {
            SyncMode::Queued => {
                let (queue, handle) =
                    spawn_worker(orchestrator.clone(), self.config.sync.queue_capacity);
                dispatcher.register(Arc::new(queue));
                Some(handle)
            }
            SyncMode::Inline => {
                dispatcher.register(orchestrator.clone());
                None
            }
        };
        for subscriber in self.subscribers {
            dispatcher.register(subscriber);
        }

        Ok(SchedulingService {
            validator: Validator::new(self.config.scheduling.minimum_advance()),
            timezone: self.config.scheduling.timezone,
            slots: self.config.slots.clone(),
            sweep: SweepConfig::from(&self.config.sweep),
            store,
            dispatcher,
            orchestrator,
            worker,
            mutations: AppointmentLocks::default(),
        })
    }
}

impl fmt::Debug for ServiceBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceBuilder")
            .field("providers", &self.providers.provider_types())
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

/// Appointments, availability and provider sync behind one API.
#[derive(Debug)]
pub struct SchedulingService {
    store: Arc<SchedulingStore>,
    dispatcher: Dispatcher,
    orchestrator: Arc<SyncOrchestrator>,
    validator: Validator,
    timezone: Tz,
    slots: SlotSettings,
    sweep: SweepConfig,
    worker: Option<SyncWorkerHandle>,
    /// Held from commit through publish so events leave in commit order.
    mutations: AppointmentLocks,
}

impl SchedulingService {
    pub fn builder(config: EngineConfig) -> ServiceBuilder {
        ServiceBuilder::new(config)
    }

    pub fn store(&self) -> &Arc<SchedulingStore> {
        &self.store
    }

    pub fn orchestrator(&self) -> &Arc<SyncOrchestrator> {
        &self.orchestrator
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    async fn publish(&self, event: AppointmentEvent) {
        let failures = self.dispatcher.publish(&event).await;
        if failures > 0 {
            debug!(
                appointment_id = %event.appointment.id,
                failures,
                "Some subscribers failed"
            );
        }
    }

    // --- appointments ---

    /// Validates and stores a new appointment, then notifies subscribers.
    pub async fn create_appointment(&self, draft: AppointmentDraft) -> EngineResult<Appointment> {
        let appointment = self.validator.validate(draft, Utc::now())?;
        self.store.put_appointment(appointment.clone()).await;
        info!(
            appointment_id = %appointment.id,
            owner = %appointment.owner,
            start = %appointment.start,
            "Appointment created"
        );
        self.publish(AppointmentEvent::changed(appointment.clone()))
            .await;
        Ok(appointment)
    }

    /// Applies a patch. Subscribers hear about material changes only.
    pub async fn update_appointment(
        &self,
        id: AppointmentId,
        patch: AppointmentPatch,
    ) -> EngineResult<Appointment> {
        let _guard = self.mutations.lock(id).await;
        let now = Utc::now();
        let update = self
            .store
            .update_appointment_with(id, |current| {
                self.validator.validate_update(current, patch, now)
            })
            .await
            .ok_or(EngineError::AppointmentNotFound(id))??;

        if update.material {
            info!(
                appointment_id = %id,
                status = %update.appointment.status,
                "Appointment updated"
            );
            self.publish(AppointmentEvent::changed(update.appointment.clone()))
                .await;
        } else {
            debug!(appointment_id = %id, "Appointment unchanged, nothing to sync");
        }
        Ok(update.appointment)
    }

    pub async fn confirm(&self, id: AppointmentId) -> EngineResult<Appointment> {
        self.update_appointment(id, AppointmentPatch::status(AppointmentStatus::Confirmed))
            .await
    }

    pub async fn complete(&self, id: AppointmentId) -> EngineResult<Appointment> {
        self.update_appointment(id, AppointmentPatch::status(AppointmentStatus::Completed))
            .await
    }

    /// Cancels the appointment. Remote copies are updated, not removed.
    pub async fn cancel(&self, id: AppointmentId) -> EngineResult<Appointment> {
        self.update_appointment(id, AppointmentPatch::status(AppointmentStatus::Cancelled))
            .await
    }

    /// Hard-deletes the appointment. Remote copies are removed afterwards.
    pub async fn delete_appointment(&self, id: AppointmentId) -> EngineResult<Appointment> {
        let _guard = self.mutations.lock(id).await;
        let appointment = self
            .store
            .remove_appointment(id)
            .await
            .ok_or(EngineError::AppointmentNotFound(id))?;
        info!(appointment_id = %id, "Appointment deleted");
        self.publish(AppointmentEvent::deleted(appointment.clone()))
            .await;
        Ok(appointment)
    }

    pub async fn appointment(&self, id: AppointmentId) -> Option<Appointment> {
        self.store.appointment(id).await
    }

    /// All appointments of the owner on a local day, cancelled included.
    pub async fn appointments_on(&self, owner: OwnerId, date: NaiveDate) -> Vec<Appointment> {
        match TimeRange::for_date(date, &self.timezone) {
            Some(day) => self.store.appointments_in(owner, day, false).await,
            None => Vec::new(),
        }
    }

    /// Sync rows of an appointment, including one that was deleted but
    /// whose remote removal is still failing.
    pub async fn sync_report(&self, id: AppointmentId) -> SyncReport {
        SyncReport {
            appointment_id: id,
            rows: self.store.syncs_for(id).await,
        }
    }

    // --- windows ---

    pub async fn add_window(
        &self,
        owner: OwnerId,
        draft: WindowDraft,
    ) -> EngineResult<AvailabilityWindow> {
        let window = self.store.windows_mut().await.add(owner, draft)?;
        debug!(owner = %owner, window_id = %window.id, "Window added");
        Ok(window)
    }

    pub async fn update_window(
        &self,
        id: WindowId,
        patch: WindowPatch,
    ) -> EngineResult<AvailabilityWindow> {
        self.store
            .windows_mut()
            .await
            .update(id, patch)?
            .ok_or(EngineError::WindowNotFound(id))
    }

    pub async fn remove_window(&self, id: WindowId) -> EngineResult<AvailabilityWindow> {
        self.store
            .windows_mut()
            .await
            .remove(id)
            .ok_or(EngineError::WindowNotFound(id))
    }

    pub async fn windows_for_day(&self, owner: OwnerId, day: DayOfWeek) -> Vec<AvailabilityWindow> {
        self.store.windows().await.windows_for_day(owner, day)
    }

    pub async fn total_available_hours(&self, owner: OwnerId, day: DayOfWeek) -> f64 {
        self.store.windows().await.total_available_hours(owner, day)
    }

    /// Whether `instant` falls inside one of the owner's active windows.
    pub async fn is_available_at(&self, owner: OwnerId, instant: DateTime<Utc>) -> bool {
        self.store
            .windows()
            .await
            .is_within_window(owner, instant, &self.timezone)
    }

    pub async fn day_schedule(&self, owner: OwnerId, day: DayOfWeek) -> DaySchedule {
        let windows = self.windows_for_day(owner, day).await;
        let total_hours = windows.iter().map(AvailabilityWindow::duration_hours).sum();
        DaySchedule {
            day_name: day.name(),
            available: !windows.is_empty(),
            windows,
            total_hours,
        }
    }

    // --- read path ---

    /// Active local appointments plus events from every enabled provider
    /// the owner is connected to. Remote copies of local appointments are
    /// reported once.
    pub async fn busy_intervals(&self, owner: OwnerId, date: NaiveDate) -> Vec<BusyInterval> {
        let Some(day) = TimeRange::for_date(date, &self.timezone) else {
            return Vec::new();
        };

        let appointments = self.store.appointments_in(owner, day, true).await;
        let mut own_copies = HashSet::new();
        for appointment in &appointments {
            for row in self.store.syncs_for(appointment.id).await {
                if let Some(external_id) = row.external_id {
                    own_copies.insert((row.provider_type.as_str().to_string(), external_id));
                }
            }
        }
        let mut busy: Vec<BusyInterval> = appointments.iter().map(BusyInterval::from).collect();

        for provider in self.orchestrator.active_providers(&owner) {
            let tag = provider.provider_type();
            let events = match tokio::time::timeout(
                self.orchestrator.timeout(),
                provider.list_busy_intervals(&owner, day),
            )
            .await
            {
                Ok(events) => events,
                Err(_) => {
                    warn!(provider = tag, owner = %owner, "Busy listing timed out");
                    Vec::new()
                }
            };
            busy.extend(
                events
                    .iter()
                    .filter(|e| !own_copies.contains(&(tag.to_string(), e.external_id.clone())))
                    .map(|e| BusyInterval::from_provider_event(tag, e)),
            );
        }

        busy.sort_by_key(|b| (b.start, b.end));
        busy
    }

    /// Bookable slots of `duration_minutes` (the configured default when
    /// `None`) within business hours on a local day.
    pub async fn free_slots(
        &self,
        owner: OwnerId,
        date: NaiveDate,
        duration_minutes: Option<i64>,
    ) -> Vec<FreeSlot> {
        let busy = self.busy_intervals(owner, date).await;
        let query = SlotQuery::new(
            date,
            duration_minutes.unwrap_or(self.slots.default_duration_minutes),
        )
        .with_step(self.slots.step_minutes)
        .with_business_hours(self.slots.business_start, self.slots.business_end);
        free_slots(&query, &self.timezone, &busy).collect()
    }

    // --- owners ---

    /// Deletes every appointment (publishing deletions) and window of `owner`.
    pub async fn remove_owner(&self, owner: OwnerId) -> OwnerRemoval {
        let appointments = self.store.remove_appointments_of(owner).await;
        for appointment in &appointments {
            // Waits out an update of this appointment that is still publishing.
            let _guard = self.mutations.lock(appointment.id).await;
            self.publish(AppointmentEvent::deleted(appointment.clone()))
                .await;
        }
        let windows = self.store.windows_mut().await.remove_owner(owner);
        info!(
            owner = %owner,
            appointments = appointments.len(),
            windows,
            "Owner removed"
        );
        OwnerRemoval {
            appointments,
            windows,
        }
    }

    // --- background work ---

    /// Waits for queued sync jobs. A no-op in inline mode.
    pub async fn flush(&self) -> EngineResult<()> {
        match &self.worker {
            Some(worker) => worker.flush().await,
            None => Ok(()),
        }
    }

    /// Spawns the retry sweep with the configured schedule.
    pub fn spawn_retry_sweep(&self) -> SweepHandle {
        let sweep = RetrySweep::new(self.sweep.clone());
        let handle = sweep.handle();
        tokio::spawn(sweep.run_with(self.orchestrator.clone()));
        handle
    }

    /// Finishes queued jobs and stops the worker.
    pub async fn shutdown(self) -> EngineResult<()> {
        match self.worker {
            Some(worker) => worker.stop().await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use booksync_core::{SyncSettings, ValidationError};
    use booksync_providers::{MemoryProvider, Operation, ProviderErrorCode};
    use chrono::{Datelike, Duration, NaiveTime, TimeZone};

    fn next_monday() -> NaiveDate {
        let mut day = (Utc::now() + Duration::days(2)).date_naive();
        while day.weekday() != chrono::Weekday::Mon {
            day = day.succ_opt().unwrap();
        }
        day
    }

    fn at(day: NaiveDate, hour: u32) -> DateTime<Utc> {
        Utc.from_utc_datetime(&day.and_hms_opt(hour, 0, 0).unwrap())
    }

    fn hm(hour: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, 0, 0).unwrap()
    }

    fn service(mode: SyncMode, providers: &[Arc<MemoryProvider>]) -> SchedulingService {
        let mut builder = SchedulingService::builder(EngineConfig::default()).sync_mode(mode);
        for provider in providers {
            builder = builder.with_provider(provider.clone());
        }
        builder.build().unwrap()
    }

    fn draft(owner: OwnerId, day: NaiveDate, hour: u32) -> AppointmentDraft {
        AppointmentDraft::new(owner, "Consultation", at(day, hour), at(day, hour + 1))
    }

    #[tokio::test]
    async fn create_syncs_to_every_provider() {
        let alpha = Arc::new(MemoryProvider::new("alpha"));
        let beta = Arc::new(MemoryProvider::new("beta"));
        let svc = service(SyncMode::Queued, &[alpha.clone(), beta.clone()]);
        let owner = OwnerId::new();

        let appt = svc
            .create_appointment(draft(owner, next_monday(), 10))
            .await
            .unwrap();
        svc.flush().await.unwrap();

        let report = svc.sync_report(appt.id).await;
        assert_eq!(report.status_for("alpha"), "synced");
        assert_eq!(report.status_for("beta"), "synced");
        assert_eq!(report.status_for("outlook"), NOT_SYNCED);
        assert!(report.fully_synced());
        assert_eq!(alpha.event_count(), 1);
        svc.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn invalid_booking_changes_nothing() {
        let memory = Arc::new(MemoryProvider::new("memory"));
        let svc = service(SyncMode::Inline, &[memory.clone()]);
        let owner = OwnerId::new();
        let soon = Utc::now() + Duration::minutes(10);

        let err = svc
            .create_appointment(AppointmentDraft::new(
                owner,
                "Too soon",
                soon,
                soon + Duration::hours(1),
            ))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Validation(ValidationError::TooSoon { .. })
        ));
        assert!(svc.appointments_on(owner, soon.date_naive()).await.is_empty());
        assert_eq!(memory.calls(Operation::Create), 0);
    }

    #[tokio::test]
    async fn only_material_updates_reach_providers() {
        let memory = Arc::new(MemoryProvider::new("memory"));
        let svc = service(SyncMode::Inline, &[memory.clone()]);
        let appt = svc
            .create_appointment(draft(OwnerId::new(), next_monday(), 10))
            .await
            .unwrap();

        svc.update_appointment(appt.id, AppointmentPatch::default().with_title("Consultation"))
            .await
            .unwrap();
        assert_eq!(memory.calls(Operation::Update), 0);

        let confirmed = svc.confirm(appt.id).await.unwrap();
        assert_eq!(confirmed.status, AppointmentStatus::Confirmed);
        assert_eq!(memory.calls(Operation::Update), 1);

        // same status again is a no-op, not a transition
        svc.confirm(appt.id).await.unwrap();
        assert_eq!(memory.calls(Operation::Update), 1);

        svc.complete(appt.id).await.unwrap();
        let err = svc.cancel(appt.id).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Validation(ValidationError::InvalidTransition { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_terminal_transitions_have_one_winner() {
        let svc = Arc::new(service(SyncMode::Queued, &[]));
        let owner = OwnerId::new();

        for _ in 0..50 {
            let appt = svc
                .create_appointment(draft(owner, next_monday(), 10))
                .await
                .unwrap();
            svc.confirm(appt.id).await.unwrap();

            let complete = tokio::spawn({
                let svc = svc.clone();
                async move { svc.complete(appt.id).await }
            });
            let cancel = tokio::spawn({
                let svc = svc.clone();
                async move { svc.cancel(appt.id).await }
            });
            let results = [complete.await.unwrap(), cancel.await.unwrap()];

            let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
            assert_eq!(winners.len(), 1);
            assert!(results.iter().any(|r| matches!(
                r,
                Err(EngineError::Validation(ValidationError::InvalidTransition { .. }))
            )));
            let stored = svc.appointment(appt.id).await.unwrap();
            assert_eq!(stored.status, winners[0].status);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn update_racing_delete_never_brings_it_back() {
        let memory = Arc::new(MemoryProvider::new("memory"));
        let svc = Arc::new(service(SyncMode::Queued, &[memory.clone()]));
        let owner = OwnerId::new();

        for _ in 0..50 {
            let appt = svc
                .create_appointment(draft(owner, next_monday(), 10))
                .await
                .unwrap();

            let update = tokio::spawn({
                let svc = svc.clone();
                async move { svc.confirm(appt.id).await }
            });
            let delete = tokio::spawn({
                let svc = svc.clone();
                async move { svc.delete_appointment(appt.id).await }
            });
            let updated = update.await.unwrap();
            delete.await.unwrap().unwrap();
            if let Err(e) = updated {
                assert!(matches!(e, EngineError::AppointmentNotFound(_)));
            }

            svc.flush().await.unwrap();
            assert!(svc.appointment(appt.id).await.is_none());
            assert!(svc.sync_report(appt.id).await.rows.is_empty());
        }
        assert_eq!(memory.event_count(), 0);
    }

    #[tokio::test]
    async fn unknown_appointment_is_reported() {
        let svc = service(SyncMode::Inline, &[]);
        let id = AppointmentId::new();
        assert!(matches!(
            svc.cancel(id).await,
            Err(EngineError::AppointmentNotFound(missing)) if missing == id
        ));
        assert!(matches!(
            svc.delete_appointment(id).await,
            Err(EngineError::AppointmentNotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_failure_stays_visible_until_retried() {
        let memory = Arc::new(MemoryProvider::new("memory"));
        let svc = service(SyncMode::Inline, &[memory.clone()]);
        let appt = svc
            .create_appointment(draft(OwnerId::new(), next_monday(), 10))
            .await
            .unwrap();

        memory.fail_next(Operation::Delete, ProviderErrorCode::Unavailable, "503");
        svc.delete_appointment(appt.id).await.unwrap();

        assert!(svc.appointment(appt.id).await.is_none());
        let report = svc.sync_report(appt.id).await;
        assert_eq!(report.status_for("memory"), "failed");
        assert_eq!(report.failures().count(), 1);

        let retried = svc.orchestrator().retry_pending().await;
        assert_eq!(retried.succeeded, 1);
        assert!(svc.sync_report(appt.id).await.rows.is_empty());
        assert_eq!(memory.event_count(), 0);
    }

    #[tokio::test]
    async fn cancelled_appointments_free_their_slot() {
        let svc = service(SyncMode::Inline, &[]);
        let owner = OwnerId::new();
        let day = next_monday();
        let appt = svc.create_appointment(draft(owner, day, 9)).await.unwrap();
        assert_eq!(svc.busy_intervals(owner, day).await.len(), 1);

        svc.cancel(appt.id).await.unwrap();
        assert!(svc.busy_intervals(owner, day).await.is_empty());
        assert_eq!(svc.appointments_on(owner, day).await.len(), 1);
        assert_eq!(svc.free_slots(owner, day, Some(60)).await[0].start, at(day, 9));
    }

    #[tokio::test]
    async fn free_slots_skip_local_and_remote_busy_time() {
        let memory = Arc::new(MemoryProvider::new("memory"));
        let svc = service(SyncMode::Queued, &[memory.clone()]);
        let owner = OwnerId::new();
        let day = next_monday();

        memory.insert_busy(owner, "Dentist", at(day, 12), at(day, 13));
        svc.create_appointment(draft(owner, day, 10)).await.unwrap();
        svc.flush().await.unwrap();

        // the synced copy of the appointment is not counted twice
        let busy = svc.busy_intervals(owner, day).await;
        assert_eq!(busy.len(), 2);
        assert_eq!(busy[1].label, "Dentist");

        let starts: Vec<_> = svc
            .free_slots(owner, day, Some(60))
            .await
            .iter()
            .map(|s| s.start)
            .collect();
        assert_eq!(&starts[..3], &[at(day, 9), at(day, 11), at(day, 13)]);
        assert_eq!(starts.last(), Some(&at(day, 17)));
        svc.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn disconnected_provider_is_left_out_of_busy_time() {
        let gated = Arc::new(MemoryProvider::restricted("gated"));
        let svc = service(SyncMode::Inline, &[gated.clone()]);
        let owner = OwnerId::new();
        let day = next_monday();
        gated.authorize(owner);
        gated.insert_busy(owner, "Gym", at(day, 15), at(day, 16));
        assert_eq!(svc.busy_intervals(owner, day).await.len(), 1);

        gated.revoke(&owner);
        assert!(svc.busy_intervals(owner, day).await.is_empty());
        assert_eq!(gated.calls(Operation::List), 1);
    }

    #[tokio::test]
    async fn weekly_windows() {
        let svc = service(SyncMode::Inline, &[]);
        let owner = OwnerId::new();
        let monday = DayOfWeek::MONDAY;
        svc.add_window(owner, WindowDraft::new(1, hm(9), hm(12)))
            .await
            .unwrap();
        let afternoon = svc
            .add_window(owner, WindowDraft::new(1, hm(14), hm(18)))
            .await
            .unwrap();

        let schedule = svc.day_schedule(owner, monday).await;
        assert_eq!(schedule.day_name, "Monday");
        assert!(schedule.available);
        assert_eq!(schedule.windows.len(), 2);
        assert!((schedule.total_hours - 7.0).abs() < f64::EPSILON);

        let day = next_monday();
        assert!(svc.is_available_at(owner, at(day, 10)).await);
        assert!(!svc.is_available_at(owner, at(day, 13)).await);

        let patch = WindowPatch {
            is_active: Some(false),
            ..Default::default()
        };
        svc.update_window(afternoon.id, patch).await.unwrap();
        assert!((svc.total_available_hours(owner, monday).await - 3.0).abs() < f64::EPSILON);

        assert!(!svc.day_schedule(owner, DayOfWeek::SUNDAY).await.available);
    }

    #[tokio::test]
    async fn window_errors() {
        let svc = service(SyncMode::Inline, &[]);
        let owner = OwnerId::new();
        assert!(matches!(
            svc.add_window(owner, WindowDraft::new(1, hm(12), hm(9))).await,
            Err(EngineError::Validation(ValidationError::InvalidWindowRange { .. }))
        ));
        assert!(matches!(
            svc.add_window(owner, WindowDraft::new(7, hm(9), hm(12))).await,
            Err(EngineError::Validation(ValidationError::InvalidDayOfWeek(7)))
        ));
        assert!(matches!(
            svc.remove_window(WindowId::new()).await,
            Err(EngineError::WindowNotFound(_))
        ));
    }

    #[tokio::test]
    async fn removing_an_owner_cascades() {
        let memory = Arc::new(MemoryProvider::new("memory"));
        let svc = service(SyncMode::Inline, &[memory.clone()]);
        let owner = OwnerId::new();
        let day = next_monday();
        svc.create_appointment(draft(owner, day, 9)).await.unwrap();
        svc.create_appointment(draft(owner, day, 11)).await.unwrap();
        svc.add_window(owner, WindowDraft::new(1, hm(9), hm(17)))
            .await
            .unwrap();
        let other = svc
            .create_appointment(draft(OwnerId::new(), day, 9))
            .await
            .unwrap();

        let removed = svc.remove_owner(owner).await;
        assert_eq!(removed.appointments.len(), 2);
        assert_eq!(removed.windows, 1);
        assert!(svc.appointments_on(owner, day).await.is_empty());
        assert_eq!(memory.event_count(), 1);
        assert!(svc.appointment(other.id).await.is_some());
    }

    #[tokio::test]
    async fn enabled_providers_filter_applies() {
        let alpha = Arc::new(MemoryProvider::new("alpha"));
        let beta = Arc::new(MemoryProvider::new("beta"));
        let config = EngineConfig {
            sync: SyncSettings {
                enabled_providers: vec!["alpha".into()],
                ..Default::default()
            },
            ..Default::default()
        };
        let svc = SchedulingService::builder(config)
            .sync_mode(SyncMode::Inline)
            .with_provider(alpha.clone())
            .with_provider(beta.clone())
            .build()
            .unwrap();

        let appt = svc
            .create_appointment(draft(OwnerId::new(), next_monday(), 10))
            .await
            .unwrap();
        let report = svc.sync_report(appt.id).await;
        assert_eq!(report.status_for("alpha"), "synced");
        assert_eq!(report.status_for("beta"), NOT_SYNCED);
        assert_eq!(beta.calls(Operation::Create), 0);
    }

    #[cfg(feature = "google")]
    mod google {
        use super::*;
        use booksync_core::GoogleSettings;
        use booksync_providers::StaticCredentials;
        use wiremock::matchers::{header, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        #[tokio::test]
        async fn configured_google_provider_receives_appointments() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/calendars/primary/events"))
                .and(header("authorization", "Bearer tok"))
                .respond_with(
                    ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "g-42"})),
                )
                .expect(1)
                .mount(&server)
                .await;

            let owner = OwnerId::new();
            let config = EngineConfig {
                google: Some(GoogleSettings {
                    base_url: Some(server.uri()),
                    ..Default::default()
                }),
                ..Default::default()
            };
            let svc = SchedulingService::builder(config)
                .with_credentials(Arc::new(StaticCredentials::new().with_token(owner, "tok")))
                .build()
                .unwrap();

            let appt = svc
                .create_appointment(draft(owner, next_monday(), 10))
                .await
                .unwrap();
            svc.flush().await.unwrap();

            let report = svc.sync_report(appt.id).await;
            assert_eq!(report.status_for("google_calendar"), "synced");
            assert_eq!(report.rows[0].external_id.as_deref(), Some("g-42"));
            svc.shutdown().await.unwrap();
        }

        #[tokio::test]
        async fn bad_base_url_is_a_config_error() {
            let config = EngineConfig {
                google: Some(GoogleSettings {
                    base_url: Some("not a url".into()),
                    ..Default::default()
                }),
                ..Default::default()
            };
            let err = SchedulingService::builder(config)
                .with_credentials(Arc::new(StaticCredentials::new()))
                .build()
                .unwrap_err();
            assert!(matches!(err, EngineError::Config { .. }));
        }
    }
}
