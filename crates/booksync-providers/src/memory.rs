//! In-process calendar provider.
//!
//! [`MemoryProvider`] keeps events in a map and behaves like a remote
//! calendar: it issues its own event ids, can lose events out of band and
//! can be told to fail specific operations. It backs local development and
//! the engine's tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use booksync_core::{Appointment, BusyEvent, OwnerId, TimeRange};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::{ProviderError, ProviderErrorCode, ProviderResult};
use crate::provider::{BoxFuture, CalendarProvider};

/// Provider operations, for failure injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Update,
    Delete,
    List,
}

/// An event stored by a [`MemoryProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryEvent {
    pub id: String,
    pub owner: OwnerId,
    pub title: String,
    pub description: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    events: HashMap<String, MemoryEvent>,
    /// `None` means every owner is connected.
    authorized: Option<HashSet<OwnerId>>,
    one_shot: HashMap<Operation, VecDeque<(ProviderErrorCode, String)>>,
    persistent: HashMap<Operation, (ProviderErrorCode, String)>,
    calls: HashMap<Operation, usize>,
    next_id: u64,
}

impl State {
    fn take_failure(&mut self, op: Operation) -> Option<(ProviderErrorCode, String)> {
        if let Some(queued) = self.one_shot.get_mut(&op).and_then(VecDeque::pop_front) {
            return Some(queued);
        }
        self.persistent.get(&op).cloned()
    }

    fn is_authorized(&self, owner: &OwnerId) -> bool {
        self.authorized.as_ref().is_none_or(|set| set.contains(owner))
    }
}

/// In-memory calendar provider.
#[derive(Debug)]
pub struct MemoryProvider {
    provider_type: String,
    state: Mutex<State>,
}

impl MemoryProvider {
    /// Creates a provider where every owner is connected.
    pub fn new(provider_type: impl Into<String>) -> Self {
        Self {
            provider_type: provider_type.into(),
            state: Mutex::new(State::default()),
        }
    }

    /// Creates a provider where no owner is connected until
    /// [`authorize`](Self::authorize)d.
    pub fn restricted(provider_type: impl Into<String>) -> Self {
        let provider = Self::new(provider_type);
        provider.lock().authorized = Some(HashSet::new());
        provider
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Connects `owner`. A no-op for unrestricted providers.
    pub fn authorize(&self, owner: OwnerId) {
        if let Some(set) = self.lock().authorized.as_mut() {
            set.insert(owner);
        }
    }

    /// Disconnects `owner`, turning an unrestricted provider into a
    /// restricted one that still admits nobody else.
    pub fn revoke(&self, owner: &OwnerId) {
        let mut state = self.lock();
        if state.authorized.is_none() {
            let known: HashSet<OwnerId> = state.events.values().map(|e| e.owner).collect();
            state.authorized = Some(known);
        }
        if let Some(set) = state.authorized.as_mut() {
            set.remove(owner);
        }
    }

    /// Makes the next call of `op` fail with `code`.
    pub fn fail_next(&self, op: Operation, code: ProviderErrorCode, message: impl Into<String>) {
        self.lock()
            .one_shot
            .entry(op)
            .or_default()
            .push_back((code, message.into()));
    }

    /// Makes every call of `op` fail with `code` until cleared.
    pub fn fail_always(&self, op: Operation, code: ProviderErrorCode, message: impl Into<String>) {
        self.lock().persistent.insert(op, (code, message.into()));
    }

    /// Removes all injected failures.
    pub fn clear_failures(&self) {
        let mut state = self.lock();
        state.one_shot.clear();
        state.persistent.clear();
    }

    /// Deletes an event behind the engine's back.
    pub fn forget_event(&self, id: &str) -> bool {
        self.lock().events.remove(id).is_some()
    }

    /// Adds an event that did not come from an appointment.
    pub fn insert_busy(
        &self,
        owner: OwnerId,
        title: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> String {
        let mut state = self.lock();
        let id = self.issue_id(&mut state);
        state.events.insert(
            id.clone(),
            MemoryEvent {
                id: id.clone(),
                owner,
                title: title.into(),
                description: None,
                start,
                end,
            },
        );
        id
    }

    pub fn event(&self, id: &str) -> Option<MemoryEvent> {
        self.lock().events.get(id).cloned()
    }

    pub fn event_count(&self) -> usize {
        self.lock().events.len()
    }

    /// Returns how many times `op` was invoked, failures included.
    pub fn calls(&self, op: Operation) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    fn issue_id(&self, state: &mut State) -> String {
        state.next_id += 1;
        format!("{}-evt-{}", self.provider_type, state.next_id)
    }

    fn error(&self, code: ProviderErrorCode, message: impl Into<String>) -> ProviderError {
        ProviderError::new(code, message).with_provider(&self.provider_type)
    }

    /// Counts the call and returns the injected failure, if any.
    fn begin(&self, state: &mut State, op: Operation, owner: &OwnerId) -> ProviderResult<()> {
        *state.calls.entry(op).or_default() += 1;
        if let Some((code, message)) = state.take_failure(op) {
            return Err(self.error(code, message));
        }
        if !state.is_authorized(owner) {
            return Err(self.error(ProviderErrorCode::AuthExpired, "owner is not connected"));
        }
        Ok(())
    }

    fn to_event(id: String, appointment: &Appointment) -> MemoryEvent {
        MemoryEvent {
            id,
            owner: appointment.owner,
            title: appointment.title.clone(),
            description: appointment.description.clone(),
            start: appointment.start,
            end: appointment.end,
        }
    }
}

impl CalendarProvider for MemoryProvider {
    fn provider_type(&self) -> &str {
        &self.provider_type
    }

    fn available(&self, owner: &OwnerId) -> bool {
        self.lock().is_authorized(owner)
    }

    fn create_event<'a>(
        &'a self,
        appointment: &'a Appointment,
    ) -> BoxFuture<'a, ProviderResult<String>> {
        Box::pin(async move {
            let mut state = self.lock();
            self.begin(&mut state, Operation::Create, &appointment.owner)?;

            let id = self.issue_id(&mut state);
            state
                .events
                .insert(id.clone(), Self::to_event(id.clone(), appointment));
            debug!(provider = %self.provider_type, external_id = %id, "Created event");
            Ok(id)
        })
    }

    fn update_event<'a>(
        &'a self,
        appointment: &'a Appointment,
        external_id: &'a str,
    ) -> BoxFuture<'a, ProviderResult<String>> {
        Box::pin(async move {
            let mut state = self.lock();
            self.begin(&mut state, Operation::Update, &appointment.owner)?;

            if !state.events.contains_key(external_id) {
                return Err(self.error(
                    ProviderErrorCode::NotFound,
                    format!("event {external_id} not found"),
                ));
            }
            state.events.insert(
                external_id.to_string(),
                Self::to_event(external_id.to_string(), appointment),
            );
            Ok(external_id.to_string())
        })
    }

    fn delete_event<'a>(
        &'a self,
        owner: &'a OwnerId,
        external_id: &'a str,
    ) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move {
            let mut state = self.lock();
            self.begin(&mut state, Operation::Delete, owner)?;

            if state.events.remove(external_id).is_none() {
                debug!(provider = %self.provider_type, external_id, "Event already gone");
            }
            Ok(())
        })
    }

    fn list_busy_intervals<'a>(
        &'a self,
        owner: &'a OwnerId,
        range: TimeRange,
    ) -> BoxFuture<'a, Vec<BusyEvent>> {
        Box::pin(async move {
            let mut state = self.lock();
            if let Err(e) = self.begin(&mut state, Operation::List, owner) {
                warn!(provider = %self.provider_type, error = %e, "Busy listing failed");
                return Vec::new();
            }

            let mut events: Vec<BusyEvent> = state
                .events
                .values()
                .filter(|e| e.owner == *owner)
                .filter(|e| TimeRange::new(e.start, e.end).overlaps(&range))
                .map(|e| BusyEvent {
                    external_id: e.id.clone(),
                    title: e.title.clone(),
                    start: e.start,
                    end: e.end,
                })
                .collect();
            events.sort_by_key(|e| e.start);
            events
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use booksync_core::{AppointmentId, AppointmentStatus};
    use chrono::TimeZone;

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, h, 0, 0).unwrap()
    }

    fn appointment(owner: OwnerId, title: &str) -> Appointment {
        Appointment {
            id: AppointmentId::new(),
            owner,
            title: title.into(),
            description: None,
            start: at(10),
            end: at(11),
            status: AppointmentStatus::Pending,
            location: None,
            client_ref: None,
            created_at: at(8),
            updated_at: at(8),
        }
    }

    fn day() -> TimeRange {
        TimeRange::new(at(0), at(23))
    }

    #[tokio::test]
    async fn create_update_delete() {
        let provider = MemoryProvider::new("mem");
        let owner = OwnerId::new();
        let mut appt = appointment(owner, "Haircut");

        let id = provider.create_event(&appt).await.unwrap();
        assert_eq!(id, "mem-evt-1");
        assert_eq!(provider.event(&id).unwrap().title, "Haircut");

        appt.title = "Haircut and beard".into();
        let same = provider.update_event(&appt, &id).await.unwrap();
        assert_eq!(same, id);
        assert_eq!(provider.event(&id).unwrap().title, "Haircut and beard");

        provider.delete_event(&owner, &id).await.unwrap();
        assert!(provider.event(&id).is_none());
        // Deleting again is fine
        provider.delete_event(&owner, &id).await.unwrap();
        assert_eq!(provider.calls(Operation::Delete), 2);
    }

    #[tokio::test]
    async fn update_of_forgotten_event_is_not_found() {
        let provider = MemoryProvider::new("mem");
        let appt = appointment(OwnerId::new(), "Checkup");
        let id = provider.create_event(&appt).await.unwrap();
        assert!(provider.forget_event(&id));

        let err = provider.update_event(&appt, &id).await.unwrap_err();
        assert_eq!(err.code(), ProviderErrorCode::NotFound);
        assert_eq!(err.provider(), Some("mem"));
    }

    #[tokio::test]
    async fn injected_failures() {
        let provider = MemoryProvider::new("mem");
        let appt = appointment(OwnerId::new(), "Checkup");

        provider.fail_next(Operation::Create, ProviderErrorCode::Unavailable, "503");
        let err = provider.create_event(&appt).await.unwrap_err();
        assert_eq!(err.code(), ProviderErrorCode::Unavailable);
        assert!(provider.create_event(&appt).await.is_ok());

        provider.fail_always(Operation::Create, ProviderErrorCode::ClientRejected, "bad");
        assert!(provider.create_event(&appt).await.is_err());
        assert!(provider.create_event(&appt).await.is_err());
        provider.clear_failures();
        assert!(provider.create_event(&appt).await.is_ok());
        assert_eq!(provider.calls(Operation::Create), 5);
    }

    #[tokio::test]
    async fn restricted_owners() {
        let provider = MemoryProvider::restricted("mem");
        let owner = OwnerId::new();
        assert!(!provider.available(&owner));

        let err = provider
            .create_event(&appointment(owner, "Checkup"))
            .await
            .unwrap_err();
        assert!(err.requires_reconnect());

        provider.authorize(owner);
        assert!(provider.available(&owner));

        provider.revoke(&owner);
        assert!(!provider.available(&owner));
    }

    #[tokio::test]
    async fn revoking_on_open_provider() {
        let provider = MemoryProvider::new("mem");
        let owner = OwnerId::new();
        let other = OwnerId::new();
        provider.insert_busy(other, "Lunch", at(12), at(13));

        provider.revoke(&owner);
        assert!(!provider.available(&owner));
        assert!(provider.available(&other));
    }

    #[tokio::test]
    async fn busy_listing_filters_owner_and_range() {
        let provider = MemoryProvider::new("mem");
        let owner = OwnerId::new();
        provider.insert_busy(owner, "Late", at(15), at(16));
        provider.insert_busy(owner, "Early", at(9), at(10));
        provider.insert_busy(OwnerId::new(), "Someone else", at(9), at(10));

        let busy = provider.list_busy_intervals(&owner, day()).await;
        let titles: Vec<_> = busy.iter().map(|b| b.title.as_str()).collect();
        assert_eq!(titles, vec!["Early", "Late"]);

        let morning = TimeRange::new(at(8), at(12));
        assert_eq!(provider.list_busy_intervals(&owner, morning).await.len(), 1);
    }

    #[tokio::test]
    async fn busy_listing_swallows_errors() {
        let provider = MemoryProvider::new("mem");
        let owner = OwnerId::new();
        provider.insert_busy(owner, "Meeting", at(9), at(10));
        provider.fail_next(Operation::List, ProviderErrorCode::Unavailable, "down");

        assert!(provider.list_busy_intervals(&owner, day()).await.is_empty());
        assert_eq!(provider.list_busy_intervals(&owner, day()).await.len(), 1);
    }
}
