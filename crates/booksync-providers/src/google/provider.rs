//! [`CalendarProvider`] implementation for Google Calendar.

use std::sync::Arc;

use booksync_core::{Appointment, BusyEvent, OwnerId, ProviderType, TimeRange};
use tracing::{debug, info, warn};

use crate::credentials::CredentialSource;
use crate::error::{ProviderError, ProviderErrorCode, ProviderResult};
use crate::provider::{BoxFuture, CalendarProvider};

use super::client::{EventBody, GoogleCalendarClient};
use super::config::GoogleConfig;

/// Mirrors appointments into a Google calendar.
///
/// Holds no tokens itself; each call asks the [`CredentialSource`] for the
/// owner's current access token.
pub struct GoogleCalendarProvider {
    client: GoogleCalendarClient,
    credentials: Arc<dyn CredentialSource>,
}

impl GoogleCalendarProvider {
    /// Creates the provider.
    pub fn new(config: GoogleConfig, credentials: Arc<dyn CredentialSource>) -> ProviderResult<Self> {
        let client = GoogleCalendarClient::new(config)
            .map_err(|e| e.with_provider(ProviderType::GOOGLE_CALENDAR))?;
        Ok(Self {
            client,
            credentials,
        })
    }

    pub fn config(&self) -> &GoogleConfig {
        self.client.config()
    }

    fn token(&self, owner: &OwnerId) -> ProviderResult<String> {
        self.credentials.access_token(owner).ok_or_else(|| {
            ProviderError::auth_expired("no Google access token for owner, reconnect required")
        })
    }

    fn tag(e: ProviderError) -> ProviderError {
        e.with_provider(ProviderType::GOOGLE_CALENDAR)
    }
}

impl std::fmt::Debug for GoogleCalendarProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleCalendarProvider")
            .field("calendar_id", &self.config().calendar_id)
            .finish_non_exhaustive()
    }
}

impl CalendarProvider for GoogleCalendarProvider {
    fn provider_type(&self) -> &str {
        ProviderType::GOOGLE_CALENDAR
    }

    fn available(&self, owner: &OwnerId) -> bool {
        self.credentials.has_credentials(owner)
    }

    fn create_event<'a>(
        &'a self,
        appointment: &'a Appointment,
    ) -> BoxFuture<'a, ProviderResult<String>> {
        Box::pin(async move {
            let token = self.token(&appointment.owner).map_err(Self::tag)?;
            let body = EventBody::from_appointment(appointment);
            let id = self
                .client
                .insert_event(&token, &body)
                .await
                .map_err(Self::tag)?;
            info!(appointment_id = %appointment.id, external_id = %id, "created Google Calendar event");
            Ok(id)
        })
    }

    fn update_event<'a>(
        &'a self,
        appointment: &'a Appointment,
        external_id: &'a str,
    ) -> BoxFuture<'a, ProviderResult<String>> {
        Box::pin(async move {
            let token = self.token(&appointment.owner).map_err(Self::tag)?;
            let body = EventBody::from_appointment(appointment);
            let id = self
                .client
                .update_event(&token, external_id, &body)
                .await
                .map_err(Self::tag)?;
            debug!(appointment_id = %appointment.id, external_id = %id, "updated Google Calendar event");
            Ok(id)
        })
    }

    fn delete_event<'a>(
        &'a self,
        owner: &'a OwnerId,
        external_id: &'a str,
    ) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move {
            let token = self.token(owner).map_err(Self::tag)?;
            match self.client.delete_event(&token, external_id).await {
                Ok(()) => {
                    info!(external_id, "deleted Google Calendar event");
                    Ok(())
                }
                Err(e) if e.code() == ProviderErrorCode::NotFound => {
                    info!(external_id, "Google Calendar event already deleted");
                    Ok(())
                }
                Err(e) => Err(Self::tag(e)),
            }
        })
    }

    fn list_busy_intervals<'a>(
        &'a self,
        owner: &'a OwnerId,
        range: TimeRange,
    ) -> BoxFuture<'a, Vec<BusyEvent>> {
        Box::pin(async move {
            let Ok(token) = self.token(owner) else {
                return Vec::new();
            };
            match self.client.list_events(&token, range.start, range.end).await {
                Ok(events) => events,
                Err(e) => {
                    warn!(owner = %owner, error = %e, "failed to fetch Google Calendar events");
                    Vec::new()
                }
            }
        })
    }
}
