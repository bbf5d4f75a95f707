//! Google Calendar API client.
//!
//! Low-level HTTP access to the events collection of one calendar: request
//! building, status mapping and response parsing.

use booksync_core::{Appointment, BusyEvent};
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ProviderError, ProviderResult};

use super::config::GoogleConfig;

/// Footer appended to every mirrored event description.
const DESCRIPTION_FOOTER: &str = "Booked via booksync";

/// Google Calendar API client.
#[derive(Debug)]
pub struct GoogleCalendarClient {
    http_client: reqwest::Client,
    config: GoogleConfig,
}

impl GoogleCalendarClient {
    /// Creates a client for the configured calendar.
    pub fn new(config: GoogleConfig) -> ProviderResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ProviderError::unavailable("failed to create HTTP client").with_source(e))?;

        Ok(Self {
            http_client,
            config,
        })
    }

    pub fn config(&self) -> &GoogleConfig {
        &self.config
    }

    /// Inserts an event and returns its id.
    pub async fn insert_event(&self, token: &str, event: &EventBody) -> ProviderResult<String> {
        let response = self
            .http_client
            .post(self.config.events_url())
            .bearer_auth(token)
            .json(event)
            .send()
            .await
            .map_err(transport_error)?;

        let created: EventRef = parse_json(check_status(response).await?).await?;
        debug!(event_id = %created.id, "inserted Google Calendar event");
        Ok(created.id)
    }

    /// Replaces an event and returns its id.
    pub async fn update_event(
        &self,
        token: &str,
        event_id: &str,
        event: &EventBody,
    ) -> ProviderResult<String> {
        let response = self
            .http_client
            .put(self.config.event_url(event_id))
            .bearer_auth(token)
            .json(event)
            .send()
            .await
            .map_err(transport_error)?;

        let updated: EventRef = parse_json(check_status(response).await?).await?;
        Ok(updated.id)
    }

    /// Deletes an event. A missing event is reported as `NotFound`.
    pub async fn delete_event(&self, token: &str, event_id: &str) -> ProviderResult<()> {
        let response = self
            .http_client
            .delete(self.config.event_url(event_id))
            .bearer_auth(token)
            .send()
            .await
            .map_err(transport_error)?;

        check_status(response).await?;
        Ok(())
    }

    /// Lists events between `time_min` and `time_max`, expanding recurring
    /// events and following pagination. Cancelled events are skipped.
    pub async fn list_events(
        &self,
        token: &str,
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
    ) -> ProviderResult<Vec<BusyEvent>> {
        let mut events = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .http_client
                .get(self.config.events_url())
                .bearer_auth(token)
                .query(&[
                    ("timeMin", time_min.to_rfc3339()),
                    ("timeMax", time_max.to_rfc3339()),
                    ("singleEvents", "true".to_string()),
                    ("orderBy", "startTime".to_string()),
                ]);
            if let Some(ref token) = page_token {
                request = request.query(&[("pageToken", token)]);
            }

            let response = request.send().await.map_err(transport_error)?;
            let page: EventListResponse = parse_json(check_status(response).await?).await?;

            events.extend(page.items.into_iter().filter_map(ApiEvent::into_busy_event));

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(count = events.len(), calendar = %self.config.calendar_id, "listed Google Calendar events");
        Ok(events)
    }
}

/// Maps a reqwest transport failure.
fn transport_error(e: reqwest::Error) -> ProviderError {
    let message = if e.is_timeout() {
        "request timeout".to_string()
    } else if e.is_connect() {
        format!("connection failed: {}", e)
    } else {
        format!("request failed: {}", e)
    };
    ProviderError::unavailable(message).with_source(e)
}

/// Passes successful responses through and maps error statuses.
async fn check_status(response: reqwest::Response) -> ProviderResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, &body))
}

fn status_error(status: StatusCode, body: &str) -> ProviderError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ProviderError::auth_expired(format!("access denied ({status}), reconnect required"))
        }
        StatusCode::NOT_FOUND | StatusCode::GONE => {
            ProviderError::not_found(format!("event not found ({status})"))
        }
        StatusCode::TOO_MANY_REQUESTS => ProviderError::unavailable("rate limit exceeded"),
        s if s.is_server_error() => {
            ProviderError::unavailable(format!("API error ({status}): {body}"))
        }
        _ => ProviderError::client_rejected(format!("request rejected ({status}): {body}")),
    }
}

async fn parse_json<T: for<'de> Deserialize<'de>>(response: reqwest::Response) -> ProviderResult<T> {
    let body = response
        .text()
        .await
        .map_err(|e| ProviderError::unavailable("failed to read response").with_source(e))?;
    serde_json::from_str(&body).map_err(|e| {
        ProviderError::unavailable(format!("failed to parse response: {}", e)).with_source(e)
    })
}

/// Request body for insert and update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventBody {
    pub summary: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub start: EventDateTime,
    pub end: EventDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDateTime {
    pub date_time: String,
}

impl EventBody {
    pub fn from_appointment(appointment: &Appointment) -> Self {
        Self {
            summary: appointment.title.clone(),
            description: build_description(appointment),
            location: appointment.location.clone(),
            start: EventDateTime {
                date_time: appointment.start.to_rfc3339(),
            },
            end: EventDateTime {
                date_time: appointment.end.to_rfc3339(),
            },
        }
    }
}

/// Appointment description plus the client reference and footer lines.
pub fn build_description(appointment: &Appointment) -> String {
    let mut description = appointment.description.clone().unwrap_or_default();
    if let Some(ref client) = appointment.client_ref {
        description.push_str(&format!("\n\nClient: {client}"));
    }
    description.push_str("\n\n");
    description.push_str(DESCRIPTION_FOOTER);
    description.trim().to_string()
}

#[derive(Debug, Deserialize)]
struct EventRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventListResponse {
    #[serde(default)]
    items: Vec<ApiEvent>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEvent {
    id: Option<String>,
    summary: Option<String>,
    status: Option<String>,
    start: Option<ApiEventTime>,
    end: Option<ApiEventTime>,
}

/// Either `dateTime` (timed) or `date` (all-day) is set.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEventTime {
    date: Option<String>,
    date_time: Option<String>,
}

impl ApiEventTime {
    /// All-day dates resolve to UTC midnight.
    fn to_utc(&self) -> Option<DateTime<Utc>> {
        if let Some(ref dt) = self.date_time {
            return DateTime::parse_from_rfc3339(dt)
                .ok()
                .map(|d| d.with_timezone(&Utc));
        }
        let date = NaiveDate::parse_from_str(self.date.as_deref()?, "%Y-%m-%d").ok()?;
        Some(date.and_hms_opt(0, 0, 0)?.and_utc())
    }
}

impl ApiEvent {
    fn into_busy_event(self) -> Option<BusyEvent> {
        if self.status.as_deref() == Some("cancelled") {
            return None;
        }
        Some(BusyEvent {
            external_id: self.id?,
            title: self.summary.unwrap_or_else(|| "Busy".to_string()),
            start: self.start?.to_utc()?,
            end: self.end?.to_utc()?,
        })
    }
}
