//! Google Calendar provider configuration.

use std::time::Duration;

use booksync_core::GoogleSettings;
use url::Url;

/// Configuration for the Google Calendar provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoogleConfig {
    /// Calendar API v3 base URL, without trailing slash.
    pub base_url: String,

    /// Calendar that receives the mirrored events.
    pub calendar_id: String,

    /// Request timeout.
    pub timeout: Duration,

    /// User agent string for API requests.
    pub user_agent: String,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            calendar_id: Self::DEFAULT_CALENDAR_ID.to_string(),
            timeout: Duration::from_secs(Self::DEFAULT_TIMEOUT_SECS),
            user_agent: format!("booksync/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl GoogleConfig {
    pub const DEFAULT_BASE_URL: &'static str = "https://www.googleapis.com/calendar/v3";
    pub const DEFAULT_CALENDAR_ID: &'static str = "primary";
    pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

    /// Builds a config from the `[google]` settings section.
    pub fn from_settings(settings: &GoogleSettings) -> Result<Self, url::ParseError> {
        let mut config = Self::default()
            .with_calendar_id(settings.calendar_id.clone())
            .with_timeout(Duration::from_secs(settings.timeout_secs));
        if let Some(ref base) = settings.base_url {
            config = config.with_base_url(base)?;
        }
        Ok(config)
    }

    /// Sets the API base URL (e.g. a mock server in tests).
    pub fn with_base_url(mut self, base_url: &str) -> Result<Self, url::ParseError> {
        let url = Url::parse(base_url)?;
        self.base_url = url.as_str().trim_end_matches('/').to_string();
        Ok(self)
    }

    pub fn with_calendar_id(mut self, id: impl Into<String>) -> Self {
        self.calendar_id = id.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the events collection URL of the configured calendar.
    pub(crate) fn events_url(&self) -> String {
        format!(
            "{}/calendars/{}/events",
            self.base_url,
            urlencoding::encode(&self.calendar_id)
        )
    }

    /// Returns the URL of a single event.
    pub(crate) fn event_url(&self, event_id: &str) -> String {
        format!("{}/{}", self.events_url(), urlencoding::encode(event_id))
    }
}
