//! Google Calendar provider.
//!
//! Mirrors appointments into one Google calendar through the Calendar API v3
//! and reads the owner's busy events back for free-slot computation.
//!
//! Access tokens come from a [`CredentialSource`](crate::CredentialSource);
//! obtaining and refreshing them is left to the embedding application.
//!
//! # Example
//!
//! ```ignore
//! use booksync_providers::google::{GoogleCalendarProvider, GoogleConfig};
//! use booksync_providers::StaticCredentials;
//!
//! let credentials = Arc::new(StaticCredentials::new().with_token(owner, token));
//! let provider = GoogleCalendarProvider::new(GoogleConfig::default(), credentials)?;
//! ```

mod client;
mod config;
mod provider;

pub use client::{EventBody, EventDateTime, GoogleCalendarClient, build_description};
pub use config::GoogleConfig;
pub use provider::GoogleCalendarProvider;
