//! CalendarProvider trait, provider registry and implementations.
//!
//! - [`CalendarProvider`] - the trait every calendar backend implements
//! - [`ProviderRegistry`] - ordered set of providers, built once at startup
//! - [`CredentialSource`] - per-owner access tokens supplied from outside
//! - [`MemoryProvider`] - in-process calendar for development and tests
//! - `google::GoogleCalendarProvider` - Google Calendar over HTTP (feature `google`)
//!
//! ```text
//! ┌──────────────────┐   ┌──────────────────┐
//! │ Google Calendar  │   │  in-memory map   │
//! └────────┬─────────┘   └────────┬─────────┘
//!          │                      │
//!          ▼                      ▼
//! ┌──────────────────┐   ┌──────────────────┐
//! │ GoogleCalendar-  │   │  MemoryProvider  │
//! │ Provider         │   │                  │
//! └────────┬─────────┘   └────────┬─────────┘
//!          │   CalendarProvider   │
//!          └──────────┬───────────┘
//!                     ▼
//!            ┌──────────────────┐
//!            │ ProviderRegistry │
//!            └──────────────────┘
//! ```

pub mod credentials;
pub mod error;
#[cfg(feature = "google")]
pub mod google;
pub mod memory;
pub mod provider;
pub mod registry;

pub use credentials::{CredentialSource, StaticCredentials};
pub use error::{ProviderError, ProviderErrorCode, ProviderResult};
pub use memory::{MemoryEvent, MemoryProvider, Operation};
pub use provider::{BoxFuture, CalendarProvider};
pub use registry::ProviderRegistry;
