//! Appointment event dispatcher.
//!
//! Fans appointment mutations out to registered [`Subscriber`]s. The
//! dispatcher is an explicit value built at composition time; there is no
//! global registry.
//!
//! A failing or panicking subscriber is logged and skipped. It never stops
//! the remaining subscribers and never undoes the mutation that produced the
//! event.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use booksync_core::Appointment;
use booksync_providers::BoxFuture;
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::EngineResult;

/// What happened to an appointment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Created or materially changed.
    Changed,
    /// Hard-deleted.
    Deleted,
}

/// A mutation notice carrying the appointment as it was at that moment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentEvent {
    pub kind: EventKind,
    pub appointment: Appointment,
    pub occurred_at: DateTime<Utc>,
}

impl AppointmentEvent {
    pub fn changed(appointment: Appointment) -> Self {
        Self {
            kind: EventKind::Changed,
            appointment,
            occurred_at: Utc::now(),
        }
    }

    pub fn deleted(appointment: Appointment) -> Self {
        Self {
            kind: EventKind::Deleted,
            appointment,
            occurred_at: Utc::now(),
        }
    }
}

/// Receives appointment events.
pub trait Subscriber: Send + Sync {
    /// Unique name, used for idempotent registration and in logs.
    fn name(&self) -> &str;

    fn on_appointment_changed<'a>(
        &'a self,
        appointment: &'a Appointment,
    ) -> BoxFuture<'a, EngineResult<()>>;

    fn on_appointment_deleted<'a>(
        &'a self,
        appointment: &'a Appointment,
    ) -> BoxFuture<'a, EngineResult<()>>;
}

/// Ordered set of subscribers.
#[derive(Clone, Default)]
pub struct Dispatcher {
    subscribers: Vec<Arc<dyn Subscriber>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subscriber. Returns `false` if one with the same name is
    /// already registered.
    pub fn register(&mut self, subscriber: Arc<dyn Subscriber>) -> bool {
        if self.is_registered(subscriber.name()) {
            debug!(subscriber = subscriber.name(), "Subscriber already registered");
            return false;
        }
        debug!(subscriber = subscriber.name(), "Registered subscriber");
        self.subscribers.push(subscriber);
        true
    }

    /// Removes a subscriber by name. Returns `false` if it was not registered.
    pub fn deregister(&mut self, name: &str) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.name() != name);
        before != self.subscribers.len()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.subscribers.iter().any(|s| s.name() == name)
    }

    pub fn subscriber_names(&self) -> Vec<String> {
        self.subscribers.iter().map(|s| s.name().to_string()).collect()
    }

    /// Delivers `event` to every subscriber in registration order.
    ///
    /// Returns the number of subscribers that failed or panicked.
    pub async fn publish(&self, event: &AppointmentEvent) -> usize {
        let mut failures = 0;
        for subscriber in &self.subscribers {
            let name = subscriber.name();
            let delivery = match event.kind {
                EventKind::Changed => subscriber.on_appointment_changed(&event.appointment),
                EventKind::Deleted => subscriber.on_appointment_deleted(&event.appointment),
            };

            match AssertUnwindSafe(delivery).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    warn!(
                        subscriber = name,
                        appointment_id = %event.appointment.id,
                        error = %e,
                        "Subscriber failed"
                    );
                }
                Err(panic) => {
                    failures += 1;
                    error!(
                        subscriber = name,
                        appointment_id = %event.appointment.id,
                        panic = panic_message(panic.as_ref()),
                        "Subscriber panicked"
                    );
                }
            }
        }
        failures
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("subscribers", &self.subscriber_names())
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}
