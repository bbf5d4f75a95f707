//! Scheduling engine: store, event dispatch and provider synchronization.
//!
//! ```text
//! SchedulingService ──► SchedulingStore
//!        │
//!        ▼
//!   Dispatcher ──► SyncQueue ──► worker ──► SyncOrchestrator ──► providers
//!                                                 ▲
//!                               RetrySweep ───────┘
//! ```
//!
//! Mutations commit to the store and then publish an [`AppointmentEvent`].
//! The orchestrator records per-provider outcomes as sync status rows; a
//! provider failure never fails the mutation.

pub mod dispatcher;
pub mod error;
pub mod orchestrator;
pub mod service;
pub mod store;
pub mod sweep;
pub mod worker;

pub use dispatcher::{AppointmentEvent, Dispatcher, EventKind, Subscriber};
pub use error::{EngineError, EngineResult};
pub use orchestrator::{
    AppointmentLocks, PROVIDER_DISABLED, RECONNECT_REQUIRED, RetryReport, SyncOrchestrator,
};
pub use service::{
    DaySchedule, NOT_SYNCED, OwnerRemoval, SchedulingService, ServiceBuilder, SyncMode,
    SyncReport,
};
pub use store::SchedulingStore;
pub use sweep::{RetrySweep, SweepCommand, SweepConfig, SweepHandle, SweepState};
pub use worker::{SyncQueue, SyncWorkerHandle, spawn_worker};
