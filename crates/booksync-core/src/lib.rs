//! Core types: time ranges, appointments, availability, free slots, sync records, config

pub mod appointment;
pub mod availability;
pub mod config;
pub mod error;
pub mod ids;
pub mod slots;
pub mod sync_status;
pub mod time;
pub mod tracing;

pub use appointment::{
    Appointment, AppointmentDraft, AppointmentPatch, AppointmentStatus, AppointmentUpdate,
    Validator, is_material_change,
};
pub use availability::{AvailabilityWindow, DayOfWeek, WindowDraft, WindowPatch, WindowRegistry};
pub use config::{
    ConfigError, EngineConfig, GoogleSettings, LogFormat, LoggingSettings, SchedulingSettings,
    SlotSettings, SweepSettings, SyncSettings,
};
pub use error::{Field, ValidationError};
pub use ids::{AppointmentId, OwnerId, WindowId};
pub use slots::{BusyEvent, BusyInterval, BusySource, FreeSlot, FreeSlots, SlotQuery, free_slots};
pub use sync_status::{ProviderType, SyncState, SyncStatus};
pub use time::{TimeRange, overlaps};
pub use tracing::{TracingConfig, TracingError, init_tracing};
