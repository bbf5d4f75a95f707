//! Free-slot computation.
//!
//! [`free_slots`] walks candidate start times across business hours at a
//! fixed step and yields every candidate of the requested duration that does
//! not overlap a busy interval. The result is deterministic for a fixed input
//! and holds no state.
//!
//! Availability windows are not consulted here. "Open for business" and
//! "not already booked" are separate signals that callers combine.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::appointment::Appointment;
use crate::ids::AppointmentId;
use crate::time::TimeRange;

/// Default spacing between candidate start times.
pub const DEFAULT_STEP_MINUTES: i64 = 30;

/// Where a busy interval came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BusySource {
    /// A local appointment.
    Appointment { id: AppointmentId },
    /// An event reported by an external provider.
    Provider {
        provider_type: String,
        external_id: String,
    },
}

/// Something already occupying time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusyInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub label: String,
    pub source: BusySource,
}

impl BusyInterval {
    /// Returns the occupied range.
    pub fn range(&self) -> TimeRange {
        TimeRange::new(self.start, self.end)
    }

    /// Reduces a provider-reported event to a busy interval.
    pub fn from_provider_event(provider_type: impl Into<String>, event: &BusyEvent) -> Self {
        Self {
            start: event.start,
            end: event.end,
            label: event.title.clone(),
            source: BusySource::Provider {
                provider_type: provider_type.into(),
                external_id: event.external_id.clone(),
            },
        }
    }
}

impl From<&Appointment> for BusyInterval {
    fn from(appointment: &Appointment) -> Self {
        Self {
            start: appointment.start,
            end: appointment.end,
            label: appointment.title.clone(),
            source: BusySource::Appointment { id: appointment.id },
        }
    }
}

/// An event reported by a provider's busy listing (wire shape).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusyEvent {
    pub external_id: String,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// A bookable slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeSlot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Parameters for a free-slot query on a single day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotQuery {
    /// The local calendar day.
    pub day: NaiveDate,
    /// Requested appointment length in minutes.
    pub duration_minutes: i64,
    /// Spacing between candidate starts in minutes.
    pub step_minutes: i64,
    /// Local time of the first candidate start.
    pub business_start: NaiveTime,
    /// Local time no slot may end after.
    pub business_end: NaiveTime,
}

impl SlotQuery {
    /// Creates a query with the default step and 09:00-18:00 business hours.
    pub fn new(day: NaiveDate, duration_minutes: i64) -> Self {
        Self {
            day,
            duration_minutes,
            step_minutes: DEFAULT_STEP_MINUTES,
            business_start: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default(),
            business_end: NaiveTime::from_hms_opt(18, 0, 0).unwrap_or_default(),
        }
    }

    /// Builder: set the step.
    pub fn with_step(mut self, step_minutes: i64) -> Self {
        self.step_minutes = step_minutes;
        self
    }

    /// Builder: set business hours.
    pub fn with_business_hours(mut self, start: NaiveTime, end: NaiveTime) -> Self {
        self.business_start = start;
        self.business_end = end;
        self
    }
}

/// Lazy iterator over the free slots of a [`SlotQuery`].
#[derive(Debug, Clone)]
pub struct FreeSlots<'a> {
    next_start: DateTime<Utc>,
    business_end: DateTime<Utc>,
    duration: Duration,
    step: Duration,
    busy: &'a [BusyInterval],
}

impl<'a> FreeSlots<'a> {
    fn empty(busy: &'a [BusyInterval]) -> Self {
        Self {
            next_start: DateTime::<Utc>::MIN_UTC,
            business_end: DateTime::<Utc>::MIN_UTC,
            duration: Duration::zero(),
            step: Duration::zero(),
            busy,
        }
    }

    fn candidate_end(&self) -> Option<DateTime<Utc>> {
        if self.duration <= Duration::zero() || self.step <= Duration::zero() {
            return None;
        }
        self.next_start
            .checked_add_signed(self.duration)
            .filter(|end| *end <= self.business_end)
    }
}

impl Iterator for FreeSlots<'_> {
    type Item = FreeSlot;

    fn next(&mut self) -> Option<FreeSlot> {
        while let Some(end) = self.candidate_end() {
            let candidate = TimeRange::new(self.next_start, end);
            // An unrepresentable next start ends the walk.
            self.next_start = self
                .next_start
                .checked_add_signed(self.step)
                .unwrap_or(self.business_end);

            if !self.busy.iter().any(|b| candidate.overlaps(&b.range())) {
                return Some(FreeSlot {
                    start: candidate.start,
                    end: candidate.end,
                });
            }
        }
        None
    }
}

/// Computes the free slots of `query.day` in `tz`.
///
/// Candidates start at `business_start` and advance by `step_minutes` while
/// `candidate + duration <= business_end`; a candidate is skipped when it
/// overlaps any of `busy`. The sequence is empty for a non-positive duration
/// or step, for inverted business hours, and when the local business bounds
/// do not exist in `tz`.
pub fn free_slots<'a, Tz: TimeZone>(
    query: &SlotQuery,
    tz: &Tz,
    busy: &'a [BusyInterval],
) -> FreeSlots<'a> {
    if query.duration_minutes <= 0
        || query.step_minutes <= 0
        || query.business_end <= query.business_start
    {
        return FreeSlots::empty(busy);
    }

    let local = |time: NaiveTime| {
        tz.from_local_datetime(&query.day.and_time(time))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
    };
    let (Some(start), Some(end)) = (local(query.business_start), local(query.business_end)) else {
        return FreeSlots::empty(busy);
    };
    let (Some(duration), Some(step)) = (
        Duration::try_minutes(query.duration_minutes),
        Duration::try_minutes(query.step_minutes),
    ) else {
        return FreeSlots::empty(busy);
    };

    FreeSlots {
        next_start: start,
        business_end: end,
        duration,
        step,
        busy,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::OwnerId;
    use chrono::TimeZone;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, h, m, 0).unwrap()
    }

    fn busy(h1: u32, m1: u32, h2: u32, m2: u32) -> BusyInterval {
        BusyInterval {
            start: at(h1, m1),
            end: at(h2, m2),
            label: "busy".into(),
            source: BusySource::Provider {
                provider_type: "test".into(),
                external_id: format!("{h1}{m1}"),
            },
        }
    }

    fn starts(slots: impl Iterator<Item = FreeSlot>) -> Vec<DateTime<Utc>> {
        slots.map(|s| s.start).collect()
    }

    #[test]
    fn empty_day_fills_business_hours() {
        let query = SlotQuery::new(day(), 60);
        let slots: Vec<_> = free_slots(&query, &Utc, &[]).collect();

        // 09:00, 09:30, ... 17:00
        assert_eq!(slots.len(), 17);
        assert_eq!(slots[0].start, at(9, 0));
        assert_eq!(slots[0].end, at(10, 0));
        assert_eq!(slots.last().unwrap().start, at(17, 0));
        assert_eq!(slots.last().unwrap().end, at(18, 0));
    }

    #[test]
    fn busy_hour_excludes_overlapping_candidates() {
        let query = SlotQuery::new(day(), 60);
        let busy = [busy(10, 0, 11, 0)];
        let got = starts(free_slots(&query, &Utc, &busy));

        for excluded in [at(9, 30), at(10, 0), at(10, 30)] {
            assert!(!got.contains(&excluded), "{excluded} should be busy");
        }
        for included in [at(9, 0), at(11, 0), at(11, 30), at(17, 0)] {
            assert!(got.contains(&included), "{included} should be free");
        }
        // Exactly three candidates in [09:00, 11:00) were dropped
        assert_eq!(got.len(), 17 - 3);
    }

    #[test]
    fn degenerate_queries_are_empty() {
        let zero = SlotQuery::new(day(), 0);
        assert_eq!(free_slots(&zero, &Utc, &[]).count(), 0);

        let negative = SlotQuery::new(day(), -30);
        assert_eq!(free_slots(&negative, &Utc, &[]).count(), 0);

        let t = |h| NaiveTime::from_hms_opt(h, 0, 0).unwrap();
        let inverted = SlotQuery::new(day(), 30).with_business_hours(t(18), t(9));
        assert_eq!(free_slots(&inverted, &Utc, &[]).count(), 0);

        let no_step = SlotQuery::new(day(), 30).with_step(0);
        assert_eq!(free_slots(&no_step, &Utc, &[]).count(), 0);

        // Longer than the business day
        let too_long = SlotQuery::new(day(), 10 * 60);
        assert_eq!(free_slots(&too_long, &Utc, &[]).count(), 0);
    }

    #[test]
    fn out_of_range_lengths_are_empty() {
        for minutes in [i64::MAX, 1_000_000_000_000, i64::MIN] {
            let query = SlotQuery::new(day(), minutes);
            assert_eq!(free_slots(&query, &Utc, &[]).count(), 0, "duration {minutes}");
        }

        // A step past the end of the calendar still yields the first slot
        let huge_step = SlotQuery::new(day(), 30).with_step(1_000_000_000_000);
        assert_eq!(starts(free_slots(&huge_step, &Utc, &[])), vec![at(9, 0)]);

        let unrepresentable = SlotQuery::new(day(), 30).with_step(i64::MAX);
        assert_eq!(free_slots(&unrepresentable, &Utc, &[]).count(), 0);
    }

    #[test]
    fn custom_step_and_hours() {
        let t = |h| NaiveTime::from_hms_opt(h, 0, 0).unwrap();
        let query = SlotQuery::new(day(), 45)
            .with_step(15)
            .with_business_hours(t(8), t(10));
        let got = starts(free_slots(&query, &Utc, &[]));
        assert_eq!(
            got,
            vec![at(8, 0), at(8, 15), at(8, 30), at(8, 45), at(9, 0), at(9, 15)]
        );
    }

    #[test]
    fn business_hours_follow_timezone() {
        let bogota = chrono_tz::America::Bogota;
        let query = SlotQuery::new(day(), 60);
        let slots: Vec<_> = free_slots(&query, &bogota, &[]).collect();
        // 09:00 in Bogota is 14:00 UTC
        assert_eq!(slots[0].start, at(14, 0));
        assert_eq!(slots.len(), 17);
    }

    #[test]
    fn deterministic_and_restartable() {
        let query = SlotQuery::new(day(), 30);
        let busy = [busy(12, 0, 13, 0), busy(15, 15, 15, 45)];
        let first: Vec<_> = free_slots(&query, &Utc, &busy).collect();
        let second: Vec<_> = free_slots(&query, &Utc, &busy).collect();
        assert_eq!(first, second);
        assert!(!first.iter().any(|s| s.start == at(15, 0) || s.start == at(15, 30)));
    }

    #[test]
    fn appointment_reduces_to_busy_interval() {
        let appointment = Appointment {
            id: AppointmentId::new(),
            owner: OwnerId::new(),
            title: "Checkup".into(),
            description: None,
            start: at(10, 0),
            end: at(10, 30),
            status: Default::default(),
            location: None,
            client_ref: None,
            created_at: at(8, 0),
            updated_at: at(8, 0),
        };
        let interval = BusyInterval::from(&appointment);
        assert_eq!(interval.label, "Checkup");
        assert_eq!(
            interval.source,
            BusySource::Appointment { id: appointment.id }
        );
        assert_eq!(interval.range().duration(), Duration::minutes(30));
    }

    #[test]
    fn free_slot_serializes_as_rfc3339() {
        let slot = FreeSlot {
            start: at(9, 0),
            end: at(10, 0),
        };
        let json = serde_json::to_value(slot).unwrap();
        assert_eq!(json["start"], "2025-03-10T09:00:00Z");
        assert_eq!(json["end"], "2025-03-10T10:00:00Z");
    }
}
