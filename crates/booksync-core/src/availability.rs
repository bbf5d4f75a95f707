//! Recurring weekly availability windows.
//!
//! An owner publishes [`AvailabilityWindow`]s: open periods on a given day of
//! the week (split shifts are several windows on the same day). The
//! [`WindowRegistry`] keeps them per owner and answers the three questions
//! the scheduling engine asks:
//!
//! - which active windows exist on a day ([`WindowRegistry::windows_for_day`])
//! - how many hours are open on a day ([`WindowRegistry::total_available_hours`])
//! - whether an instant falls inside an open window
//!   ([`WindowRegistry::is_within_window`])
//!
//! Overlapping windows are legal and not merged.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Datelike, NaiveTime, TimeZone, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ValidationError;
use crate::ids::{OwnerId, WindowId};

/// Day of the week, 0 = Sunday through 6 = Saturday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct DayOfWeek(u8);

impl DayOfWeek {
    pub const SUNDAY: Self = Self(0);
    pub const MONDAY: Self = Self(1);
    pub const TUESDAY: Self = Self(2);
    pub const WEDNESDAY: Self = Self(3);
    pub const THURSDAY: Self = Self(4);
    pub const FRIDAY: Self = Self(5);
    pub const SATURDAY: Self = Self(6);

    /// Creates a day of week from its number.
    ///
    /// # Errors
    ///
    /// Returns `InvalidDayOfWeek` when `day > 6`.
    pub fn new(day: u8) -> Result<Self, ValidationError> {
        if day > 6 {
            return Err(ValidationError::InvalidDayOfWeek(day));
        }
        Ok(Self(day))
    }

    /// Returns the day number (0 = Sunday).
    pub fn number(&self) -> u8 {
        self.0
    }

    /// Returns the English day name.
    pub fn name(&self) -> &'static str {
        match self.0 {
            0 => "Sunday",
            1 => "Monday",
            2 => "Tuesday",
            3 => "Wednesday",
            4 => "Thursday",
            5 => "Friday",
            _ => "Saturday",
        }
    }

    /// Returns `true` for Monday through Friday.
    pub fn is_weekday(&self) -> bool {
        (1..=5).contains(&self.0)
    }

    /// Returns `true` for Saturday and Sunday.
    pub fn is_weekend(&self) -> bool {
        !self.is_weekday()
    }
}

impl From<Weekday> for DayOfWeek {
    fn from(weekday: Weekday) -> Self {
        // num_days_from_sunday is always in 0..=6
        Self(weekday.num_days_from_sunday() as u8)
    }
}

impl TryFrom<u8> for DayOfWeek {
    type Error = ValidationError;

    fn try_from(day: u8) -> Result<Self, Self::Error> {
        Self::new(day)
    }
}

impl From<DayOfWeek> for u8 {
    fn from(day: DayOfWeek) -> Self {
        day.0
    }
}

impl fmt::Display for DayOfWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A recurring weekly open period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityWindow {
    pub id: WindowId,
    pub owner: OwnerId,
    pub day_of_week: DayOfWeek,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl AvailabilityWindow {
    /// Returns the window length in fractional hours.
    pub fn duration_hours(&self) -> f64 {
        (self.end_time - self.start_time).num_seconds() as f64 / 3600.0
    }

    /// Checks whether a time of day falls inside the window.
    ///
    /// Both bounds are inclusive and the comparison is done at second
    /// precision.
    pub fn includes_time(&self, time: NaiveTime) -> bool {
        let time = time.with_nanosecond(0).unwrap_or(time);
        self.start_time <= time && time <= self.end_time
    }

    /// Returns the name of the window's day.
    pub fn day_name(&self) -> &'static str {
        self.day_of_week.name()
    }

    /// Formats the window as `HH:MM - HH:MM`.
    pub fn formatted_range(&self) -> String {
        format!(
            "{} - {}",
            self.start_time.format("%H:%M"),
            self.end_time.format("%H:%M")
        )
    }
}

/// Input for a new availability window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowDraft {
    pub day_of_week: u8,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_active() -> bool {
    true
}

impl WindowDraft {
    /// Creates an active window draft.
    pub fn new(day_of_week: u8, start_time: NaiveTime, end_time: NaiveTime) -> Self {
        Self {
            day_of_week,
            start_time,
            end_time,
            is_active: true,
            notes: None,
        }
    }

    /// Builder: set notes.
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Builder: set the active flag.
    pub fn with_active(mut self, is_active: bool) -> Self {
        self.is_active = is_active;
        self
    }
}

/// A partial update to a window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowPatch {
    pub day_of_week: Option<u8>,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub is_active: Option<bool>,
    pub notes: Option<String>,
}

fn check_window_range(start: NaiveTime, end: NaiveTime) -> Result<(), ValidationError> {
    if end <= start {
        return Err(ValidationError::InvalidWindowRange { start, end });
    }
    Ok(())
}

/// Availability windows for every owner.
#[derive(Debug, Default, Clone)]
pub struct WindowRegistry {
    windows: HashMap<OwnerId, Vec<AvailabilityWindow>>,
}

impl WindowRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and stores a new window for `owner`.
    ///
    /// # Errors
    ///
    /// `InvalidDayOfWeek` or `InvalidWindowRange`.
    pub fn add(
        &mut self,
        owner: OwnerId,
        draft: WindowDraft,
    ) -> Result<AvailabilityWindow, ValidationError> {
        let day_of_week = DayOfWeek::new(draft.day_of_week)?;
        check_window_range(draft.start_time, draft.end_time)?;

        let window = AvailabilityWindow {
            id: WindowId::new(),
            owner,
            day_of_week,
            start_time: draft.start_time,
            end_time: draft.end_time,
            is_active: draft.is_active,
            notes: draft.notes,
        };
        debug!(owner = %owner, window = %window.id, day = %day_of_week, "Added availability window");
        self.windows.entry(owner).or_default().push(window.clone());
        Ok(window)
    }

    /// Applies a patch to an existing window.
    ///
    /// Returns `Ok(None)` when the window does not exist.
    ///
    /// # Errors
    ///
    /// `InvalidDayOfWeek` or `InvalidWindowRange`; the stored window is left
    /// untouched on error.
    pub fn update(
        &mut self,
        id: WindowId,
        patch: WindowPatch,
    ) -> Result<Option<AvailabilityWindow>, ValidationError> {
        let Some(window) = self.find_mut(id) else {
            return Ok(None);
        };

        let mut next = window.clone();
        if let Some(day) = patch.day_of_week {
            next.day_of_week = DayOfWeek::new(day)?;
        }
        if let Some(start) = patch.start_time {
            next.start_time = start;
        }
        if let Some(end) = patch.end_time {
            next.end_time = end;
        }
        if let Some(active) = patch.is_active {
            next.is_active = active;
        }
        if let Some(notes) = patch.notes {
            next.notes = Some(notes);
        }
        check_window_range(next.start_time, next.end_time)?;

        *window = next.clone();
        Ok(Some(next))
    }

    /// Activates or deactivates a window. Returns `false` if it doesn't exist.
    pub fn set_active(&mut self, id: WindowId, is_active: bool) -> bool {
        match self.find_mut(id) {
            Some(window) => {
                window.is_active = is_active;
                true
            }
            None => false,
        }
    }

    /// Removes a window.
    pub fn remove(&mut self, id: WindowId) -> Option<AvailabilityWindow> {
        for windows in self.windows.values_mut() {
            if let Some(pos) = windows.iter().position(|w| w.id == id) {
                return Some(windows.remove(pos));
            }
        }
        None
    }

    /// Removes every window of an owner, returning how many were removed.
    pub fn remove_owner(&mut self, owner: OwnerId) -> usize {
        self.windows.remove(&owner).map_or(0, |w| w.len())
    }

    /// Looks up a window by id.
    pub fn get(&self, id: WindowId) -> Option<&AvailabilityWindow> {
        self.windows.values().flatten().find(|w| w.id == id)
    }

    /// Returns every window of an owner (active or not), ordered by day then
    /// start time.
    pub fn windows_for_owner(&self, owner: OwnerId) -> Vec<AvailabilityWindow> {
        let mut windows = self.windows.get(&owner).cloned().unwrap_or_default();
        windows.sort_by_key(|w| (w.day_of_week, w.start_time));
        windows
    }

    /// Returns the active windows for a day, ordered by start time.
    pub fn windows_for_day(&self, owner: OwnerId, day: DayOfWeek) -> Vec<AvailabilityWindow> {
        let mut windows: Vec<_> = self
            .windows
            .get(&owner)
            .into_iter()
            .flatten()
            .filter(|w| w.is_active && w.day_of_week == day)
            .cloned()
            .collect();
        windows.sort_by_key(|w| w.start_time);
        windows
    }

    /// Returns the sum of active window lengths for a day, in hours.
    pub fn total_available_hours(&self, owner: OwnerId, day: DayOfWeek) -> f64 {
        self.windows_for_day(owner, day)
            .iter()
            .map(AvailabilityWindow::duration_hours)
            .sum()
    }

    /// Checks whether `instant`, seen in `tz`, falls inside an active window
    /// of its local weekday.
    pub fn is_within_window<Tz: TimeZone>(
        &self,
        owner: OwnerId,
        instant: DateTime<Utc>,
        tz: &Tz,
    ) -> bool {
        let local = instant.with_timezone(tz);
        let day = DayOfWeek::from(local.weekday());
        let time = local.time();
        self.windows_for_day(owner, day)
            .iter()
            .any(|w| w.includes_time(time))
    }

    fn find_mut(&mut self, id: WindowId) -> Option<&mut AvailabilityWindow> {
        self.windows.values_mut().flatten().find(|w| w.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    // 2025-03-10 is a Monday
    fn monday(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, h, m, s).unwrap()
    }

    fn split_shift() -> (WindowRegistry, OwnerId) {
        let owner = OwnerId::new();
        let mut registry = WindowRegistry::new();
        registry
            .add(owner, WindowDraft::new(1, t(14, 0), t(17, 30)))
            .unwrap();
        registry
            .add(owner, WindowDraft::new(1, t(9, 0), t(12, 0)))
            .unwrap();
        registry
            .add(owner, WindowDraft::new(1, t(18, 0), t(20, 0)).with_active(false))
            .unwrap();
        (registry, owner)
    }

    #[test]
    fn day_of_week_bounds() {
        assert!(DayOfWeek::new(6).is_ok());
        assert_eq!(
            DayOfWeek::new(7),
            Err(ValidationError::InvalidDayOfWeek(7))
        );
        assert_eq!(DayOfWeek::from(Weekday::Sun), DayOfWeek::SUNDAY);
        assert_eq!(DayOfWeek::from(Weekday::Sat).number(), 6);
        assert!(DayOfWeek::WEDNESDAY.is_weekday());
        assert!(DayOfWeek::SUNDAY.is_weekend());
        assert_eq!(DayOfWeek::MONDAY.to_string(), "Monday");
    }

    #[test]
    fn add_rejects_invalid_windows() {
        let mut registry = WindowRegistry::new();
        let owner = OwnerId::new();

        assert_eq!(
            registry.add(owner, WindowDraft::new(9, t(9, 0), t(10, 0))),
            Err(ValidationError::InvalidDayOfWeek(9))
        );
        assert!(matches!(
            registry.add(owner, WindowDraft::new(1, t(10, 0), t(10, 0))),
            Err(ValidationError::InvalidWindowRange { .. })
        ));
        assert!(registry.windows_for_owner(owner).is_empty());
    }

    #[test]
    fn windows_for_day_active_and_ordered() {
        let (registry, owner) = split_shift();
        let windows = registry.windows_for_day(owner, DayOfWeek::MONDAY);
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].start_time, t(9, 0));
        assert_eq!(windows[1].start_time, t(14, 0));
        assert!(registry.windows_for_day(owner, DayOfWeek::TUESDAY).is_empty());
    }

    #[test]
    fn total_hours_sums_active_windows() {
        let (registry, owner) = split_shift();
        assert_eq!(registry.total_available_hours(owner, DayOfWeek::MONDAY), 6.5);
        assert_eq!(registry.total_available_hours(owner, DayOfWeek::FRIDAY), 0.0);
        assert_eq!(
            registry.total_available_hours(OwnerId::new(), DayOfWeek::MONDAY),
            0.0
        );
    }

    #[test]
    fn within_window_is_inclusive_on_both_ends() {
        let (registry, owner) = split_shift();

        assert!(registry.is_within_window(owner, monday(9, 0, 0), &Utc));
        assert!(registry.is_within_window(owner, monday(12, 0, 0), &Utc));
        assert!(registry.is_within_window(owner, monday(15, 45, 0), &Utc));
        assert!(!registry.is_within_window(owner, monday(12, 0, 1), &Utc));
        assert!(!registry.is_within_window(owner, monday(13, 0, 0), &Utc));
        // Inactive window
        assert!(!registry.is_within_window(owner, monday(19, 0, 0), &Utc));
        // Tuesday
        assert!(
            !registry.is_within_window(owner, Utc.with_ymd_and_hms(2025, 3, 11, 10, 0, 0).unwrap(), &Utc)
        );
    }

    #[test]
    fn within_window_uses_local_time() {
        let (registry, owner) = split_shift();
        let bogota = chrono_tz::America::Bogota;
        // 14:00 UTC is 09:00 in Bogota
        assert!(registry.is_within_window(owner, monday(14, 0, 0), &bogota));
        // 02:00 UTC on Tuesday is 21:00 Monday in Bogota: outside any window
        let late = Utc.with_ymd_and_hms(2025, 3, 11, 2, 0, 0).unwrap();
        assert!(!registry.is_within_window(owner, late, &bogota));
    }

    #[test]
    fn update_and_remove() {
        let (mut registry, owner) = split_shift();
        let id = registry.windows_for_day(owner, DayOfWeek::MONDAY)[0].id;

        let updated = registry
            .update(
                id,
                WindowPatch {
                    end_time: Some(t(13, 0)),
                    notes: Some("longer morning".into()),
                    ..Default::default()
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(updated.end_time, t(13, 0));
        assert_eq!(registry.total_available_hours(owner, DayOfWeek::MONDAY), 7.5);

        // Invalid patch leaves the window as it was
        let err = registry.update(
            id,
            WindowPatch {
                start_time: Some(t(14, 0)),
                ..Default::default()
            },
        );
        assert!(err.is_err());
        assert_eq!(registry.get(id).unwrap().start_time, t(9, 0));

        assert!(registry.set_active(id, false));
        assert_eq!(registry.total_available_hours(owner, DayOfWeek::MONDAY), 3.5);

        assert!(registry.remove(id).is_some());
        assert!(registry.get(id).is_none());
        assert_eq!(registry.update(id, WindowPatch::default()), Ok(None));
        assert_eq!(registry.remove_owner(owner), 2);
    }

    #[test]
    fn window_formatting() {
        let (registry, owner) = split_shift();
        let w = &registry.windows_for_day(owner, DayOfWeek::MONDAY)[1];
        assert_eq!(w.formatted_range(), "14:00 - 17:30");
        assert_eq!(w.day_name(), "Monday");
        assert_eq!(w.duration_hours(), 3.5);
    }

    #[test]
    fn window_serializes_day_as_number() {
        let (registry, owner) = split_shift();
        let w = &registry.windows_for_day(owner, DayOfWeek::MONDAY)[0];
        let json = serde_json::to_value(w).unwrap();
        assert_eq!(json["day_of_week"], 1);
        assert_eq!(json["start_time"], "09:00:00");
        assert_eq!(json["is_active"], true);
        assert!(json.get("notes").is_none());
    }
}
