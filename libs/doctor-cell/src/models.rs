// libs/doctor-cell/src/models.rs
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveTime, Timelike, Utc, Weekday};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use shared_database::DatabaseError;

// ==============================================================================
// SLOT TIME
// ==============================================================================

/// A time of day on the half-hour grid, written as `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotTime(NaiveTime);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{0}' is not a half-hour time of day (expected HH:00 or HH:30)")]
pub struct InvalidSlotTime(pub String);

impl SlotTime {
    pub const STEP_MINUTES: i64 = 30;

    pub fn new(hour: u32, minute: u32) -> Result<Self, InvalidSlotTime> {
        NaiveTime::from_hms_opt(hour, minute, 0)
            .ok_or_else(|| InvalidSlotTime(format!("{:02}:{:02}", hour, minute)))
            .and_then(Self::from_naive)
    }

    pub fn from_naive(time: NaiveTime) -> Result<Self, InvalidSlotTime> {
        if time.second() != 0 || time.nanosecond() != 0 || time.minute() % 30 != 0 {
            return Err(InvalidSlotTime(time.format("%H:%M:%S").to_string()));
        }
        Ok(Self(time))
    }

    pub fn as_naive(&self) -> NaiveTime {
        self.0
    }

    /// The following grid point, or `None` past midnight.
    pub fn next(&self) -> Option<SlotTime> {
        let (next, wrapped) = self
            .0
            .overflowing_add_signed(Duration::minutes(Self::STEP_MINUTES));
        (wrapped == 0).then_some(SlotTime(next))
    }

    /// The preceding grid point, or `None` before midnight.
    pub fn prev(&self) -> Option<SlotTime> {
        let (prev, wrapped) = self
            .0
            .overflowing_sub_signed(Duration::minutes(Self::STEP_MINUTES));
        (wrapped == 0).then_some(SlotTime(prev))
    }
}

impl FromStr for SlotTime {
    type Err = InvalidSlotTime;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        NaiveTime::parse_from_str(trimmed, "%H:%M")
            .map_err(|_| InvalidSlotTime(trimmed.to_string()))
            .and_then(|time| Self::from_naive(time).map_err(|_| InvalidSlotTime(trimmed.to_string())))
    }
}

impl fmt::Display for SlotTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%H:%M"))
    }
}

impl Serialize for SlotTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SlotTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        // Postgres `time` columns come back as HH:MM:SS.
        let label = match raw.len() {
            8 if raw.ends_with(":00") => &raw[..5],
            _ => raw.as_str(),
        };
        label.parse().map_err(serde::de::Error::custom)
    }
}

// ==============================================================================
// AVAILABILITY PROTOCOL
// ==============================================================================

pub fn weekday_key(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

/// Opening hours for one weekday. The bookable window is `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaySchedule {
    pub start: SlotTime,
    pub end: SlotTime,
    pub is_available: bool,
}

impl DaySchedule {
    pub fn open(start: SlotTime, end: SlotTime) -> Self {
        Self { start, end, is_available: true }
    }

    pub fn closed(start: SlotTime, end: SlotTime) -> Self {
        Self { start, end, is_available: false }
    }

    /// Moves the start; an end left at or behind it is pulled one step past.
    /// A start of 23:30 has nothing after it and is clamped to 23:00.
    pub fn set_start(&mut self, start: SlotTime) {
        self.start = start;
        if self.end <= start {
            match start.next() {
                Some(end) => self.end = end,
                None => self.clamp_around(start),
            }
        }
    }

    /// Moves the end; a start left at or ahead of it is pulled one step back.
    /// An end of 00:00 has nothing before it and is clamped to 00:30.
    pub fn set_end(&mut self, end: SlotTime) {
        self.end = end;
        if self.start >= end {
            match end.prev() {
                Some(start) => self.start = start,
                None => self.clamp_around(end),
            }
        }
    }

    // Narrowest window touching `edge` that still fits in the day.
    fn clamp_around(&mut self, edge: SlotTime) {
        match (edge.prev(), edge.next()) {
            (Some(start), None) => (self.start, self.end) = (start, edge),
            (None, Some(end)) => (self.start, self.end) = (edge, end),
            _ => {}
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.is_available || self.start < self.end
    }
}

impl Default for DaySchedule {
    fn default() -> Self {
        Self::open(
            SlotTime(NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN)),
            SlotTime(NaiveTime::from_hms_opt(17, 30, 0).unwrap_or(NaiveTime::MIN)),
        )
    }
}

/// A full week of opening hours. Every weekday is always present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WeekSchedule {
    pub monday: DaySchedule,
    pub tuesday: DaySchedule,
    pub wednesday: DaySchedule,
    pub thursday: DaySchedule,
    pub friday: DaySchedule,
    pub saturday: DaySchedule,
    pub sunday: DaySchedule,
}

impl WeekSchedule {
    pub const DAYS: [Weekday; 7] = [
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
        Weekday::Sat,
        Weekday::Sun,
    ];

    pub fn day(&self, day: Weekday) -> &DaySchedule {
        match day {
            Weekday::Mon => &self.monday,
            Weekday::Tue => &self.tuesday,
            Weekday::Wed => &self.wednesday,
            Weekday::Thu => &self.thursday,
            Weekday::Fri => &self.friday,
            Weekday::Sat => &self.saturday,
            Weekday::Sun => &self.sunday,
        }
    }

    pub fn day_mut(&mut self, day: Weekday) -> &mut DaySchedule {
        match day {
            Weekday::Mon => &mut self.monday,
            Weekday::Tue => &mut self.tuesday,
            Weekday::Wed => &mut self.wednesday,
            Weekday::Thu => &mut self.thursday,
            Weekday::Fri => &mut self.friday,
            Weekday::Sat => &mut self.saturday,
            Weekday::Sun => &mut self.sunday,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Weekday, &DaySchedule)> + '_ {
        Self::DAYS.into_iter().map(move |day| (day, self.day(day)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityProtocol {
    pub doctor_id: Uuid,
    pub week: WeekSchedule,
    pub updated_at: Option<DateTime<Utc>>,
    /// Set when the doctor never saved a protocol and the default week is served.
    #[serde(default)]
    pub is_default: bool,
}

impl AvailabilityProtocol {
    pub fn default_for(doctor_id: Uuid) -> Self {
        Self {
            doctor_id,
            week: WeekSchedule::default(),
            updated_at: None,
            is_default: true,
        }
    }
}

/// One bookable point derived from a protocol. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub time: SlotTime,
    pub is_available: bool,
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetProtocolRequest {
    pub week: WeekSchedule,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EditDayRequest {
    pub start: Option<SlotTime>,
    pub end: Option<SlotTime>,
    pub is_available: Option<bool>,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AvailabilityError {
    #[error("Invalid schedule for {day}: {reason}")]
    Validation { day: String, reason: String },

    #[error(transparent)]
    InvalidTime(#[from] InvalidSlotTime),

    #[error("Storage error: {0}")]
    Store(#[from] DatabaseError),
}

impl AvailabilityError {
    pub fn invalid_day(day: Weekday, reason: impl Into<String>) -> Self {
        AvailabilityError::Validation {
            day: weekday_key(day).to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn t(label: &str) -> SlotTime {
        label.parse().unwrap()
    }

    #[test]
    fn test_slot_time_accepts_only_half_hours() {
        assert_eq!(t("09:30").to_string(), "09:30");
        assert!("09:15".parse::<SlotTime>().is_err());
        assert!("25:00".parse::<SlotTime>().is_err());
        assert!("nine".parse::<SlotTime>().is_err());
    }

    #[test]
    fn test_slot_time_next_stops_at_midnight() {
        assert_eq!(t("09:30").next(), Some(t("10:00")));
        assert_eq!(t("23:30").next(), None);
    }

    #[test]
    fn test_slot_time_reads_postgres_time_columns() {
        let parsed: SlotTime = serde_json::from_value(json!("14:30:00")).unwrap();
        assert_eq!(parsed, t("14:30"));
        assert_eq!(serde_json::to_value(parsed).unwrap(), json!("14:30"));
    }

    #[test]
    fn test_default_week_is_open_nine_to_half_five() {
        let week = WeekSchedule::default();
        for (_, day) in week.iter() {
            assert!(day.is_available);
            assert_eq!(day.start, t("09:00"));
            assert_eq!(day.end, t("17:30"));
        }
    }

    #[test]
    fn test_moving_start_past_end_pulls_end_along() {
        let mut day = DaySchedule::open(t("09:00"), t("12:00"));
        day.set_start(t("13:00"));
        assert_eq!((day.start, day.end), (t("13:00"), t("13:30")));
        assert!(day.is_valid());

        day.set_end(t("08:00"));
        assert_eq!((day.start, day.end), (t("07:30"), t("08:00")));
        assert!(day.is_valid());

        // Landing exactly on the other boundary still leaves a slot open.
        day.set_start(t("08:00"));
        assert_eq!((day.start, day.end), (t("08:00"), t("08:30")));
    }

    #[test]
    fn test_pull_along_clamps_at_the_ends_of_the_day() {
        let mut day = DaySchedule::open(t("09:00"), t("17:30"));
        day.set_start(t("23:30"));
        assert_eq!((day.start, day.end), (t("23:00"), t("23:30")));

        day.set_end(t("00:00"));
        assert_eq!((day.start, day.end), (t("00:00"), t("00:30")));
        assert!(day.is_valid());
    }

    #[test]
    fn test_week_json_uses_weekday_keys() {
        let value = serde_json::to_value(WeekSchedule::default()).unwrap();
        let keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys.len(), 7);
        assert!(value["sunday"]["is_available"].as_bool().unwrap());

        let mut partial = value.clone();
        partial.as_object_mut().unwrap().remove("friday");
        assert!(serde_json::from_value::<WeekSchedule>(partial).is_err());
    }
}
