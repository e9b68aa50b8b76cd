//! Medication schedule model.
//!
//! A [`Schedule`] is a weekly day-set plus a fixed local time of day,
//! bounded by a start instant and an optional end instant. It is owned by
//! the medication record and never mutated once a chain is armed; the
//! scheduler only reads it.

mod days;

pub use days::{parse_weekday, DaySet};

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Opaque, stable identifier of a medication entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MedicineId(String);

impl MedicineId {
    /// Wrap an identifier, rejecting blank strings.
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ValidationError::MissingField("medicineId".into()));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MedicineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for MedicineId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Local wall-clock time of day (hour and minute).
///
/// Serialized as `"HH:MM"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay {
    hour: u32,
    minute: u32,
}

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32) -> Result<Self, ValidationError> {
        if hour > 23 || minute > 59 {
            return Err(ValidationError::InvalidTimeOfDay { hour, minute });
        }
        Ok(Self { hour, minute })
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn minute(&self) -> u32 {
        self.minute
    }

    /// Seconds and sub-seconds are always zero.
    pub fn to_naive_time(self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour, self.minute, 0).unwrap_or(NaiveTime::MIN)
    }
}

impl FromStr for TimeOfDay {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidValue {
            field: "timeOfDay".into(),
            message: format!("expected HH:MM, got '{s}'"),
        };
        let (h, m) = s.trim().split_once(':').ok_or_else(invalid)?;
        let hour = h.parse::<u32>().map_err(|_| invalid())?;
        let minute = m.parse::<u32>().map_err(|_| invalid())?;
        Self::new(hour, minute)
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(t: TimeOfDay) -> Self {
        t.to_string()
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// Recurring medication schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub medicine_id: MedicineId,
    pub time_of_day: TimeOfDay,
    pub selected_days: DaySet,
    pub start_date: DateTime<Utc>,
    /// `None` means open-ended.
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    /// Display text forwarded to the alert, opaque to the scheduler.
    #[serde(default)]
    pub payload: String,
}

impl Schedule {
    /// Build and validate a schedule.
    pub fn new(
        medicine_id: MedicineId,
        time_of_day: TimeOfDay,
        selected_days: DaySet,
        start_date: DateTime<Utc>,
        end_date: Option<DateTime<Utc>>,
        payload: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let schedule = Self {
            medicine_id,
            time_of_day,
            selected_days,
            start_date,
            end_date,
            payload: payload.into(),
        };
        schedule.validate()?;
        Ok(schedule)
    }

    /// Check the schedule invariants.
    ///
    /// Deserialized schedules bypass [`Schedule::new`], so the scheduler
    /// validates again before arming.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.selected_days.is_empty() {
            return Err(ValidationError::EmptyDaySet);
        }
        if let Some(end) = self.end_date {
            if end < self.start_date {
                return Err(ValidationError::InvalidTimeRange {
                    start: self.start_date,
                    end,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap()
    }

    #[test]
    fn time_of_day_parses_and_formats() {
        let t: TimeOfDay = "8:05".parse().unwrap();
        assert_eq!(t.hour(), 8);
        assert_eq!(t.minute(), 5);
        assert_eq!(t.to_string(), "08:05");
        assert_eq!(t.to_naive_time(), NaiveTime::from_hms_opt(8, 5, 0).unwrap());
    }

    #[test]
    fn time_of_day_rejects_out_of_range() {
        assert_eq!(
            TimeOfDay::new(24, 0).unwrap_err(),
            ValidationError::InvalidTimeOfDay { hour: 24, minute: 0 }
        );
        assert!("12:60".parse::<TimeOfDay>().is_err());
        assert!("noon".parse::<TimeOfDay>().is_err());
    }

    #[test]
    fn blank_medicine_id_is_rejected() {
        assert!(MedicineId::new("  ").is_err());
        assert_eq!(MedicineId::new("med-1").unwrap().as_str(), "med-1");
    }

    #[test]
    fn empty_day_set_is_invalid() {
        let err = Schedule::new(
            MedicineId::new("med-1").unwrap(),
            TimeOfDay::new(8, 0).unwrap(),
            DaySet::empty(),
            start(),
            None,
            "",
        )
        .unwrap_err();
        assert_eq!(err, ValidationError::EmptyDaySet);
    }

    #[test]
    fn inverted_range_is_invalid() {
        let end = start() - chrono::Duration::days(1);
        let err = Schedule::new(
            MedicineId::new("med-1").unwrap(),
            TimeOfDay::new(8, 0).unwrap(),
            DaySet::every_day(),
            start(),
            Some(end),
            "",
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidTimeRange { .. }));
    }

    #[test]
    fn equal_start_and_end_is_valid() {
        let schedule = Schedule::new(
            MedicineId::new("med-1").unwrap(),
            TimeOfDay::new(8, 0).unwrap(),
            DaySet::every_day(),
            start(),
            Some(start()),
            "Aspirin",
        );
        assert!(schedule.is_ok());
    }

    #[test]
    fn json_uses_camel_case() {
        let schedule = Schedule::new(
            MedicineId::new("med-1").unwrap(),
            TimeOfDay::new(8, 0).unwrap(),
            "mon,wed".parse().unwrap(),
            start(),
            None,
            "Aspirin",
        )
        .unwrap();
        let json = serde_json::to_value(&schedule).unwrap();
        assert_eq!(json["medicineId"], "med-1");
        assert_eq!(json["timeOfDay"], "08:00");
        assert_eq!(json["selectedDays"], serde_json::json!(["Mon", "Wed"]));
        let back: Schedule = serde_json::from_value(json).unwrap();
        assert_eq!(back, schedule);
    }
}
