//! UI command surface.
//!
//! Mirrors a method-channel style API: each call takes a JSON argument map
//! and returns synchronously with a value or a coded [`CommandError`].
//!
//! | method          | arguments                                                   |
//! |-----------------|-------------------------------------------------------------|
//! | `scheduleAlarm` | `medicineId`, `timeOfDay` or `alarmTime`, `selectedDays`,   |
//! |                 | `startDate`, optional `endDate`, optional `payload`         |
//! | `cancelAlarm`   | `medicineId`                                                |
//!
//! Dates are epoch milliseconds. `alarmTime` is an epoch-millis instant whose
//! local wall-clock time becomes the schedule's time of day.

use std::sync::Arc;

use chrono::{DateTime, Local, TimeZone, Timelike, Utc};
use serde::Deserialize;
use serde_json::Value;

use super::scheduler::{AlarmScheduler, ScheduleOutcome};
use crate::error::{CommandError, ValidationError};
use crate::schedule::{parse_weekday, DaySet, MedicineId, Schedule, TimeOfDay};

const MISSING_PARAMETERS: &str = "Missing required parameters";
const MISSING_MEDICINE_ID: &str = "Medicine ID is null";

/// Raw `scheduleAlarm` arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleAlarmArgs {
    pub medicine_id: Option<String>,
    /// `"HH:MM"` in local time.
    pub time_of_day: Option<String>,
    /// Epoch millis; used when `time_of_day` is absent.
    pub alarm_time: Option<i64>,
    pub selected_days: Option<Vec<String>>,
    pub start_date: Option<i64>,
    pub end_date: Option<i64>,
    pub payload: Option<String>,
}

impl ScheduleAlarmArgs {
    /// Validate and convert, resolving `alarmTime` in `zone`.
    pub fn into_schedule<Z: TimeZone>(self, zone: &Z) -> Result<Schedule, CommandError> {
        let missing = || CommandError::InvalidArgument(MISSING_PARAMETERS.into());

        let medicine_id = MedicineId::new(self.medicine_id.ok_or_else(missing)?)?;
        let days = self.selected_days.ok_or_else(missing)?;
        let start_date = millis("startDate", self.start_date.ok_or_else(missing)?)?;
        let end_date = self.end_date.map(|ms| millis("endDate", ms)).transpose()?;

        let time_of_day = match (self.time_of_day, self.alarm_time) {
            (Some(text), _) => text.parse::<TimeOfDay>()?,
            (None, Some(ms)) => {
                let local = millis("alarmTime", ms)?.with_timezone(zone);
                TimeOfDay::new(local.hour(), local.minute())?
            }
            (None, None) => return Err(missing()),
        };

        let selected_days = days
            .iter()
            .map(|tag| parse_weekday(tag))
            .collect::<Result<DaySet, ValidationError>>()?;

        Ok(Schedule::new(
            medicine_id,
            time_of_day,
            selected_days,
            start_date,
            end_date,
            self.payload.unwrap_or_default(),
        )?)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CancelAlarmArgs {
    medicine_id: Option<String>,
}

fn millis(field: &str, ms: i64) -> Result<DateTime<Utc>, ValidationError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| ValidationError::InvalidValue {
            field: field.into(),
            message: format!("{ms} is not a valid epoch-millis instant"),
        })
}

/// Command front end over a shared [`AlarmScheduler`].
pub struct AlarmCommands<Z: TimeZone = Local> {
    scheduler: Arc<AlarmScheduler<Z>>,
}

impl<Z: TimeZone> AlarmCommands<Z> {
    pub fn new(scheduler: Arc<AlarmScheduler<Z>>) -> Self {
        Self { scheduler }
    }

    pub fn schedule_alarm(&self, args: ScheduleAlarmArgs) -> Result<ScheduleOutcome, CommandError> {
        let schedule = args.into_schedule(self.scheduler.calculator().zone())?;
        Ok(self.scheduler.schedule(schedule)?)
    }

    pub fn cancel_alarm(&self, medicine_id: Option<&str>) -> Result<(), CommandError> {
        let id = medicine_id.ok_or_else(|| CommandError::InvalidArgument(MISSING_MEDICINE_ID.into()))?;
        let id = MedicineId::new(id)
            .map_err(|_| CommandError::InvalidArgument(MISSING_MEDICINE_ID.into()))?;
        Ok(self.scheduler.cancel(&id)?)
    }

    /// Dispatch a method call by name.
    ///
    /// `null` arguments are treated as an empty map.
    pub fn invoke(&self, method: &str, args: Value) -> Result<Value, CommandError> {
        let args = if args.is_null() {
            Value::Object(Default::default())
        } else {
            args
        };

        match method {
            "scheduleAlarm" => {
                let args: ScheduleAlarmArgs = serde_json::from_value(args)
                    .map_err(|e| CommandError::InvalidArgument(e.to_string()))?;
                let outcome = self.schedule_alarm(args)?;
                serde_json::to_value(outcome).map_err(|e| CommandError::Scheduler(e.to_string()))
            }
            "cancelAlarm" => {
                let args: CancelAlarmArgs = serde_json::from_value(args)
                    .map_err(|e| CommandError::InvalidArgument(e.to_string()))?;
                self.cancel_alarm(args.medicine_id.as_deref())?;
                Ok(Value::Null)
            }
            other => {
                tracing::debug!(method = other, "Unknown method");
                Err(CommandError::NotImplemented(other.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::identity::TimerKey;
    use crate::alarm::occurrence::OccurrenceCalculator;
    use crate::alarm::scheduler::SchedulerConfig;
    use crate::alarm::service::ManualClock;
    use crate::alarm::timers::InMemoryTimerService;
    use serde_json::json;

    fn ms(y: i32, m: u32, d: u32, h: u32, min: u32) -> i64 {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0)
            .unwrap()
            .timestamp_millis()
    }

    fn setup() -> (Arc<InMemoryTimerService>, AlarmCommands<Utc>) {
        let timers = Arc::new(InMemoryTimerService::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap(),
        ));
        let scheduler = Arc::new(AlarmScheduler::new(
            timers.clone(),
            clock,
            OccurrenceCalculator::new(Utc),
            SchedulerConfig::default(),
        ));
        (timers, AlarmCommands::new(scheduler))
    }

    #[test]
    fn schedule_alarm_with_time_of_day() {
        let (timers, commands) = setup();
        let value = commands
            .invoke(
                "scheduleAlarm",
                json!({
                    "medicineId": "med-1",
                    "timeOfDay": "08:00",
                    "selectedDays": ["Mon", "Wednesday"],
                    "startDate": ms(2024, 1, 1, 0, 0),
                    "payload": "Aspirin"
                }),
            )
            .unwrap();
        assert_eq!(value["status"], "armed");
        assert_eq!(value["mode"], "exact");
        assert_eq!(timers.armed_count(), 1);
    }

    #[test]
    fn schedule_alarm_derives_time_from_alarm_time() {
        let (timers, commands) = setup();
        commands
            .invoke(
                "scheduleAlarm",
                json!({
                    "medicineId": "med-1",
                    "alarmTime": ms(2024, 3, 1, 20, 30),
                    "selectedDays": ["Fri"],
                    "startDate": ms(2024, 1, 1, 0, 0),
                    "endDate": ms(2024, 12, 31, 0, 0),
                    "payload": "Vitamin D"
                }),
            )
            .unwrap();
        let id = MedicineId::new("med-1").unwrap();
        let armed = timers.armed(&TimerKey::recurring(&id)).unwrap();
        assert_eq!(armed.fire_at, Utc.with_ymd_and_hms(2024, 3, 8, 20, 30, 0).unwrap());
    }

    #[test]
    fn missing_parameters_is_invalid_argument() {
        let (timers, commands) = setup();
        let err = commands
            .invoke("scheduleAlarm", json!({ "medicineId": "med-1" }))
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_ARGUMENT");
        assert_eq!(err.to_string(), "Missing required parameters");
        assert_eq!(timers.armed_count(), 0);
    }

    #[test]
    fn empty_days_and_inverted_range_are_rejected() {
        let (_, commands) = setup();
        let err = commands
            .invoke(
                "scheduleAlarm",
                json!({
                    "medicineId": "med-1",
                    "timeOfDay": "08:00",
                    "selectedDays": [],
                    "startDate": ms(2024, 1, 1, 0, 0)
                }),
            )
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_ARGUMENT");

        let err = commands
            .invoke(
                "scheduleAlarm",
                json!({
                    "medicineId": "med-1",
                    "timeOfDay": "08:00",
                    "selectedDays": ["Mon"],
                    "startDate": ms(2024, 2, 1, 0, 0),
                    "endDate": ms(2024, 1, 1, 0, 0)
                }),
            )
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_ARGUMENT");
    }

    #[test]
    fn unknown_weekday_is_rejected() {
        let (_, commands) = setup();
        let err = commands
            .invoke(
                "scheduleAlarm",
                json!({
                    "medicineId": "med-1",
                    "timeOfDay": "08:00",
                    "selectedDays": ["Funday"],
                    "startDate": ms(2024, 1, 1, 0, 0)
                }),
            )
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_ARGUMENT");
    }

    #[test]
    fn cancel_alarm_requires_medicine_id() {
        let (_, commands) = setup();
        let err = commands.invoke("cancelAlarm", Value::Null).unwrap_err();
        assert_eq!(err.code(), "INVALID_ARGUMENT");
        assert_eq!(err.to_string(), "Medicine ID is null");
    }

    #[test]
    fn cancel_alarm_clears_timer() {
        let (timers, commands) = setup();
        commands
            .invoke(
                "scheduleAlarm",
                json!({
                    "medicineId": "med-1",
                    "timeOfDay": "08:00",
                    "selectedDays": ["Mon"],
                    "startDate": ms(2024, 1, 1, 0, 0)
                }),
            )
            .unwrap();
        let value = commands
            .invoke("cancelAlarm", json!({ "medicineId": "med-1" }))
            .unwrap();
        assert!(value.is_null());
        assert_eq!(timers.armed_count(), 0);

        // Cancelling again is not an error.
        assert!(commands.cancel_alarm(Some("med-1")).is_ok());
    }

    #[test]
    fn unknown_method_is_not_implemented() {
        let (_, commands) = setup();
        let err = commands.invoke("snoozeAll", json!({})).unwrap_err();
        assert_eq!(err.code(), "NOT_IMPLEMENTED");
    }
}
