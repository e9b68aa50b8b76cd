//! # Pillbox Core Library
//!
//! This library provides the recurring alarm scheduler behind the Pillbox
//! medication reminders. Platform primitives (exact wake-up timers, alert
//! playback, notifications) are consumed through traits so the same engine
//! runs under a mobile host, the `pillbox` CLI, or a test harness.
//!
//! ## Architecture
//!
//! - **Schedule**: weekly day-set plus local time of day, bounded by start
//!   and optional end dates
//! - **Alarm engine**: next-occurrence computation, stable timer identity,
//!   the arm/re-arm/cancel state machine and fire/stop/snooze handling
//! - **Storage**: TOML configuration and a JSON file of active schedules
//!   replayed on start-up
//!
//! ## Key Components
//!
//! - [`OccurrenceCalculator`]: next fire instant for a schedule
//! - [`AlarmScheduler`]: per-medication state machine
//! - [`FiringHandler`]: alert presentation and notification actions
//! - [`AlarmCommands`]: method-call surface for the UI layer
//! - [`Config`]: Application configuration management

pub mod alarm;
pub mod error;
pub mod schedule;
pub mod storage;

pub use alarm::{
    AlarmAction, AlarmCommands, AlarmScheduler, AlertConfig, AlertKey, DeliveryMode,
    ExactTimerService, FireEvent, FiringHandler, HandleOutcome, InMemoryTimerService,
    OccurrenceCalculator, ScheduleAlarmArgs, ScheduleOutcome, SchedulerConfig, TimerKey,
};
pub use error::{CommandError, ConfigError, CoreError, NotifyError, TimerError, ValidationError};
pub use schedule::{DaySet, MedicineId, Schedule, TimeOfDay};
pub use storage::{Config, ScheduleStore};
