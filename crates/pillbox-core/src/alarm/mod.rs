//! Recurring alarm engine.
//!
//! - [`occurrence`]: next fire instant for a schedule
//! - [`identity`]: timer and alert keys
//! - [`scheduler`]: arm / re-arm / cancel state machine
//! - [`firing`]: fire, stop and snooze handling
//! - [`command`]: method-call surface for the UI layer

pub mod command;
pub mod firing;
pub mod identity;
pub mod occurrence;
pub mod scheduler;
pub mod service;
pub mod timers;

pub use command::{AlarmCommands, ScheduleAlarmArgs};
pub use firing::{ActiveAlert, AlarmAction, AlertConfig, FiringHandler, HandleOutcome};
pub use identity::{AlertKey, TimerKey, TimerSlot};
pub use occurrence::{OccurrenceCalculator, Upcoming};
pub use scheduler::{
    AlarmScheduler, ChainState, ChainStatus, FireOutcome, FiredOccurrence, ScheduleOutcome,
    SchedulerConfig, SnoozeOutcome,
};
pub use service::{
    ActionButton, AlertHandle, AlertPresenter, AlertRequest, Clock, DeliveryMode,
    ExactTimerService, FireEvent, ManualClock, NotificationAction, NotificationRequest,
    NotificationSurface, SystemClock, TimerRequest,
};
pub use timers::InMemoryTimerService;
