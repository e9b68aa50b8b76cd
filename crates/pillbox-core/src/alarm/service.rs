//! Collaborator interfaces consumed by the scheduler and firing handler.
//!
//! The platform primitives (exact wake-up timers, sound/vibration playback,
//! notification posting, wall clock) sit behind these traits. Hosts supply
//! the real implementations; tests and the CLI use in-process ones.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::identity::{AlertKey, TimerKey};
use crate::error::{NotifyError, TimerError};
use crate::schedule::MedicineId;

/// How precisely an armed timer will be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Fires at the requested instant, even in low-power idle.
    Exact,
    /// Best-effort delivery; the platform may batch or defer it.
    Inexact,
}

/// Payload the timer service hands back when a timer fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FireEvent {
    pub key: TimerKey,
    /// The instant the timer was armed for (not the delivery time).
    pub scheduled_for: DateTime<Utc>,
}

impl FireEvent {
    pub fn medicine_id(&self) -> &MedicineId {
        &self.key.medicine_id
    }
}

/// A request to arm (or overwrite) the timer at `key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerRequest {
    pub key: TimerKey,
    pub fire_at: DateTime<Utc>,
    pub mode: DeliveryMode,
    /// Deliver even while the device is in doze/idle.
    pub allow_while_idle: bool,
    pub event: FireEvent,
}

/// Platform exact-timer service.
///
/// Arming is overwrite-per-key: arming a key that is already armed replaces
/// the previous timer. Cancelling an unknown key succeeds.
pub trait ExactTimerService: Send + Sync {
    /// Arm a timer. Returns [`TimerError::Denied`] when the platform refuses
    /// exact delivery; the caller may retry with [`DeliveryMode::Inexact`].
    fn arm(&self, request: &TimerRequest) -> Result<(), TimerError>;

    fn cancel(&self, key: &TimerKey) -> Result<(), TimerError>;
}

/// What the alert presenter should play.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRequest {
    pub alert_key: AlertKey,
    pub medicine_id: MedicineId,
    pub payload: String,
    /// Stop looping after this long even if nobody silences the alert.
    pub timeout: Duration,
    /// Empty when vibration is disabled.
    pub vibration_pattern_ms: Vec<u64>,
}

/// Handle to an alert that is currently playing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlertHandle(pub u64);

/// Sound/vibration/full-screen alert playback.
pub trait AlertPresenter: Send + Sync {
    /// Start a looping alert. Must not block on user response.
    fn present(&self, request: &AlertRequest) -> AlertHandle;

    /// Stop an alert. Silencing an already silent handle is a no-op.
    fn silence(&self, handle: AlertHandle);
}

/// Action buttons attached to an alarm notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationAction {
    Stop,
    Snooze,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionButton {
    pub action: NotificationAction,
    pub label: String,
}

/// A notification to post, keyed by the alert's dedup key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRequest {
    pub key: AlertKey,
    pub medicine_id: MedicineId,
    pub channel_id: String,
    pub title: String,
    pub body: String,
    pub actions: Vec<ActionButton>,
}

/// User-visible notification surface.
pub trait NotificationSurface: Send + Sync {
    /// Post or replace the notification at `request.key`.
    fn post(&self, request: &NotificationRequest) -> Result<(), NotifyError>;

    fn dismiss(&self, key: &AlertKey) -> Result<(), NotifyError>;
}

/// Source of "now".
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Used for simulations and tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
