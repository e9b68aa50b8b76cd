//! Reaction to delivered fire events and notification actions.
//!
//! The handler owns one [`ActiveAlert`] per playing alert, keyed by the
//! alert's [`AlertKey`], and remembers which medication owns each posted
//! notification until it is dismissed. Stop and snooze actions carry that
//! same key and are checked against the owner, so they only ever silence
//! and dismiss the alert they were attached to, even after it timed out.
//!
//! Lock order is chain, then alerts: the alert map is touched inside the
//! scheduler's fire callback, and it is always released before calling
//! back into the scheduler.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::identity::AlertKey;
use super::scheduler::{AlarmScheduler, FireOutcome, FiredOccurrence, SnoozeOutcome};
use super::service::{
    ActionButton, AlertHandle, AlertPresenter, AlertRequest, FireEvent, NotificationAction,
    NotificationRequest, NotificationSurface,
};
use crate::error::{CoreError, Result};
use crate::schedule::MedicineId;

/// Presentation settings for raised alerts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertConfig {
    pub channel_id: String,
    pub title: String,
    pub body: String,
    /// Shown when a schedule carries no payload of its own.
    pub default_payload: String,
    pub stop_label: String,
    pub snooze_label: String,
    pub timeout: Duration,
    /// Empty disables vibration.
    pub vibration_pattern_ms: Vec<u64>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            channel_id: "medicine_reminder".into(),
            title: "Medicine Reminder".into(),
            body: "It's time to take your medicine!".into(),
            default_payload: "Time to take your medicine!".into(),
            stop_label: "Stop".into(),
            snooze_label: "Snooze (5 min)".into(),
            timeout: Duration::from_secs(60),
            vibration_pattern_ms: vec![0, 500, 1000, 500],
        }
    }
}

/// Inbound event for the handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmAction {
    Fire {
        event: FireEvent,
    },
    #[serde(rename_all = "camelCase")]
    Stop {
        medicine_id: MedicineId,
        alert_key: AlertKey,
    },
    #[serde(rename_all = "camelCase")]
    Snooze {
        medicine_id: MedicineId,
        alert_key: AlertKey,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    Alerted {
        alert_key: AlertKey,
        next: Option<DateTime<Utc>>,
    },
    /// Fire event for a cancelled or superseded timer.
    Stale,
    Stopped {
        alert_key: AlertKey,
    },
    Snoozed {
        alert_key: AlertKey,
        /// `None` when the medication was cancelled in the meantime.
        snooze: Option<SnoozeOutcome>,
    },
    /// Action whose alert key belongs to another medication or is no
    /// longer posted.
    Ignored,
}

/// An alert that is currently playing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveAlert {
    pub alert_key: AlertKey,
    pub medicine_id: MedicineId,
    #[serde(skip)]
    pub handle: AlertHandle,
    pub payload: String,
    pub scheduled_for: DateTime<Utc>,
    pub raised_at: DateTime<Utc>,
}

#[derive(Default)]
struct AlertBook {
    playing: HashMap<AlertKey, ActiveAlert>,
    /// Owner of every notification still posted.
    posted: HashMap<AlertKey, MedicineId>,
}

pub struct FiringHandler<Z: TimeZone = Local> {
    scheduler: Arc<AlarmScheduler<Z>>,
    presenter: Arc<dyn AlertPresenter>,
    notifications: Arc<dyn NotificationSurface>,
    config: AlertConfig,
    alerts: Mutex<AlertBook>,
}

impl<Z: TimeZone> FiringHandler<Z> {
    pub fn new(
        scheduler: Arc<AlarmScheduler<Z>>,
        presenter: Arc<dyn AlertPresenter>,
        notifications: Arc<dyn NotificationSurface>,
        config: AlertConfig,
    ) -> Self {
        Self {
            scheduler,
            presenter,
            notifications,
            config,
            alerts: Mutex::new(AlertBook::default()),
        }
    }

    pub fn scheduler(&self) -> &Arc<AlarmScheduler<Z>> {
        &self.scheduler
    }

    pub fn handle(&self, action: AlarmAction) -> Result<HandleOutcome> {
        match action {
            AlarmAction::Fire { event } => self.fire(&event),
            AlarmAction::Stop {
                medicine_id,
                alert_key,
            } => self.stop(&medicine_id, &alert_key),
            AlarmAction::Snooze {
                medicine_id,
                alert_key,
            } => self.snooze(&medicine_id, &alert_key),
        }
    }

    /// Raise the alert and let the scheduler arm the next occurrence.
    pub fn fire(&self, event: &FireEvent) -> Result<HandleOutcome> {
        let outcome = self.scheduler.on_fire(event, |occurrence| self.raise(occurrence))?;
        Ok(match outcome {
            FireOutcome::Delivered { alert_key, next } => HandleOutcome::Alerted { alert_key, next },
            FireOutcome::Stale => HandleOutcome::Stale,
        })
    }

    /// Silence and dismiss one alert. The weekly chain is left armed.
    pub fn stop(&self, medicine_id: &MedicineId, alert_key: &AlertKey) -> Result<HandleOutcome> {
        if !self.dismiss(medicine_id, alert_key)? {
            return Ok(HandleOutcome::Ignored);
        }
        let status = self.scheduler.status(medicine_id)?;
        tracing::info!(
            %medicine_id,
            %alert_key,
            next_fire = ?status.next_fire,
            "Alarm stopped"
        );
        Ok(HandleOutcome::Stopped {
            alert_key: alert_key.clone(),
        })
    }

    /// Silence and dismiss one alert, then arm a snooze re-fire.
    pub fn snooze(&self, medicine_id: &MedicineId, alert_key: &AlertKey) -> Result<HandleOutcome> {
        if !self.dismiss(medicine_id, alert_key)? {
            return Ok(HandleOutcome::Ignored);
        }
        let snooze = self.scheduler.snooze(medicine_id)?;
        Ok(HandleOutcome::Snoozed {
            alert_key: alert_key.clone(),
            snooze,
        })
    }

    /// Silence alerts that have played past the configured timeout.
    /// Their notifications stay posted. Returns the silenced keys.
    pub fn silence_expired(&self) -> Result<Vec<AlertKey>> {
        let now = self.scheduler.now();
        let timeout = chrono::Duration::from_std(self.config.timeout).unwrap_or(chrono::Duration::MAX);
        let expired: Vec<ActiveAlert> = {
            let mut book = self.lock()?;
            let keys: Vec<AlertKey> = book
                .playing
                .values()
                .filter(|a| now - a.raised_at >= timeout)
                .map(|a| a.alert_key.clone())
                .collect();
            keys.iter().filter_map(|k| book.playing.remove(k)).collect()
        };

        for alert in &expired {
            self.presenter.silence(alert.handle);
            tracing::info!(
                medicine_id = %alert.medicine_id,
                alert_key = %alert.alert_key,
                "Alert timed out"
            );
        }
        Ok(expired.into_iter().map(|a| a.alert_key).collect())
    }

    /// Alerts currently playing, oldest first.
    pub fn active_alerts(&self) -> Result<Vec<ActiveAlert>> {
        let mut alerts: Vec<ActiveAlert> = self.lock()?.playing.values().cloned().collect();
        alerts.sort_by_key(|a| a.raised_at);
        Ok(alerts)
    }

    fn raise(&self, occurrence: &FiredOccurrence) -> Result<()> {
        let mut book = self.lock()?;
        if book.posted.contains_key(&occurrence.alert_key) {
            tracing::debug!(alert_key = %occurrence.alert_key, "Alert already active");
            return Ok(());
        }

        let payload = if occurrence.payload.trim().is_empty() {
            self.config.default_payload.clone()
        } else {
            occurrence.payload.clone()
        };
        let handle = self.presenter.present(&AlertRequest {
            alert_key: occurrence.alert_key.clone(),
            medicine_id: occurrence.medicine_id.clone(),
            payload: payload.clone(),
            timeout: self.config.timeout,
            vibration_pattern_ms: self.config.vibration_pattern_ms.clone(),
        });

        let notification = NotificationRequest {
            key: occurrence.alert_key.clone(),
            medicine_id: occurrence.medicine_id.clone(),
            channel_id: self.config.channel_id.clone(),
            title: self.config.title.clone(),
            body: self.config.body.clone(),
            actions: vec![
                ActionButton {
                    action: NotificationAction::Stop,
                    label: self.config.stop_label.clone(),
                },
                ActionButton {
                    action: NotificationAction::Snooze,
                    label: self.config.snooze_label.clone(),
                },
            ],
        };
        if let Err(e) = self.notifications.post(&notification) {
            tracing::warn!(
                medicine_id = %occurrence.medicine_id,
                alert_key = %occurrence.alert_key,
                error = %e,
                "Failed to post alarm notification"
            );
        }

        book.posted.insert(
            occurrence.alert_key.clone(),
            occurrence.medicine_id.clone(),
        );
        book.playing.insert(
            occurrence.alert_key.clone(),
            ActiveAlert {
                alert_key: occurrence.alert_key.clone(),
                medicine_id: occurrence.medicine_id.clone(),
                handle,
                payload,
                scheduled_for: occurrence.scheduled_for,
                raised_at: occurrence.fired_at,
            },
        );
        Ok(())
    }

    /// Returns `false` when `alert_key` is not posted or belongs to a
    /// different medication. Nothing is touched in that case.
    fn dismiss(&self, medicine_id: &MedicineId, alert_key: &AlertKey) -> Result<bool> {
        let removed = {
            let mut book = self.lock()?;
            match book.posted.get(alert_key) {
                None => {
                    tracing::debug!(%medicine_id, %alert_key, "Ignoring action for unknown alert");
                    return Ok(false);
                }
                Some(owner) if owner != medicine_id => {
                    tracing::warn!(
                        %medicine_id,
                        %alert_key,
                        %owner,
                        "Ignoring action for another medication's alert"
                    );
                    return Ok(false);
                }
                Some(_) => {}
            }
            book.posted.remove(alert_key);
            book.playing.remove(alert_key)
        };

        if let Some(alert) = removed {
            self.presenter.silence(alert.handle);
        }
        if let Err(e) = self.notifications.dismiss(alert_key) {
            tracing::warn!(%medicine_id, %alert_key, error = %e, "Failed to dismiss notification");
        }
        Ok(true)
    }

    fn lock(&self) -> Result<MutexGuard<'_, AlertBook>> {
        self.alerts
            .lock()
            .map_err(|_| CoreError::LockPoisoned("alerts"))
    }
}
