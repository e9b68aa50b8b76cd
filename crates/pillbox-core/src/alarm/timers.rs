//! In-process exact-timer service.
//!
//! Keeps armed timers in memory with overwrite-per-key semantics. The host
//! polls [`InMemoryTimerService::take_due`] and feeds the returned events to
//! the firing handler. Exact delivery can be switched off to reproduce a
//! platform that denies exact alarms; inexact timers are delivered up to a
//! configurable slack after their fire instant.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};

use super::identity::TimerKey;
use super::service::{DeliveryMode, ExactTimerService, FireEvent, TimerRequest};
use crate::error::TimerError;

#[derive(Debug)]
pub struct InMemoryTimerService {
    armed: Mutex<HashMap<TimerKey, TimerRequest>>,
    exact_permitted: AtomicBool,
    inexact_slack: Duration,
}

impl Default for InMemoryTimerService {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTimerService {
    pub fn new() -> Self {
        Self {
            armed: Mutex::new(HashMap::new()),
            exact_permitted: AtomicBool::new(true),
            inexact_slack: Duration::zero(),
        }
    }

    /// Deliver inexact timers this long after their fire instant.
    pub fn with_inexact_slack(mut self, slack: Duration) -> Self {
        self.inexact_slack = slack;
        self
    }

    /// Allow or deny exact arming.
    pub fn set_exact_permitted(&self, permitted: bool) {
        self.exact_permitted.store(permitted, Ordering::SeqCst);
    }

    pub fn armed(&self, key: &TimerKey) -> Option<TimerRequest> {
        self.lock().get(key).cloned()
    }

    pub fn armed_count(&self) -> usize {
        self.lock().len()
    }

    /// Every armed timer, earliest delivery first.
    pub fn snapshot(&self) -> Vec<TimerRequest> {
        let mut all: Vec<TimerRequest> = self.lock().values().cloned().collect();
        all.sort_by_key(|r| self.delivery_time(r));
        all
    }

    /// Earliest instant at which some timer becomes due.
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.lock().values().map(|r| self.delivery_time(r)).min()
    }

    /// Remove and return every timer due at `now`, earliest first.
    pub fn take_due(&self, now: DateTime<Utc>) -> Vec<FireEvent> {
        let mut armed = self.lock();
        let due_keys: Vec<TimerKey> = armed
            .values()
            .filter(|r| self.delivery_time(r) <= now)
            .map(|r| r.key.clone())
            .collect();

        let mut due: Vec<TimerRequest> = due_keys
            .iter()
            .filter_map(|key| armed.remove(key))
            .collect();
        due.sort_by_key(|r| self.delivery_time(r));
        due.into_iter().map(|r| r.event).collect()
    }

    fn delivery_time(&self, request: &TimerRequest) -> DateTime<Utc> {
        match request.mode {
            DeliveryMode::Exact => request.fire_at,
            DeliveryMode::Inexact => request.fire_at + self.inexact_slack,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TimerKey, TimerRequest>> {
        self.armed.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ExactTimerService for InMemoryTimerService {
    fn arm(&self, request: &TimerRequest) -> Result<(), TimerError> {
        if request.mode == DeliveryMode::Exact && !self.exact_permitted.load(Ordering::SeqCst) {
            return Err(TimerError::Denied {
                reason: "exact alarms not permitted".into(),
            });
        }
        self.lock().insert(request.key.clone(), request.clone());
        Ok(())
    }

    fn cancel(&self, key: &TimerKey) -> Result<(), TimerError> {
        self.lock().remove(key);
        Ok(())
    }
}
