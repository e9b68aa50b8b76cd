//! Alarm scheduler state machine.
//!
//! Each medication has one chain of occurrences:
//!
//! ```text
//! Unscheduled -> Armed -> Fired -> (Armed | Unscheduled)
//!      ^                                     |
//!      +------------- cancel (any state) ----+
//! ```
//!
//! All transitions for one medication run under that medication's mutex, so
//! a `cancel` racing an in-flight `on_fire` either happens before it (the
//! fire is then stale and ignored) or after it (the freshly armed timer is
//! cancelled). Different medications never contend beyond the short
//! registry lookup.
//!
//! Timers are keyed by [`TimerKey`], which depends only on the medicine ID
//! and slot, so arming overwrites and cancelling needs nothing but the ID.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Local, TimeZone, Utc};
use serde::Serialize;

use super::identity::{AlertKey, TimerKey, TimerSlot};
use super::occurrence::OccurrenceCalculator;
use super::service::{Clock, DeliveryMode, ExactTimerService, FireEvent, TimerRequest};
use crate::error::{CoreError, Result, TimerError};
use crate::schedule::{MedicineId, Schedule};

/// Scheduler tuning.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Offset of a snoozed re-fire from the moment snooze was requested.
    pub snooze: Duration,
    /// Ask the platform to deliver even in low-power idle.
    pub allow_while_idle: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            snooze: Duration::minutes(5),
            allow_while_idle: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainState {
    Unscheduled,
    Armed,
    Fired,
}

/// Result of [`AlarmScheduler::schedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ScheduleOutcome {
    #[serde(rename_all = "camelCase")]
    Armed {
        fire_at: DateTime<Utc>,
        mode: DeliveryMode,
    },
    /// No occurrence left before the end date; nothing was armed.
    Exhausted,
}

/// The occurrence being alerted, handed to the alert callback of
/// [`AlarmScheduler::on_fire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiredOccurrence {
    pub medicine_id: MedicineId,
    pub slot: TimerSlot,
    pub scheduled_for: DateTime<Utc>,
    pub fired_at: DateTime<Utc>,
    pub alert_key: AlertKey,
    pub payload: String,
}

/// Result of [`AlarmScheduler::on_fire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FireOutcome {
    Delivered {
        alert_key: AlertKey,
        /// Next regular occurrence still armed after this fire, if any.
        next: Option<DateTime<Utc>>,
    },
    /// The fire does not match any tracked timer (cancelled or superseded).
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnoozeOutcome {
    pub fire_at: DateTime<Utc>,
    pub mode: DeliveryMode,
}

/// Point-in-time view of one medication's chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainStatus {
    pub medicine_id: MedicineId,
    pub state: ChainState,
    pub next_fire: Option<DateTime<Utc>>,
    pub delivery: Option<DeliveryMode>,
    pub snooze_at: Option<DateTime<Utc>>,
    pub last_fired: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    fire_at: DateTime<Utc>,
    mode: DeliveryMode,
}

#[derive(Debug)]
struct Chain {
    /// `None` once cancelled.
    schedule: Option<Schedule>,
    state: ChainState,
    recurring: Option<Pending>,
    snooze: Option<Pending>,
    last_fired: Option<DateTime<Utc>>,
    /// Set once the chain has been dropped from the registry. Anyone still
    /// holding it must look the medication up again.
    retired: bool,
}

impl Chain {
    fn new() -> Self {
        Self {
            schedule: None,
            state: ChainState::Unscheduled,
            recurring: None,
            snooze: None,
            last_fired: None,
            retired: false,
        }
    }

    fn pending(&self, slot: TimerSlot) -> Option<Pending> {
        match slot {
            TimerSlot::Recurring => self.recurring,
            TimerSlot::Snooze => self.snooze,
        }
    }

    fn clear_pending(&mut self, slot: TimerSlot) {
        match slot {
            TimerSlot::Recurring => self.recurring = None,
            TimerSlot::Snooze => self.snooze = None,
        }
    }

    /// Armed while any timer is outstanding.
    fn settle(&mut self) {
        self.state = if self.recurring.is_some() || self.snooze.is_some() {
            ChainState::Armed
        } else {
            ChainState::Unscheduled
        };
    }

    fn status(&self, medicine_id: &MedicineId) -> ChainStatus {
        ChainStatus {
            medicine_id: medicine_id.clone(),
            state: self.state,
            next_fire: self.recurring.map(|p| p.fire_at),
            delivery: self.recurring.map(|p| p.mode),
            snooze_at: self.snooze.map(|p| p.fire_at),
            last_fired: self.last_fired,
        }
    }
}

/// Owns the arm/re-arm/cancel protocol against an [`ExactTimerService`].
pub struct AlarmScheduler<Z: TimeZone = Local> {
    timers: Arc<dyn ExactTimerService>,
    clock: Arc<dyn Clock>,
    calculator: OccurrenceCalculator<Z>,
    config: SchedulerConfig,
    chains: Mutex<HashMap<MedicineId, Arc<Mutex<Chain>>>>,
}

impl<Z: TimeZone> AlarmScheduler<Z> {
    pub fn new(
        timers: Arc<dyn ExactTimerService>,
        clock: Arc<dyn Clock>,
        calculator: OccurrenceCalculator<Z>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            timers,
            clock,
            calculator,
            config,
            chains: Mutex::new(HashMap::new()),
        }
    }

    pub fn calculator(&self) -> &OccurrenceCalculator<Z> {
        &self.calculator
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Arm the first occurrence of `schedule`, replacing any chain already
    /// armed for the same medication.
    ///
    /// Calling this again with identical arguments only re-arms the same
    /// timer, so hosts may replay every active schedule after a reboot.
    pub fn schedule(&self, schedule: Schedule) -> Result<ScheduleOutcome> {
        schedule.validate()?;
        loop {
            let entry = self.chain(&schedule.medicine_id)?;
            let mut chain = lock(&entry, "chain")?;
            if chain.retired {
                continue;
            }
            return self.arm_chain(&mut chain, schedule);
        }
    }

    fn arm_chain(&self, chain: &mut Chain, schedule: Schedule) -> Result<ScheduleOutcome> {
        let medicine_id = schedule.medicine_id.clone();
        let now = self.clock.now();
        let outcome = match self.calculator.next(now, &schedule) {
            Some(fire_at) => {
                let mode = self.arm(TimerKey::recurring(&medicine_id), fire_at)?;
                chain.recurring = Some(Pending { fire_at, mode });
                tracing::info!(%medicine_id, %fire_at, ?mode, "Alarm scheduled");
                ScheduleOutcome::Armed { fire_at, mode }
            }
            None => {
                if chain.recurring.take().is_some() {
                    self.timers.cancel(&TimerKey::recurring(&medicine_id))?;
                }
                tracing::info!(%medicine_id, "Schedule exhausted; nothing armed");
                ScheduleOutcome::Exhausted
            }
        };

        chain.schedule = Some(schedule);
        chain.settle();
        Ok(outcome)
    }

    /// Re-arm every supplied chain, e.g. after boot or process restart.
    pub fn restore<I>(&self, schedules: I) -> Vec<(MedicineId, Result<ScheduleOutcome>)>
    where
        I: IntoIterator<Item = Schedule>,
    {
        schedules
            .into_iter()
            .map(|schedule| {
                let medicine_id = schedule.medicine_id.clone();
                let result = self.schedule(schedule);
                if let Err(e) = &result {
                    tracing::warn!(%medicine_id, error = %e, "Failed to restore alarm");
                }
                (medicine_id, result)
            })
            .collect()
    }

    /// Handle a delivered timer.
    ///
    /// Stale events (cancelled chain, superseded timer) are ignored without
    /// calling `alert`. Otherwise the chain moves to `Fired`, `alert` runs
    /// while the chain is still locked, and for the recurring slot the next
    /// occurrence is computed from the current time (not from the fired
    /// instant, unless delivery came early) and armed. A snooze fire leaves the weekly chain untouched.
    pub fn on_fire<F>(&self, event: &FireEvent, alert: F) -> Result<FireOutcome>
    where
        F: FnOnce(&FiredOccurrence) -> Result<()>,
    {
        let medicine_id = event.medicine_id();
        let Some(entry) = self.existing(medicine_id)? else {
            tracing::warn!(%medicine_id, key = %event.key, "Ignoring fire for untracked medication");
            return Ok(FireOutcome::Stale);
        };
        let mut chain = lock(&entry, "chain")?;

        let slot = event.key.slot;
        let matches = chain.pending(slot).map(|p| p.fire_at) == Some(event.scheduled_for);
        let schedule = match (&chain.schedule, matches) {
            (Some(schedule), true) => schedule.clone(),
            _ => {
                tracing::warn!(
                    %medicine_id,
                    key = %event.key,
                    scheduled_for = %event.scheduled_for,
                    "Ignoring stale fire"
                );
                return Ok(FireOutcome::Stale);
            }
        };

        let now = self.clock.now();
        chain.state = ChainState::Fired;
        chain.clear_pending(slot);
        chain.last_fired = Some(event.scheduled_for);

        let occurrence = FiredOccurrence {
            medicine_id: medicine_id.clone(),
            slot,
            scheduled_for: event.scheduled_for,
            fired_at: now,
            alert_key: AlertKey::new(medicine_id, event.scheduled_for),
            payload: schedule.payload.clone(),
        };
        tracing::info!(
            %medicine_id,
            ?slot,
            scheduled_for = %event.scheduled_for,
            late_by_secs = (now - event.scheduled_for).num_seconds(),
            "Alarm fired"
        );
        if let Err(e) = alert(&occurrence) {
            tracing::error!(%medicine_id, error = %e, "Alert presentation failed");
        }

        if slot == TimerSlot::Recurring {
            // An early delivery must not re-arm the slot that just fired.
            match self.calculator.next(now.max(event.scheduled_for), &schedule) {
                Some(fire_at) => {
                    let armed = self.arm(TimerKey::recurring(medicine_id), fire_at);
                    match armed {
                        Ok(mode) => {
                            chain.recurring = Some(Pending { fire_at, mode });
                            tracing::info!(%medicine_id, %fire_at, ?mode, "Next alarm armed");
                        }
                        Err(e) => {
                            chain.settle();
                            return Err(e);
                        }
                    }
                }
                None => {
                    tracing::info!(%medicine_id, "Schedule exhausted after fire");
                }
            }
        }

        chain.settle();
        Ok(FireOutcome::Delivered {
            alert_key: occurrence.alert_key,
            next: chain.recurring.map(|p| p.fire_at),
        })
    }

    /// Arm a one-shot re-fire `config.snooze` from now.
    ///
    /// The weekly chain is not consulted or advanced. Returns `None` when
    /// the medication has been cancelled or has never fired.
    pub fn snooze(&self, medicine_id: &MedicineId) -> Result<Option<SnoozeOutcome>> {
        let Some(entry) = self.existing(medicine_id)? else {
            tracing::warn!(%medicine_id, "Ignoring snooze for untracked medication");
            return Ok(None);
        };
        let mut chain = lock(&entry, "chain")?;
        if chain.schedule.is_none() || chain.last_fired.is_none() {
            tracing::warn!(%medicine_id, state = ?chain.state, "Ignoring snooze; nothing has fired");
            return Ok(None);
        }

        let fire_at = self.clock.now() + self.config.snooze;
        let mode = self.arm(TimerKey::snooze(medicine_id), fire_at)?;
        chain.snooze = Some(Pending { fire_at, mode });
        chain.settle();
        tracing::info!(%medicine_id, %fire_at, ?mode, "Alarm snoozed");
        Ok(Some(SnoozeOutcome { fire_at, mode }))
    }

    /// Cancel every timer of a medication and forget its schedule.
    ///
    /// Cancelling an unscheduled medication is a no-op. Timer keys are
    /// recomputed from the ID, so timers armed by an earlier process are
    /// removed as well. The chain is dropped from the registry.
    pub fn cancel(&self, medicine_id: &MedicineId) -> Result<()> {
        loop {
            let entry = {
                let chains = lock(&self.chains, "registry")?;
                match chains.get(medicine_id) {
                    Some(entry) => Arc::clone(entry),
                    None => {
                        // Registry stays locked so a concurrent schedule cannot arm in between.
                        tracing::debug!(%medicine_id, "Cancel on untracked medication");
                        return self.cancel_timers(medicine_id);
                    }
                }
            };
            let mut chain = lock(&entry, "chain")?;
            if chain.retired {
                continue;
            }

            let was = chain.state;
            chain.schedule = None;
            chain.recurring = None;
            chain.snooze = None;
            chain.state = ChainState::Unscheduled;
            let result = self.cancel_timers(medicine_id);

            chain.retired = true;
            self.forget(medicine_id, &entry)?;

            if was == ChainState::Unscheduled {
                tracing::debug!(%medicine_id, "Cancel on unscheduled medication");
            } else {
                tracing::info!(%medicine_id, "Alarm cancelled");
            }
            return result;
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn status(&self, medicine_id: &MedicineId) -> Result<ChainStatus> {
        match self.existing(medicine_id)? {
            Some(entry) => {
                let chain = lock(&entry, "chain")?;
                Ok(chain.status(medicine_id))
            }
            None => Ok(Chain::new().status(medicine_id)),
        }
    }

    /// Status of every chain that still has a schedule, ordered by ID.
    pub fn active(&self) -> Result<Vec<ChainStatus>> {
        let entries: Vec<(MedicineId, Arc<Mutex<Chain>>)> = lock(&self.chains, "registry")?
            .iter()
            .map(|(id, entry)| (id.clone(), Arc::clone(entry)))
            .collect();

        let mut statuses = Vec::new();
        for (id, entry) in entries {
            let chain = lock(&entry, "chain")?;
            if chain.schedule.is_some() {
                statuses.push(chain.status(&id));
            }
        }
        statuses.sort_by(|a, b| a.medicine_id.cmp(&b.medicine_id));
        Ok(statuses)
    }

    // ── Internal ─────────────────────────────────────────────────────

    /// Arm exactly, falling back to inexact delivery when the platform
    /// denies exact timers.
    fn arm(&self, key: TimerKey, fire_at: DateTime<Utc>) -> Result<DeliveryMode> {
        let mut request = TimerRequest {
            event: FireEvent {
                key: key.clone(),
                scheduled_for: fire_at,
            },
            key,
            fire_at,
            mode: DeliveryMode::Exact,
            allow_while_idle: self.config.allow_while_idle,
        };

        match self.timers.arm(&request) {
            Ok(()) => Ok(DeliveryMode::Exact),
            Err(TimerError::Denied { reason }) => {
                tracing::warn!(
                    key = %request.key,
                    %fire_at,
                    %reason,
                    "Exact timer denied; arming degraded inexact timer"
                );
                request.mode = DeliveryMode::Inexact;
                self.timers.arm(&request)?;
                Ok(DeliveryMode::Inexact)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn chain(&self, medicine_id: &MedicineId) -> Result<Arc<Mutex<Chain>>> {
        let mut chains = lock(&self.chains, "registry")?;
        let entry = chains
            .entry(medicine_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(Chain::new())));
        Ok(Arc::clone(entry))
    }

    /// Cancel both timer slots, reporting the first failure.
    fn cancel_timers(&self, medicine_id: &MedicineId) -> Result<()> {
        let mut first_error: Option<TimerError> = None;
        for key in TimerKey::cancellation_keys(medicine_id) {
            if let Err(e) = self.timers.cancel(&key) {
                tracing::warn!(%medicine_id, %key, error = %e, "Timer cancel failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Drop `entry` from the registry. Called with the chain locked.
    fn forget(&self, medicine_id: &MedicineId, entry: &Arc<Mutex<Chain>>) -> Result<()> {
        let mut chains = lock(&self.chains, "registry")?;
        if chains.get(medicine_id).is_some_and(|e| Arc::ptr_eq(e, entry)) {
            chains.remove(medicine_id);
        }
        Ok(())
    }

    fn existing(&self, medicine_id: &MedicineId) -> Result<Option<Arc<Mutex<Chain>>>> {
        Ok(lock(&self.chains, "registry")?.get(medicine_id).cloned())
    }
}

fn lock<'a, T>(mutex: &'a Mutex<T>, what: &'static str) -> Result<MutexGuard<'a, T>> {
    mutex.lock().map_err(|_| CoreError::LockPoisoned(what))
}
