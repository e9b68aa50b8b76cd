//! Deterministic identities for armed timers and raised alerts.
//!
//! Timer identity is stable per medicine: a [`TimerKey`] is derived from the
//! medicine ID and a [`TimerSlot`] only, never from the fire instant. There
//! is at most one armed timer per (medicine, slot), re-arming overwrites it,
//! and `cancel(medicine_id)` can recompute every key without knowing which
//! occurrence is pending. The snooze slot is separate from the recurring
//! slot so a snooze never displaces the weekly chain.
//!
//! Alert identity is per occurrence: an [`AlertKey`] hashes the medicine ID
//! together with the fire instant so that a missed alert and the next one
//! never share a notification.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::schedule::MedicineId;

/// Which timer of a medication a key addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerSlot {
    /// The weekly recurrence chain.
    Recurring,
    /// A one-shot snooze re-fire.
    Snooze,
}

impl TimerSlot {
    pub const ALL: [TimerSlot; 2] = [TimerSlot::Recurring, TimerSlot::Snooze];

    fn tag(self) -> &'static str {
        match self {
            TimerSlot::Recurring => "recurring",
            TimerSlot::Snooze => "snooze",
        }
    }
}

/// Identity of an armed timer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerKey {
    pub medicine_id: MedicineId,
    pub slot: TimerSlot,
}

impl TimerKey {
    pub fn recurring(medicine_id: &MedicineId) -> Self {
        Self {
            medicine_id: medicine_id.clone(),
            slot: TimerSlot::Recurring,
        }
    }

    pub fn snooze(medicine_id: &MedicineId) -> Self {
        Self {
            medicine_id: medicine_id.clone(),
            slot: TimerSlot::Snooze,
        }
    }

    /// Every key that may be armed for a medicine. Cancelling all of them
    /// removes the chain and any snooze in flight.
    pub fn cancellation_keys(medicine_id: &MedicineId) -> [TimerKey; 2] {
        TimerSlot::ALL.map(|slot| TimerKey {
            medicine_id: medicine_id.clone(),
            slot,
        })
    }

    /// Opaque hex token, stable across processes and releases.
    pub fn token(&self) -> String {
        hex::encode(&self.digest()[..16])
    }

    /// 32-bit request code for platforms whose timer API keys on integers.
    pub fn request_code(&self) -> i32 {
        request_code(&self.digest())
    }

    fn digest(&self) -> [u8; 32] {
        digest(&[
            b"timer".as_slice(),
            self.medicine_id.as_str().as_bytes(),
            self.slot.tag().as_bytes(),
        ])
    }
}

impl fmt::Display for TimerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.medicine_id, self.slot.tag())
    }
}

/// Identity of a user-visible alert (notification dedup key).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertKey(String);

impl AlertKey {
    pub fn new(medicine_id: &MedicineId, fire_at: DateTime<Utc>) -> Self {
        let millis = fire_at.timestamp_millis().to_string();
        let digest = digest(&[b"alert".as_slice(), medicine_id.as_str().as_bytes(), millis.as_bytes()]);
        Self(hex::encode(&digest[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 32-bit notification ID for platforms that key notifications on integers.
    pub fn notification_id(&self) -> i32 {
        self.0
            .get(..8)
            .and_then(|prefix| u32::from_str_radix(prefix, 16).ok())
            .map(|v| v as i32)
            .unwrap_or(0)
    }
}

impl fmt::Display for AlertKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hash length-prefixed parts so that ("ab", "c") and ("a", "bc") differ.
fn digest(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part);
    }
    hasher.finalize().into()
}

fn request_code(digest: &[u8; 32]) -> i32 {
    i32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}
