//! Terminal stand-ins for the platform alert and notification primitives.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use pillbox_core::alarm::{
    AlertHandle, AlertPresenter, AlertRequest, NotificationRequest, NotificationSurface,
};
use pillbox_core::{AlertKey, NotifyError};

/// Prints alerts to stdout. A handle is "playing" until silenced.
#[derive(Default)]
pub struct TerminalPresenter {
    next: AtomicU64,
    playing: Mutex<HashSet<AlertHandle>>,
}

impl AlertPresenter for TerminalPresenter {
    fn present(&self, request: &AlertRequest) -> AlertHandle {
        let handle = AlertHandle(self.next.fetch_add(1, Ordering::SeqCst));
        if let Ok(mut playing) = self.playing.lock() {
            playing.insert(handle);
        }
        println!(
            "ALARM {}: {} (alert {})",
            request.medicine_id, request.payload, request.alert_key
        );
        handle
    }

    fn silence(&self, handle: AlertHandle) {
        let was_playing = self
            .playing
            .lock()
            .map(|mut playing| playing.remove(&handle))
            .unwrap_or(false);
        if was_playing {
            println!("alert {} silenced", handle.0);
        }
    }
}

/// Logs notification traffic.
pub struct TerminalNotifications {
    pub channel_name: String,
}

impl NotificationSurface for TerminalNotifications {
    fn post(&self, request: &NotificationRequest) -> Result<(), NotifyError> {
        let actions: Vec<&str> = request.actions.iter().map(|a| a.label.as_str()).collect();
        tracing::info!(
            channel = %self.channel_name,
            key = %request.key,
            notification_id = request.key.notification_id(),
            title = %request.title,
            body = %request.body,
            actions = ?actions,
            "Notification posted"
        );
        Ok(())
    }

    fn dismiss(&self, key: &AlertKey) -> Result<(), NotifyError> {
        tracing::info!(%key, "Notification dismissed");
        Ok(())
    }
}
