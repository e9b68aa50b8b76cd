mod config;
mod schedules;

pub use config::{AlarmConfig, Config, NotificationsConfig};
pub use schedules::ScheduleStore;

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns `~/.config/pillbox[-dev]/` based on PILLBOX_ENV.
///
/// Set PILLBOX_ENV=dev to use development data directory.
///
/// # Errors
/// Returns an error if creating the config directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("PILLBOX_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("pillbox-dev")
    } else {
        base_dir.join("pillbox")
    };

    std::fs::create_dir_all(&dir)
        .map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}
