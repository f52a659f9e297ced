mod config;
pub mod database;
mod kv;

pub use config::{Config, DetoxConfig, NotificationsConfig, ScheduleConfig, TrackingConfig};
pub use database::Database;
pub use kv::{keys, KvStore, MemoryStore};

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns `~/.config/cailo[-dev]/` based on CAILO_ENV.
///
/// Set CAILO_ENV=dev to use the development data directory, or
/// CAILO_DATA_DIR to point somewhere else entirely.
///
/// # Errors
/// Returns an error if the home directory cannot be determined or if
/// creating the directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let dir = if let Ok(explicit) = std::env::var("CAILO_DATA_DIR") {
        PathBuf::from(explicit)
    } else {
        let base_dir = dirs::home_dir().ok_or(ConfigError::NoDataDir)?.join(".config");
        let env = std::env::var("CAILO_ENV").unwrap_or_else(|_| "production".to_string());
        if env == "dev" {
            base_dir.join("cailo-dev")
        } else {
            base_dir.join("cailo")
        }
    };

    std::fs::create_dir_all(&dir).map_err(|e| ConfigError::LoadFailed {
        path: dir.clone(),
        message: e.to_string(),
    })?;
    Ok(dir)
}
