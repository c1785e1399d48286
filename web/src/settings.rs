use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use thiserror::Error;

/// Tunable server/session-hosting parameters, set at startup from CLI
/// arguments or environment and readable by any running session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppSettings {
    /// Inbound WebSocket messages allowed per connection per rolling second.
    pub ws_rate_limit_per_second: u32,
    /// Window after a WebSocket upgrade within which a `HELLO` must arrive.
    pub hello_grace_period_ms: u64,
    /// Idle time after the last connection drops before a session's actor
    /// is unloaded from memory (state already persisted by then).
    pub hibernate_after_ms: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            ws_rate_limit_per_second: 10,
            hello_grace_period_ms: 5_000,
            hibernate_after_ms: 60_000,
        }
    }
}

impl AppSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.ws_rate_limit_per_second == 0 {
            return Err(SettingsError::InvalidValue(
                "ws_rate_limit_per_second must be greater than 0".to_string(),
            ));
        }
        if self.hello_grace_period_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "hello_grace_period_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// In-memory settings store with validation, read by every request handler
/// that needs a current tunable without threading it through call sites.
#[derive(Debug)]
pub struct SettingsStore {
    settings: RwLock<AppSettings>,
}

impl SettingsStore {
    pub fn new() -> Self {
        Self { settings: RwLock::new(AppSettings::default()) }
    }

    pub fn with_settings(settings: AppSettings) -> Result<Self, SettingsError> {
        settings.validate()?;
        Ok(Self { settings: RwLock::new(settings) })
    }

    pub fn get(&self) -> Result<AppSettings, SettingsError> {
        self.settings.read().map(|guard| guard.clone()).map_err(|_| SettingsError::StoragePoisoned)
    }

    pub fn update(&self, new_settings: AppSettings) -> Result<AppSettings, SettingsError> {
        new_settings.validate()?;
        let mut guard = self.settings.write().map_err(|_| SettingsError::StoragePoisoned)?;
        *guard = new_settings.clone();
        Ok(new_settings)
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
    #[error("settings storage poisoned")]
    StoragePoisoned,
}
