//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::identity::ActorContext;
use crate::{AppError, Result};

/// How lead names are compared for the uniqueness check.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NameMatch {
    /// Names must differ byte-for-byte.
    #[default]
    Exact,
    /// Names that differ only in ASCII case collide.
    CaseInsensitive,
}

/// Live-mirror synchronization settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SyncConfig {
    /// Delay before retrying a failed re-sync.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Capacity of the store change-event channel.
    #[serde(default = "default_change_buffer")]
    pub change_buffer: usize,
    /// How often to check the store for writes made by other processes.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: default_reconnect_delay_ms(),
            change_buffer: default_change_buffer(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl SyncConfig {
    /// Re-sync backoff as a [`Duration`].
    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// External-write polling period as a [`Duration`].
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_reconnect_delay_ms() -> u64 {
    2000
}

fn default_change_buffer() -> usize {
    256
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data").join("leads.db")
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// `SQLite` file backing the record store.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Actors holding administrative capability.
    #[serde(default)]
    pub administrator_ids: Vec<String>,
    /// Lead name comparison used by the uniqueness guard.
    #[serde(default)]
    pub name_match: NameMatch,
    /// Live-mirror synchronization settings.
    #[serde(default)]
    pub sync: SyncConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Whether `actor` holds administrative capability.
    #[must_use]
    pub fn is_administrator(&self, actor: &str) -> bool {
        self.administrator_ids.iter().any(|id| id == actor)
    }

    /// Build the identity context for `actor`.
    #[must_use]
    pub fn actor_context(&self, actor: &str) -> ActorContext {
        ActorContext::new(actor, self.is_administrator(actor))
    }

    fn validate(&self) -> Result<()> {
        if self.sync.change_buffer == 0 {
            return Err(AppError::Config(
                "sync.change_buffer must be greater than zero".into(),
            ));
        }
        if self.sync.reconnect_delay_ms == 0 {
            return Err(AppError::Config(
                "sync.reconnect_delay_ms must be greater than zero".into(),
            ));
        }
        if self.sync.poll_interval_ms == 0 {
            return Err(AppError::Config(
                "sync.poll_interval_ms must be greater than zero".into(),
            ));
        }
        if self.administrator_ids.iter().any(|id| id.trim().is_empty()) {
            return Err(AppError::Config(
                "administrator_ids must not contain blank entries".into(),
            ));
        }
        Ok(())
    }
}
