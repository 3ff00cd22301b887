//! Config - エンジンとランタイムの設定
//!
//! JSON から読めるように serde で定義し、省略されたフィールドは
//! `Default` の値で埋めます。

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::ResiliencyPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Knobs of one aggregate engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Policy seeded into every new task processor.
    pub resiliency: ResiliencyPolicy,

    /// In-process timer delay while work is pending and nothing backs off.
    pub timer_due: Duration,

    /// Period of the durable reminder backstop.
    pub reminder_period: Duration,

    /// Reminder period used while a command is suspended or publishing failed.
    pub backoff_reminder_period: Duration,

    /// Timer delay before retrying a failed publish.
    pub publish_retry_delay: Duration,

    /// Retry notifications for the same command are not repeated within this window.
    pub notification_dedup_window: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            resiliency: ResiliencyPolicy::default(),
            timer_due: Duration::from_millis(1),
            reminder_period: Duration::from_secs(60),
            backoff_reminder_period: Duration::from_secs(5 * 60),
            publish_retry_delay: Duration::from_secs(10),
            notification_dedup_window: Duration::from_secs(15 * 60),
        }
    }
}

/// Knobs of the keyed worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub engine: EngineConfig,

    /// Capacity of each actor's mailbox.
    pub mailbox_capacity: usize,

    /// An actor with an empty mailbox for this long is deactivated.
    pub idle_timeout: Duration,

    /// How often the reminder table is polled.
    pub reminder_poll_interval: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            mailbox_capacity: 64,
            idle_timeout: Duration::from_secs(5 * 60),
            reminder_poll_interval: Duration::from_secs(1),
        }
    }
}

impl RuntimeConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&json)
    }
}
