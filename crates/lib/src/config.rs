//! Runtime configuration for the Keepsake systems.
//!
//! Each system takes its own config struct; [`Config`] bundles them so an
//! adapter can load everything from one JSON document. Missing fields fall
//! back to their defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Top-level configuration bundle.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Achievement flush loop settings
    pub achievements: AchievementConfig,
    /// Saving system settings
    pub saving: SavingConfig,
}

impl Config {
    /// Parse a configuration from JSON.
    ///
    /// ```
    /// # use keepsake::Config;
    /// let config = Config::from_json(r#"{ "achievements": { "batch_size": 2 } }"#).unwrap();
    /// assert_eq!(config.achievements.batch_size, 2);
    /// assert_eq!(config.saving.max_name_len, 64);
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize the configuration to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Achievement flush loop configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AchievementConfig {
    /// Minimum time between two dispatch batches, in milliseconds on the wire
    #[serde(with = "duration_millis", rename = "update_interval_ms")]
    pub update_interval: Duration,

    /// Maximum number of pending updates dispatched per batch
    pub batch_size: usize,
}

impl Default for AchievementConfig {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_secs(1),
            batch_size: 8,
        }
    }
}

impl AchievementConfig {
    /// Set the inter-batch interval.
    pub fn with_update_interval(mut self, update_interval: Duration) -> Self {
        self.update_interval = update_interval;
        self
    }

    /// Set the dispatch batch size. Zero is treated as one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

/// Saving system configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SavingConfig {
    /// Longest accepted save name
    pub max_name_len: usize,
}

impl Default for SavingConfig {
    fn default() -> Self {
        Self { max_name_len: 64 }
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
