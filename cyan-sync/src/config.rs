//! Sync-layer configuration.
//!
//! Durations are written in milliseconds when loaded from JSON:
//! ```text
//! { "poll_interval_ms": 100, "pending_timeout_ms": 30000, "startup_grace_ms": 250, "seed_demo": true }
//! ```

use serde::{Deserialize, Deserializer};
use std::time::Duration;

use crate::error::SyncError;

fn millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_millis)
}

/// Polling cadence for one bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Delay between drain ticks
    pub poll_interval: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Session-wide configuration shared by every store.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Delay between drain ticks on every bridge
    #[serde(rename = "poll_interval_ms", deserialize_with = "millis")]
    pub poll_interval: Duration,
    /// Age after which an unconfirmed pending operation is dropped
    #[serde(rename = "pending_timeout_ms", deserialize_with = "millis")]
    pub pending_timeout: Duration,
    /// Wait after starting the bridges before the first snapshot request
    #[serde(rename = "startup_grace_ms", deserialize_with = "millis")]
    pub startup_grace: Duration,
    /// Ask the engine to seed demo content when the tree is empty
    pub seed_demo: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            pending_timeout: Duration::from_secs(30),
            startup_grace: Duration::from_millis(250),
            seed_demo: true,
        }
    }
}

impl SyncConfig {
    /// Parse and validate a JSON config. Missing keys keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, SyncError> {
        let config: SyncConfig =
            serde_json::from_str(json).map_err(|e| SyncError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.poll_interval.is_zero() {
            return Err(SyncError::InvalidConfig("poll interval must be non-zero".into()));
        }
        if self.pending_timeout.is_zero() {
            return Err(SyncError::InvalidConfig("pending timeout must be non-zero".into()));
        }
        Ok(())
    }

    pub fn bridge(&self) -> BridgeConfig {
        BridgeConfig {
            poll_interval: self.poll_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert_eq!(config.pending_timeout, Duration::from_secs(30));
        assert!(config.seed_demo);
        assert_eq!(config.bridge(), BridgeConfig::default());
    }

    #[test]
    fn test_from_json_partial() {
        let config = SyncConfig::from_json(r#"{"poll_interval_ms": 20, "seed_demo": false}"#).unwrap();
        assert_eq!(config.poll_interval, Duration::from_millis(20));
        assert_eq!(config.pending_timeout, Duration::from_secs(30));
        assert!(!config.seed_demo);
    }

    #[test]
    fn test_from_json_rejects_zero_interval() {
        let err = SyncConfig::from_json(r#"{"poll_interval_ms": 0}"#).unwrap_err();
        assert!(matches!(err, SyncError::InvalidConfig(_)));
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(SyncConfig::from_json("nope").is_err());
    }
}
