//! Relay configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};

/// Tunables for one relay process.
///
/// # Example RON
///
/// ```ron
/// RelayConfig(
///     bind: "0.0.0.0:7878",
///     tick_interval_ms: 100,
///     match_duration_ms: 180000,
///     rejoin_grace_ms: 10000,
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Listen address.
    pub bind: String,
    /// Period of the advisory countdown broadcast.
    pub tick_interval_ms: u64,
    /// Battle length counted down by the relay.
    pub match_duration_ms: u64,
    /// How long a dropped seat waits for a rejoin.
    pub rejoin_grace_ms: u64,
    /// Queued outbound messages per connection before new ones are dropped.
    pub outbound_capacity: usize,
    /// Queued connection events for the hub.
    pub command_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:7878".to_string(),
            tick_interval_ms: 100,
            match_duration_ms: 180_000,
            rejoin_grace_ms: 10_000,
            outbound_capacity: 256,
            command_capacity: 1024,
        }
    }
}

impl RelayConfig {
    /// Parse a config from RON text. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] if the text is not a valid config.
    pub fn from_ron_str(text: &str) -> Result<Self> {
        let config: Self = ron::from_str(text).map_err(|e| RelayError::Config {
            path: "relay config".to_string(),
            message: e.to_string(),
        })?;
        config.validate().map_err(|message| RelayError::Config {
            path: "relay config".to_string(),
            message,
        })?;
        Ok(config)
    }

    /// Read and parse a RON config file.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| RelayError::Config {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_ron_str(&text).map_err(|e| match e {
            RelayError::Config { message, .. } => RelayError::Config {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.tick_interval_ms == 0 {
            return Err("tick_interval_ms must be positive".into());
        }
        if self.match_duration_ms == 0 {
            return Err("match_duration_ms must be positive".into());
        }
        if self.outbound_capacity == 0 || self.command_capacity == 0 {
            return Err("channel capacities must be positive".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_ron_keeps_defaults() {
        let config =
            RelayConfig::from_ron_str("RelayConfig(bind: \"0.0.0.0:9000\", rejoin_grace_ms: 500)")
                .unwrap();
        assert_eq!(config.bind, "0.0.0.0:9000");
        assert_eq!(config.rejoin_grace_ms, 500);
        assert_eq!(config.tick_interval_ms, 100);
        assert_eq!(config.match_duration_ms, 180_000);
    }

    #[test]
    fn test_rejects_zero_tick_interval() {
        let err = RelayConfig::from_ron_str("RelayConfig(tick_interval_ms: 0)").unwrap_err();
        assert!(matches!(err, RelayError::Config { .. }));
    }

    #[test]
    fn test_load_missing_file_names_path() {
        let err = RelayConfig::load("/nonexistent/relay.ron").unwrap_err();
        match err {
            RelayError::Config { path, .. } => assert_eq!(path, "/nonexistent/relay.ron"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
