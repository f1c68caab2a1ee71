//! Configuration types for the signaling coordinator

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Main configuration for the signaling server and coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    /// Address the WebSocket listener binds to (default: 0.0.0.0:8080)
    pub bind_address: String,

    /// How long a callee has to accept or reject (default: 30000ms, range: 1000-300000ms)
    pub ring_timeout_ms: u64,

    /// How long a finished session is kept for late messages (default: 5000ms, max: 60000ms)
    pub terminal_grace_ms: u64,

    /// Largest accepted text frame in bytes (default: 64 KiB, min: 1 KiB)
    pub max_message_bytes: usize,

    /// Capacity of the coordinator's command queue (default: 1024)
    pub command_queue_capacity: usize,

    /// Time a client gets to finish the WebSocket handshake (default: 10000ms, range: 100-60000ms)
    pub handshake_timeout_ms: u64,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            ring_timeout_ms: 30_000,
            terminal_grace_ms: 5_000,
            max_message_bytes: 64 * 1024,
            command_queue_capacity: 1024,
            handshake_timeout_ms: 10_000,
        }
    }
}

impl SignalingConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `bind_address` is not a valid socket address
    /// - `ring_timeout_ms` is not in range 1000-300000
    /// - `terminal_grace_ms` is above 60000
    /// - `max_message_bytes` is below 1024
    /// - `command_queue_capacity` is zero
    /// - `handshake_timeout_ms` is not in range 100-60000
    pub fn validate(&self) -> Result<()> {
        if self.bind_address.parse::<SocketAddr>().is_err() {
            return Err(Error::InvalidConfig(format!(
                "bind_address must be a socket address (host:port), got {}",
                self.bind_address
            )));
        }

        if !(1_000..=300_000).contains(&self.ring_timeout_ms) {
            return Err(Error::InvalidConfig(format!(
                "ring_timeout_ms must be in range 1000-300000, got {}",
                self.ring_timeout_ms
            )));
        }

        if self.terminal_grace_ms > 60_000 {
            return Err(Error::InvalidConfig(format!(
                "terminal_grace_ms must be at most 60000, got {}",
                self.terminal_grace_ms
            )));
        }

        if self.max_message_bytes < 1024 {
            return Err(Error::InvalidConfig(format!(
                "max_message_bytes must be at least 1024, got {}",
                self.max_message_bytes
            )));
        }

        if self.command_queue_capacity == 0 {
            return Err(Error::InvalidConfig(
                "command_queue_capacity must be greater than 0".to_string(),
            ));
        }

        if !(100..=60_000).contains(&self.handshake_timeout_ms) {
            return Err(Error::InvalidConfig(format!(
                "handshake_timeout_ms must be in range 100-60000, got {}",
                self.handshake_timeout_ms
            )));
        }

        Ok(())
    }

    /// Parsed bind address
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.bind_address.parse().map_err(|e| {
            Error::InvalidConfig(format!("Invalid bind_address {}: {}", self.bind_address, e))
        })
    }

    /// Ring timeout as a [`Duration`]
    pub fn ring_timeout(&self) -> Duration {
        Duration::from_millis(self.ring_timeout_ms)
    }

    /// Terminal grace period as a [`Duration`]
    pub fn terminal_grace(&self) -> Duration {
        Duration::from_millis(self.terminal_grace_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Parse configuration from a YAML document
    ///
    /// Missing keys fall back to their defaults.
    ///
    /// # Example
    ///
    /// ```
    /// use rendezvous_signaling::SignalingConfig;
    ///
    /// let config = SignalingConfig::from_yaml_str("ring_timeout_ms: 45000\n").unwrap();
    /// assert_eq!(config.ring_timeout_ms, 45000);
    /// assert_eq!(config.terminal_grace_ms, 5000);
    /// ```
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| {
            Error::InvalidConfig(format!("Failed to parse signaling config: {}", e))
        })
    }

    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SignalingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ring_timeout(), Duration::from_secs(30));
        assert_eq!(config.terminal_grace(), Duration::from_secs(5));
        assert_eq!(config.handshake_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_invalid_bind_address() {
        let config = SignalingConfig {
            bind_address: "localhost".to_string(),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.is_config_error());
        assert!(config.socket_addr().is_err());
    }

    #[test]
    fn test_ring_timeout_range() {
        let too_short = SignalingConfig {
            ring_timeout_ms: 999,
            ..Default::default()
        };
        assert!(too_short.validate().is_err());

        let too_long = SignalingConfig {
            ring_timeout_ms: 300_001,
            ..Default::default()
        };
        assert!(too_long.validate().is_err());
    }

    #[test]
    fn test_limits() {
        let config = SignalingConfig {
            terminal_grace_ms: 60_001,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SignalingConfig {
            max_message_bytes: 512,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SignalingConfig {
            command_queue_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SignalingConfig {
            handshake_timeout_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_overrides_defaults() {
        let yaml = "bind_address: 127.0.0.1:9000\nterminal_grace_ms: 0\n";
        let config = SignalingConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.bind_address, "127.0.0.1:9000");
        assert_eq!(config.terminal_grace_ms, 0);
        assert_eq!(config.ring_timeout_ms, 30_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_rejects_wrong_types() {
        let err = SignalingConfig::from_yaml_str("ring_timeout_ms: soon\n").unwrap_err();
        assert!(err.is_config_error());
    }
}
