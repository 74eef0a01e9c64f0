//! Configuration types for the peer transport

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration for peer sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// STUN server URLs used for server-reflexive candidate harvesting.
    ///
    /// Empty (the default) means host candidates only, which is the normal
    /// mode when peers share a LAN. TURN is not supported here: relaying
    /// requires credentials that belong to the embedding application.
    pub stun_servers: Vec<String>,

    /// UDP port range for local candidates (default: ephemeral ports)
    pub udp_port_range: Option<PortRange>,

    /// Include loopback interfaces when harvesting host candidates
    /// (default: false; useful for single-machine tests)
    pub include_loopback: bool,

    /// Quiet period after the last trickled candidate before connectivity
    /// checks start, in milliseconds (default: 200)
    pub trickle_quiet_ms: u64,

    /// SCTP port advertised in the answer when no host candidate has been
    /// harvested yet (default: 5000)
    pub sctp_port_fallback: u16,

    /// Maximum application message size in bytes, advertised in the answer
    /// and enforced by the association (default: 262144)
    pub max_message_size: u32,

    /// Maximum number of simultaneous peer sessions (default: 64)
    pub max_sessions: u32,

    /// ICE disconnected timeout in seconds (None: engine default)
    pub ice_disconnected_timeout_secs: Option<u64>,

    /// ICE failed timeout in seconds (None: engine default)
    pub ice_failed_timeout_secs: Option<u64>,

    /// ICE keepalive interval in seconds (None: engine default)
    pub ice_keepalive_interval_secs: Option<u64>,
}

/// Inclusive UDP port range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    /// First port in the range
    pub min: u16,
    /// Last port in the range
    pub max: u16,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            stun_servers: Vec::new(),
            udp_port_range: None,
            include_loopback: false,
            trickle_quiet_ms: 200,
            sctp_port_fallback: 5000,
            max_message_size: 262_144,
            max_sessions: 64,
            ice_disconnected_timeout_secs: None,
            ice_failed_timeout_secs: None,
            ice_keepalive_interval_secs: None,
        }
    }
}

impl TransportConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `trickle_quiet_ms` is zero or over 60000
    /// - `max_message_size` is zero or over 16 MiB
    /// - `max_sessions` is zero
    /// - `udp_port_range` is empty or starts at port 0
    /// - a `stun_servers` entry is not a `stun:`/`stuns:` URL
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if self.trickle_quiet_ms == 0 || self.trickle_quiet_ms > 60_000 {
            return Err(Error::InvalidConfig(format!(
                "trickle_quiet_ms must be in range 1-60000, got {}",
                self.trickle_quiet_ms
            )));
        }

        if self.max_message_size == 0 || self.max_message_size > 16 * 1024 * 1024 {
            return Err(Error::InvalidConfig(format!(
                "max_message_size must be in range 1-16777216, got {}",
                self.max_message_size
            )));
        }

        if self.max_sessions == 0 {
            return Err(Error::InvalidConfig(
                "max_sessions must be at least 1".to_string(),
            ));
        }

        if let Some(range) = &self.udp_port_range {
            if range.min == 0 || range.min > range.max {
                return Err(Error::InvalidConfig(format!(
                    "udp_port_range must be non-empty and start above 0, got {}-{}",
                    range.min, range.max
                )));
            }
        }

        for url in &self.stun_servers {
            if !url.starts_with("stun:") && !url.starts_with("stuns:") {
                return Err(Error::InvalidConfig(format!(
                    "stun_servers entries must start with stun: or stuns:, got {}",
                    url
                )));
            }
        }

        Ok(())
    }

    /// Trickle quiet period as a [`Duration`]
    pub fn trickle_quiet(&self) -> Duration {
        Duration::from_millis(self.trickle_quiet_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = TransportConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.trickle_quiet_ms, 200);
        assert_eq!(config.sctp_port_fallback, 5000);
        assert_eq!(config.max_message_size, 262_144);
    }

    #[test]
    fn test_invalid_quiet_period() {
        let config = TransportConfig {
            trickle_quiet_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = TransportConfig {
            trickle_quiet_ms: 61_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_message_size() {
        let config = TransportConfig {
            max_message_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_max_sessions() {
        let config = TransportConfig {
            max_sessions: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_port_range() {
        let config = TransportConfig {
            udp_port_range: Some(PortRange { min: 0, max: 100 }),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = TransportConfig {
            udp_port_range: Some(PortRange {
                min: 5000,
                max: 4000,
            }),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = TransportConfig {
            udp_port_range: Some(PortRange {
                min: 50000,
                max: 50010,
            }),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_stun_url() {
        let config = TransportConfig {
            stun_servers: vec!["turn:turn.example.com".to_string()],
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = TransportConfig {
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }
}
