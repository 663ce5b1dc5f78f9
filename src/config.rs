//! Runtime configuration. Every timeout, delay and discovery knob lives here so
//! adapters, discovery and the session share one source of truth.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ControlError, Result};

/// Control layer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Per-request timeout for discovery probes
    pub probe_timeout_ms: u64,
    /// Per-request timeout for control commands
    pub command_timeout_ms: u64,
    /// WebSocket open + registration timeout when a pairing key is cached
    pub handshake_timeout_ms: u64,
    /// How long to wait for the user to accept a pairing prompt on the TV
    pub pairing_timeout_ms: u64,
    /// Grace delay after a fire-and-forget keypress
    pub keypress_grace_ms: u64,
    /// Gap between digit keypresses during numeric channel entry
    pub digit_delay_ms: u64,
    /// Wait after a wake packet before HTTP touches
    pub wake_settle_ms: u64,
    pub poll_interval_secs: u64,
    pub discovery_batch_size: usize,
    pub discovery_budget_secs: u64,
    /// /24 prefixes scanned during discovery, e.g. "192.168.1"
    pub subnet_prefixes: Vec<String>,
    /// Also scan the /24 of every up, non-loopback IPv4 interface
    pub use_interface_subnets: bool,
    pub ssdp_enabled: bool,
    /// Name the TVs show in their pairing prompt
    pub app_name: String,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: 2000,
            command_timeout_ms: 5000,
            handshake_timeout_ms: 10_000,
            pairing_timeout_ms: 30_000,
            keypress_grace_ms: 100,
            digit_delay_ms: 200,
            wake_settle_ms: 3000,
            poll_interval_secs: 10,
            discovery_batch_size: 20,
            discovery_budget_secs: 30,
            subnet_prefixes: vec![
                "192.168.1".to_string(),
                "192.168.0".to_string(),
                "10.0.0".to_string(),
            ],
            use_interface_subnets: false,
            ssdp_enabled: true,
            app_name: "LanTvControl".to_string(),
        }
    }
}

impl ControlConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: ControlConfig =
            toml::from_str(text).map_err(|e| ControlError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ControlError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    fn validate(&self) -> Result<()> {
        if self.discovery_batch_size == 0 {
            return Err(ControlError::Config(
                "discovery_batch_size must be at least 1".to_string(),
            ));
        }
        if self.poll_interval_secs == 0 {
            return Err(ControlError::Config(
                "poll_interval_secs must be at least 1".to_string(),
            ));
        }
        for prefix in &self.subnet_prefixes {
            let octets: Vec<&str> = prefix.split('.').collect();
            if octets.len() != 3 || octets.iter().any(|o| o.parse::<u8>().is_err()) {
                return Err(ControlError::Config(format!(
                    "subnet prefix '{}' must look like 192.168.1",
                    prefix
                )));
            }
        }
        Ok(())
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn pairing_timeout(&self) -> Duration {
        Duration::from_millis(self.pairing_timeout_ms)
    }

    pub fn keypress_grace(&self) -> Duration {
        Duration::from_millis(self.keypress_grace_ms)
    }

    pub fn digit_delay(&self) -> Duration {
        Duration::from_millis(self.digit_delay_ms)
    }

    pub fn wake_settle(&self) -> Duration {
        Duration::from_millis(self.wake_settle_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn discovery_budget(&self) -> Duration {
        Duration::from_secs(self.discovery_budget_secs)
    }
}
