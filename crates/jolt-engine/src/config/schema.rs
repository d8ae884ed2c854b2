use crate::relay::RelayConfig;
use crate::store::FileBackend;
use jolt_common::pattern::{SUBMISSION_CHECK_PATTERN, UrlPattern};
use jolt_common::protocol::{DEFAULT_BROKER_URL, DEFAULT_ORIGIN};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::ConfigError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JoltConfig {
    #[serde(default)]
    pub relay: BrokerConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
}

impl JoltConfig {
    pub fn relay_config(&self) -> Result<RelayConfig, ConfigError> {
        let broker_url = url::Url::parse(&self.relay.broker_url).map_err(|e| {
            ConfigError::Invalid(format!("relay.broker_url {}: {}", self.relay.broker_url, e))
        })?;
        Ok(RelayConfig {
            broker_url,
            ping_interval: Duration::from_millis(self.relay.ping_interval_ms.max(1)),
            reconnect_delay: Duration::from_millis(self.relay.reconnect_delay_ms),
            origin: self.relay.origin.clone(),
        })
    }

    pub fn url_pattern(&self) -> Result<UrlPattern, ConfigError> {
        UrlPattern::new(&self.monitor.submission_url_pattern).map_err(|e| {
            ConfigError::Invalid(format!(
                "monitor.submission_url_pattern {}: {}",
                self.monitor.submission_url_pattern, e
            ))
        })
    }

    pub fn settings_path(&self) -> PathBuf {
        self.monitor
            .settings_path
            .clone()
            .unwrap_or_else(FileBackend::default_path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_url")]
    pub broker_url: String,
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_origin")]
    pub origin: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            broker_url: default_broker_url(),
            ping_interval_ms: default_ping_interval_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            origin: default_origin(),
        }
    }
}

fn default_broker_url() -> String {
    DEFAULT_BROKER_URL.to_string()
}

fn default_ping_interval_ms() -> u64 {
    30000
}

fn default_reconnect_delay_ms() -> u64 {
    5000
}

fn default_origin() -> String {
    DEFAULT_ORIGIN.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_submission_url_pattern")]
    pub submission_url_pattern: String,
    #[serde(default = "default_start_url")]
    pub start_url: String,
    /// Defaults to `~/.jolt/settings.yaml`.
    #[serde(default)]
    pub settings_path: Option<PathBuf>,
    #[serde(default = "default_settings_poll_ms")]
    pub settings_poll_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            submission_url_pattern: default_submission_url_pattern(),
            start_url: default_start_url(),
            settings_path: None,
            settings_poll_ms: default_settings_poll_ms(),
        }
    }
}

fn default_submission_url_pattern() -> String {
    SUBMISSION_CHECK_PATTERN.to_string()
}

fn default_start_url() -> String {
    "https://leetcode.com/problems/".to_string()
}

fn default_settings_poll_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_bridge_port")]
    pub port: u16,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            port: default_bridge_port(),
        }
    }
}

fn default_bridge_port() -> u16 {
    9001
}
