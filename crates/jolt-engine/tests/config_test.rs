use jolt_engine::config::{ConfigError, ConfigLoader, JoltConfig};
use std::time::Duration;
use tempfile::tempdir;

#[tokio::test]
async fn test_partial_file_keeps_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("jolt.yaml");
    std::fs::write(&path, "relay:\n  reconnect_delay_ms: 2000\nbridge:\n  port: 9100\n").unwrap();

    let config = ConfigLoader::load_from(&path).await.unwrap();

    assert_eq!(config.relay.reconnect_delay_ms, 2000);
    assert_eq!(config.relay.ping_interval_ms, 30000);
    assert_eq!(config.relay.origin, "leetcode-pishock");
    assert_eq!(config.bridge.port, 9100);
    assert_eq!(config.monitor.settings_poll_ms, 1000);
}

#[tokio::test]
async fn test_empty_file_is_default() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("jolt.yaml");
    std::fs::write(&path, "").unwrap();

    let config = ConfigLoader::load_from(&path).await.unwrap();
    assert_eq!(config.bridge.port, 9001);
}

#[tokio::test]
async fn test_malformed_file_is_an_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("jolt.yaml");
    std::fs::write(&path, "relay: [not, a, map]\n").unwrap();

    let result = ConfigLoader::load_from(&path).await;
    assert!(matches!(result, Err(ConfigError::Parse(_))));
}

#[test]
fn test_relay_config_from_defaults() {
    let relay = JoltConfig::default().relay_config().unwrap();

    assert_eq!(relay.broker_url.as_str(), "wss://broker.pishock.com/v2");
    assert_eq!(relay.ping_interval, Duration::from_secs(30));
    assert_eq!(relay.reconnect_delay, Duration::from_secs(5));
}

#[test]
fn test_invalid_broker_url_is_rejected() {
    let mut config = JoltConfig::default();
    config.relay.broker_url = "not a url".into();

    assert!(matches!(config.relay_config(), Err(ConfigError::Invalid(_))));
}

#[test]
fn test_url_pattern_from_config() {
    let pattern = JoltConfig::default().url_pattern().unwrap();

    assert!(pattern.matches("https://leetcode.com/submissions/detail/123/check/"));
    assert!(!pattern.matches("https://leetcode.com/submissions/detail/123/"));
}
