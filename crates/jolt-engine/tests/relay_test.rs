mod common;

use common::{FakeBroker, configured_entries, relay_config, store_with, text, wait_for};
use jolt_common::protocol::ShockCommand;
use jolt_common::settings::{SettingKey, SettingValue};
use jolt_engine::relay::{ConnectionState, Relay};
use std::sync::Arc;
use std::time::Duration;

fn connected(status: &jolt_engine::relay::RelayStatus) -> bool {
    status.state == ConnectionState::Connected
}

#[tokio::test(start_paused = true)]
async fn test_publishes_envelope_when_connected() {
    let broker = FakeBroker::new();
    let store = store_with(configured_entries()).await;
    let relay = Relay::spawn(relay_config(), Arc::new(broker.clone()), store);

    wait_for(&relay, connected).await;
    relay.send(ShockCommand::shock(30.0, 1.0));
    let status = wait_for(&relay, |s| s.commands_sent == 1).await;

    assert_eq!(status.commands_dropped, 0);
    assert_eq!(
        broker.sent(),
        vec![
            r#"{"Operation":"PUBLISH","PublishCommands":[{"Target":"c42-sops-SHARE1","Body":{"id":7,"m":"s","i":30,"d":1000,"r":true,"l":{"ty":"sc","w":false,"h":false,"o":"leetcode-pishock"}}}]}"#
                .to_string()
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_connect_url_carries_credentials() {
    let broker = FakeBroker::new();
    let store = store_with(configured_entries()).await;
    let relay = Relay::spawn(relay_config(), Arc::new(broker.clone()), store);

    wait_for(&relay, connected).await;

    let urls = broker.urls();
    assert_eq!(urls.len(), 1);
    assert_eq!(urls[0].as_str(), "wss://broker.test/v2?Username=alice&ApiKey=key-123");
}

#[tokio::test(start_paused = true)]
async fn test_no_connection_without_credentials() {
    let broker = FakeBroker::new();
    let store = store_with(vec![("pishockCode".into(), text("SHARE1"))]).await;
    let relay = Relay::spawn(relay_config(), Arc::new(broker.clone()), store);

    tokio::time::sleep(Duration::from_secs(30)).await;
    let status = relay.status().await.unwrap();

    assert_eq!(status.state, ConnectionState::Disconnected);
    assert_eq!(status.connect_attempts, 0);
    assert_eq!(broker.attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_send_while_disconnected_drops_and_connects_once() {
    let broker = FakeBroker::new();
    broker.refuse_connections(true);
    let store = store_with(configured_entries()).await;
    let relay = Relay::spawn(relay_config(), Arc::new(broker.clone()), store);

    let before = wait_for(&relay, |s| s.reconnect_pending).await;
    assert_eq!(before.connect_attempts, 1);

    relay.send(ShockCommand::shock(30.0, 1.0));
    let after = relay.status().await.unwrap();

    assert_eq!(after.connect_attempts, 2);
    assert_eq!(after.commands_dropped, 1);
    assert_eq!(after.commands_sent, 0);
    assert!(broker.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_reconnects_after_broker_drops_connection() {
    let broker = FakeBroker::new();
    let store = store_with(configured_entries()).await;
    let relay = Relay::spawn(relay_config(), Arc::new(broker.clone()), store);

    wait_for(&relay, connected).await;
    broker.drop_connection();

    let dropped = wait_for(&relay, |s| s.state == ConnectionState::Disconnected).await;
    assert!(dropped.reconnect_pending);
    assert!(!dropped.keepalive_active);

    let back = wait_for(&relay, |s| s.connect_attempts == 2 && connected(s)).await;
    assert!(!back.reconnect_pending);
    assert!(back.keepalive_active);
    assert_eq!(broker.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_keepalive_pings_every_interval() {
    let broker = FakeBroker::new();
    let store = store_with(configured_entries()).await;
    let relay = Relay::spawn(relay_config(), Arc::new(broker.clone()), store);

    wait_for(&relay, connected).await;
    tokio::time::sleep(Duration::from_secs(29)).await;
    assert!(broker.sent().is_empty());

    tokio::time::sleep(Duration::from_secs(2)).await;
    relay.status().await.unwrap();
    assert_eq!(broker.sent(), vec![r#"{"Operation":"PING"}"#.to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_credential_change_reconnects_without_pending_timer() {
    let broker = FakeBroker::new();
    let store = store_with(configured_entries()).await;
    let relay = Relay::spawn(relay_config(), Arc::new(broker.clone()), Arc::clone(&store));

    wait_for(&relay, connected).await;
    store
        .set(SettingKey::PishockApiKey, SettingValue::Text("key-456".into()))
        .await
        .unwrap();

    let status = wait_for(&relay, |s| s.connect_attempts == 2 && connected(s)).await;
    assert!(!status.reconnect_pending);
    assert_eq!(broker.closed_sinks(), 1);
    assert!(broker.urls()[1].as_str().ends_with("ApiKey=key-456"));

    // The explicitly closed connection must not schedule a reconnect.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(relay.status().await.unwrap().connect_attempts, 2);
}

#[tokio::test(start_paused = true)]
async fn test_unrelated_setting_change_keeps_connection() {
    let broker = FakeBroker::new();
    let store = store_with(configured_entries()).await;
    let relay = Relay::spawn(relay_config(), Arc::new(broker.clone()), Arc::clone(&store));

    wait_for(&relay, connected).await;
    store
        .set(SettingKey::VibrateIntensity, SettingValue::Number(60.0))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(relay.status().await.unwrap().connect_attempts, 1);
    assert_eq!(broker.closed_sinks(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_commands_without_device_are_dropped() {
    let broker = FakeBroker::new();
    let store = store_with(vec![
        ("pishockUsername".into(), text("alice")),
        ("pishockApiKey".into(), text("key-123")),
    ])
    .await;
    let relay = Relay::spawn(relay_config(), Arc::new(broker.clone()), store);

    wait_for(&relay, connected).await;
    relay.send(ShockCommand::vibrate(25.0, 1.0));
    let status = wait_for(&relay, |s| s.commands_dropped == 1).await;

    assert_eq!(status.commands_sent, 0);
    assert!(broker.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_non_numeric_shocker_id_drops_command() {
    let broker = FakeBroker::new();
    let mut entries = configured_entries();
    entries.push(("pishockShockerId".into(), text("abc")));
    let store = store_with(entries).await;
    let relay = Relay::spawn(relay_config(), Arc::new(broker.clone()), store);

    wait_for(&relay, connected).await;
    relay.send(ShockCommand::shock(30.0, 1.0));
    let status = wait_for(&relay, |s| s.commands_dropped == 1).await;

    assert_eq!(status.state, ConnectionState::Connected);
    assert!(broker.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_broker_error_reply_keeps_connection() {
    let broker = FakeBroker::new();
    let store = store_with(configured_entries()).await;
    let relay = Relay::spawn(relay_config(), Arc::new(broker.clone()), store);

    wait_for(&relay, connected).await;
    broker.reply(r#"{"IsError":true,"Message":"Shocker is paused"}"#);
    broker.reply("not json");
    tokio::time::sleep(Duration::from_millis(50)).await;

    let status = relay.status().await.unwrap();
    assert_eq!(status.state, ConnectionState::Connected);
    assert!(!status.reconnect_pending);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_closes_socket() {
    let broker = FakeBroker::new();
    let store = store_with(configured_entries()).await;
    let relay = Relay::spawn(relay_config(), Arc::new(broker.clone()), store);

    wait_for(&relay, connected).await;
    relay.shutdown().await;

    assert_eq!(broker.closed_sinks(), 1);
    assert!(relay.status().await.is_none());
}
