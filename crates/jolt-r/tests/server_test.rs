use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::{SinkExt, StreamExt};
use jolt_engine::dispatch::Dispatcher;
use jolt_engine::frontend::{Frontend, FrontendLink};
use jolt_engine::overlay::OverlayControl;
use jolt_engine::pattern::UrlPattern;
use jolt_engine::protocol::{BackgroundMessage, BridgeInbound, CaptureFrame, ContentMessage};
use jolt_engine::relay::{Relay, RelayConfig, WsConnector};
use jolt_engine::store::{MemoryBackend, SettingsStore};
use jolt_r::{BridgeRouter, BridgeServer, InboundEvent, RemoteBridge};
use serde_json::{Value, json};
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect_simulated_extension(port: u16) -> Client {
    let url = format!("ws://127.0.0.1:{}", port);
    for _ in 0..10 {
        if let Ok((ws_stream, _)) = connect_async(&url).await {
            return ws_stream;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("Failed to connect to bridge");
}

async fn send(client: &mut Client, frame: Value) {
    client.send(Message::Text(frame.to_string())).await.unwrap();
}

/// A dispatcher whose relay never connects (default settings carry no
/// credentials).
async fn offline_dispatcher() -> Arc<Dispatcher> {
    let store = Arc::new(SettingsStore::open(Arc::new(MemoryBackend::new())).await);
    let config = RelayConfig::new(url::Url::parse("wss://broker.invalid/v2").unwrap());
    let relay = Relay::spawn(config, Arc::new(WsConnector), Arc::clone(&store));
    Arc::new(Dispatcher::new(store, relay))
}

#[tokio::test]
#[serial]
async fn test_server_forwards_frames_and_skips_garbage() -> anyhow::Result<()> {
    let port = 9061;
    let handle = BridgeServer::new(port).start().await?;
    let mut client = connect_simulated_extension(port).await;

    client.send(Message::Text("not json".into())).await?;
    send(&mut client, json!({"type": "hello", "response_filter": true})).await;
    send(&mut client, json!({"type": "testVibrate"})).await;

    let mut inbound = handle.inbound_rx.lock().await;
    let first = timeout(Duration::from_secs(2), inbound.recv()).await?.unwrap();
    let second = timeout(Duration::from_secs(2), inbound.recv()).await?.unwrap();
    assert_eq!(
        first,
        InboundEvent::Frame {
            connection: 1,
            frame: BridgeInbound::Capture(CaptureFrame::Hello {
                response_filter: true
            }),
        }
    );
    assert_eq!(
        second,
        InboundEvent::Frame {
            connection: 1,
            frame: BridgeInbound::Background(BackgroundMessage::TestVibrate),
        }
    );

    drop(client);
    let closed = timeout(Duration::from_secs(2), inbound.recv()).await?.unwrap();
    assert_eq!(closed, InboundEvent::Disconnected { connection: 1 });
    Ok(())
}

#[tokio::test]
#[serial]
async fn test_server_broadcasts_content_messages() -> anyhow::Result<()> {
    let port = 9062;
    let handle = BridgeServer::new(port).start().await?;
    let mut client = connect_simulated_extension(port).await;

    for _ in 0..20 {
        if handle.connections() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let message: ContentMessage = serde_json::from_value(json!({
        "type": "submission",
        "payload": {"kind": "final", "success": true}
    }))?;
    handle.outbound_tx.send(message)?;

    let received = timeout(Duration::from_secs(2), client.next())
        .await?
        .expect("stream ended")?;
    let text = received.into_text()?;
    let value: Value = serde_json::from_str(&text)?;
    assert_eq!(value["type"], "submission");
    assert_eq!(value["payload"]["kind"], "final");
    assert_eq!(value["payload"]["success"], true);
    Ok(())
}

#[tokio::test]
#[serial]
async fn test_bridge_reassembles_filtered_body_and_routes_page_events() -> anyhow::Result<()> {
    let port = 9063;
    let (bodies_tx, mut bodies_rx) = mpsc::channel(4);
    let (events_tx, mut events_rx) = mpsc::channel(4);
    let link = FrontendLink {
        dispatcher: offline_dispatcher().await,
        bodies: bodies_tx,
        page_events: events_tx,
    };
    let mut bridge = RemoteBridge::new(port, UrlPattern::submission_check());
    bridge.launch(link).await?;
    assert!(bridge.is_ready().await);

    let mut client = connect_simulated_extension(port).await;
    let body = r#"{"state":"SUCCESS","status_msg":"Accepted"}"#;
    let (head, tail) = body.split_at(10);
    let check_url = "https://leetcode.com/submissions/detail/77/check/";

    send(&mut client, json!({"type": "hello", "response_filter": true})).await;
    send(
        &mut client,
        json!({"type": "chunk", "request_id": "7", "url": check_url, "data": STANDARD.encode(head)}),
    )
    .await;
    send(
        &mut client,
        json!({"type": "chunk", "request_id": "7", "data": STANDARD.encode(tail)}),
    )
    .await;
    // Outside the monitored pattern; never delivered.
    send(
        &mut client,
        json!({"type": "chunk", "request_id": "8", "url": "https://leetcode.com/graphql", "data": STANDARD.encode("{}")}),
    )
    .await;
    send(&mut client, json!({"type": "stop", "request_id": "8"})).await;
    send(&mut client, json!({"type": "stop", "request_id": "7"})).await;
    send(&mut client, json!({"type": "editor_focused"})).await;

    let captured = timeout(Duration::from_secs(2), bodies_rx.recv()).await?.unwrap();
    assert_eq!(captured.url, check_url);
    assert_eq!(captured.body, body);

    let event = timeout(Duration::from_secs(2), events_rx.recv()).await?.unwrap();
    assert_eq!(event, OverlayControl::Focus);
    assert!(bodies_rx.try_recv().is_err());

    bridge.close().await?;
    assert!(!bridge.is_ready().await);
    Ok(())
}

#[tokio::test]
#[serial]
async fn test_bridge_accepts_completed_bodies_in_pattern_only() -> anyhow::Result<()> {
    let port = 9064;
    let (bodies_tx, mut bodies_rx) = mpsc::channel(4);
    let (events_tx, mut events_rx) = mpsc::channel(4);
    let link = FrontendLink {
        dispatcher: offline_dispatcher().await,
        bodies: bodies_tx,
        page_events: events_tx,
    };
    let mut bridge = RemoteBridge::new(port, UrlPattern::submission_check());
    bridge.launch(link).await?;

    let mut client = connect_simulated_extension(port).await;
    send(
        &mut client,
        json!({"type": "completed", "url": "https://leetcode.com/problems/two-sum/", "body": "{}"}),
    )
    .await;
    send(
        &mut client,
        json!({"type": "completed", "url": "https://leetcode.com/submissions/detail/5/check/", "body": "{\"state\":\"PENDING\"}"}),
    )
    .await;
    send(
        &mut client,
        json!({"type": "problem_opened", "url": "https://leetcode.com/problems/two-sum/"}),
    )
    .await;

    let captured = timeout(Duration::from_secs(2), bodies_rx.recv()).await?.unwrap();
    assert_eq!(captured.url, "https://leetcode.com/submissions/detail/5/check/");
    let event = timeout(Duration::from_secs(2), events_rx.recv()).await?.unwrap();
    assert_eq!(event, OverlayControl::Reset);

    bridge.close().await?;
    Ok(())
}

fn chunk(connection: u64, request_id: &str, url: &str, data: &str) -> InboundEvent {
    InboundEvent::Frame {
        connection,
        frame: BridgeInbound::Capture(CaptureFrame::Chunk {
            request_id: request_id.to_string(),
            url: url.to_string(),
            data: STANDARD.encode(data),
        }),
    }
}

fn stop(connection: u64, request_id: &str) -> InboundEvent {
    InboundEvent::Frame {
        connection,
        frame: BridgeInbound::Capture(CaptureFrame::Stop {
            request_id: request_id.to_string(),
        }),
    }
}

#[tokio::test]
async fn test_router_keeps_connections_with_same_request_id_apart() -> anyhow::Result<()> {
    let (bodies_tx, mut bodies_rx) = mpsc::channel(4);
    let (events_tx, _events_rx) = mpsc::channel(4);
    let link = FrontendLink {
        dispatcher: offline_dispatcher().await,
        bodies: bodies_tx,
        page_events: events_tx,
    };
    let mut router = BridgeRouter::new(UrlPattern::submission_check(), link);
    let first_url = "https://leetcode.com/submissions/detail/1/check/";
    let second_url = "https://leetcode.com/submissions/detail/2/check/";

    router.handle(chunk(1, "5", first_url, "{\"a\":")).await;
    router.handle(chunk(2, "5", second_url, "{\"b\":")).await;
    router.handle(chunk(1, "5", "", "1}")).await;
    router.handle(chunk(2, "5", "", "2}")).await;
    assert_eq!(router.pending_bodies(), 2);

    router.handle(stop(2, "5")).await;
    router.handle(stop(1, "5")).await;

    let second = timeout(Duration::from_secs(2), bodies_rx.recv()).await?.unwrap();
    let first = timeout(Duration::from_secs(2), bodies_rx.recv()).await?.unwrap();
    assert_eq!((second.url.as_str(), second.body.as_str()), (second_url, "{\"b\":2}"));
    assert_eq!((first.url.as_str(), first.body.as_str()), (first_url, "{\"a\":1}"));
    assert_eq!(router.pending_bodies(), 0);
    Ok(())
}

#[tokio::test]
async fn test_router_drops_unfinished_bodies_on_disconnect() -> anyhow::Result<()> {
    let (bodies_tx, mut bodies_rx) = mpsc::channel(4);
    let (events_tx, _events_rx) = mpsc::channel(4);
    let link = FrontendLink {
        dispatcher: offline_dispatcher().await,
        bodies: bodies_tx,
        page_events: events_tx,
    };
    let mut router = BridgeRouter::new(UrlPattern::submission_check(), link);
    let url = "https://leetcode.com/submissions/detail/3/check/";

    router.handle(chunk(1, "9", url, "{\"state\":")).await;
    assert_eq!(router.pending_bodies(), 1);
    router.handle(InboundEvent::Disconnected { connection: 1 }).await;
    assert_eq!(router.pending_bodies(), 0);

    // A reconnected extension reusing the id starts a fresh body.
    router.handle(stop(1, "9")).await;
    router.handle(stop(3, "9")).await;
    assert!(bodies_rx.try_recv().is_err());

    router.handle(chunk(3, "9", url, "{}")).await;
    router.handle(stop(3, "9")).await;
    let captured = timeout(Duration::from_secs(2), bodies_rx.recv()).await?.unwrap();
    assert_eq!(captured.body, "{}");
    Ok(())
}
