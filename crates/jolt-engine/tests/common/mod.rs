#![allow(dead_code)]

use async_trait::async_trait;
use jolt_common::error::RelayError;
use jolt_common::settings::SettingValue;
use jolt_engine::relay::{Connector, FrameSink, FrameSource, RelayConfig, RelayHandle, RelayStatus};
use jolt_engine::store::{MemoryBackend, SettingsStore};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

/// In-process stand-in for the broker socket.
#[derive(Clone, Default)]
pub struct FakeBroker {
    state: Arc<Mutex<BrokerState>>,
}

#[derive(Default)]
struct BrokerState {
    refuse: bool,
    urls: Vec<Url>,
    sent: Vec<String>,
    closed_sinks: usize,
    inbound: Vec<mpsc::UnboundedSender<Option<String>>>,
}

impl FakeBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.state.lock().unwrap().refuse = refuse;
    }

    pub fn attempts(&self) -> usize {
        self.state.lock().unwrap().urls.len()
    }

    pub fn urls(&self) -> Vec<Url> {
        self.state.lock().unwrap().urls.clone()
    }

    pub fn sent(&self) -> Vec<String> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn closed_sinks(&self) -> usize {
        self.state.lock().unwrap().closed_sinks
    }

    /// Push a frame to the newest connection.
    pub fn reply(&self, text: &str) {
        if let Some(tx) = self.state.lock().unwrap().inbound.last() {
            let _ = tx.send(Some(text.to_string()));
        }
    }

    /// Close the newest connection from the broker side.
    pub fn drop_connection(&self) {
        if let Some(tx) = self.state.lock().unwrap().inbound.last() {
            let _ = tx.send(None);
        }
    }
}

#[async_trait]
impl Connector for FakeBroker {
    async fn connect(&self, url: &Url) -> Result<(Box<dyn FrameSink>, Box<dyn FrameSource>), RelayError> {
        let mut state = self.state.lock().unwrap();
        state.urls.push(url.clone());
        if state.refuse {
            return Err(RelayError::Connect("connection refused".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.inbound.push(tx);
        Ok((
            Box::new(FakeSink {
                state: Arc::clone(&self.state),
            }),
            Box::new(FakeSource { rx }),
        ))
    }
}

struct FakeSink {
    state: Arc<Mutex<BrokerState>>,
}

#[async_trait]
impl FrameSink for FakeSink {
    async fn send_text(&mut self, text: String) -> Result<(), RelayError> {
        self.state.lock().unwrap().sent.push(text);
        Ok(())
    }

    async fn close(&mut self) {
        self.state.lock().unwrap().closed_sinks += 1;
    }
}

struct FakeSource {
    rx: mpsc::UnboundedReceiver<Option<String>>,
}

#[async_trait]
impl FrameSource for FakeSource {
    async fn next_text(&mut self) -> Option<Result<String, RelayError>> {
        match self.rx.recv().await {
            Some(Some(text)) => Some(Ok(text)),
            _ => None,
        }
    }
}

pub fn relay_config() -> RelayConfig {
    RelayConfig::new(Url::parse("wss://broker.test/v2").unwrap())
}

pub fn text(value: &str) -> SettingValue {
    SettingValue::Text(value.to_string())
}

/// Credentials plus a fully configured device; shock interval disabled.
pub fn configured_entries() -> Vec<(String, SettingValue)> {
    vec![
        ("pishockUsername".into(), text("alice")),
        ("pishockApiKey".into(), text("key-123")),
        ("pishockCode".into(), text("SHARE1")),
        ("pishockClientId".into(), text("42")),
        ("pishockShockerId".into(), text("7")),
    ]
}

pub async fn store_with(entries: Vec<(String, SettingValue)>) -> Arc<SettingsStore> {
    Arc::new(SettingsStore::open(Arc::new(MemoryBackend::with_values(entries))).await)
}

/// Poll the relay until `done` holds. Meant for paused-clock tests.
pub async fn wait_for(relay: &RelayHandle, done: impl Fn(&RelayStatus) -> bool) -> RelayStatus {
    for _ in 0..1000 {
        let status = relay.status().await.expect("relay stopped");
        if done(&status) {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("relay never reached the expected state");
}
