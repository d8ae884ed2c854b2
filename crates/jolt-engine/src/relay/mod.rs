//! Device-command relay.
//!
//! One actor task owns the broker connection and handles every event in
//! arrival order: commands, credential changes, socket open/close, and the two
//! timers (keepalive and deferred reconnect). Each timer is a single
//! `JoinHandle`; scheduling one while it is already pending is a no-op.
//!
//! Every connection attempt gets a new generation number. Events tagged with
//! an older generation belong to a connection that was explicitly closed and
//! are ignored, so an explicit disconnect never triggers the automatic
//! reconnect path.

mod transport;

pub use transport::{Connector, FrameSink, FrameSource, WsConnector};

use crate::store::SettingsStore;
use jolt_common::error::RelayError;
use jolt_common::protocol::{BrokerReply, BrokerRequest, ShockCommand, broker_url};
use jolt_common::settings::SettingKey;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub broker_url: Url,
    pub ping_interval: Duration,
    pub reconnect_delay: Duration,
    /// Label attached to every published command.
    pub origin: String,
}

impl RelayConfig {
    pub fn new(broker_url: Url) -> Self {
        Self {
            broker_url,
            ping_interval: DEFAULT_PING_INTERVAL,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            origin: jolt_common::protocol::DEFAULT_ORIGIN.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayStatus {
    pub state: ConnectionState,
    pub reconnect_pending: bool,
    pub keepalive_active: bool,
    pub connect_attempts: u64,
    pub commands_sent: u64,
    pub commands_dropped: u64,
}

enum RelayEvent {
    Send(ShockCommand),
    CredentialsChanged,
    Opened {
        generation: u64,
        sink: Box<dyn FrameSink>,
    },
    Failed {
        generation: u64,
        error: RelayError,
    },
    Frame {
        generation: u64,
        text: String,
    },
    Closed {
        generation: u64,
    },
    ReconnectDue {
        timer: u64,
    },
    PingDue,
    Status(oneshot::Sender<RelayStatus>),
    Shutdown(oneshot::Sender<()>),
}

/// Cheap, cloneable entry point to the relay task.
#[derive(Clone)]
pub struct RelayHandle {
    tx: mpsc::UnboundedSender<RelayEvent>,
}

impl RelayHandle {
    /// Fire and forget. Commands that cannot go out right now are dropped.
    pub fn send(&self, command: ShockCommand) {
        if self.tx.send(RelayEvent::Send(command)).is_err() {
            warn!(action = ?command.action, "Relay stopped; dropping command");
        }
    }

    pub async fn status(&self) -> Option<RelayStatus> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(RelayEvent::Status(tx)).ok()?;
        rx.await.ok()
    }

    /// Close the connection and stop the relay task.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(RelayEvent::Shutdown(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    attempts: u64,
    sent: u64,
    dropped: u64,
}

pub struct Relay {
    config: RelayConfig,
    connector: Arc<dyn Connector>,
    store: Arc<SettingsStore>,
    events: mpsc::UnboundedSender<RelayEvent>,
    state: ConnectionState,
    generation: u64,
    sink: Option<Box<dyn FrameSink>>,
    connection: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
    /// Id of the newest reconnect timer; a firing older timer is stale.
    reconnect_timer: u64,
    keepalive: Option<JoinHandle<()>>,
    counters: Counters,
}

impl Relay {
    /// Start the relay task. It connects right away when credentials exist
    /// and follows credential changes published by `store`.
    pub fn spawn(
        config: RelayConfig,
        connector: Arc<dyn Connector>,
        store: Arc<SettingsStore>,
    ) -> RelayHandle {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut credentials = store.subscribe().only(&SettingKey::CREDENTIALS);
        let forward = tx.clone();
        tokio::spawn(async move {
            while credentials.recv().await.is_some() {
                if forward.send(RelayEvent::CredentialsChanged).is_err() {
                    break;
                }
            }
        });

        let relay = Relay::new(config, connector, store, tx.clone());
        tokio::spawn(relay.run(rx));
        RelayHandle { tx }
    }

    fn new(
        config: RelayConfig,
        connector: Arc<dyn Connector>,
        store: Arc<SettingsStore>,
        events: mpsc::UnboundedSender<RelayEvent>,
    ) -> Self {
        Self {
            config,
            connector,
            store,
            events,
            state: ConnectionState::Disconnected,
            generation: 0,
            sink: None,
            connection: None,
            reconnect: None,
            reconnect_timer: 0,
            keepalive: None,
            counters: Counters::default(),
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<RelayEvent>) {
        self.connect();
        while let Some(event) = rx.recv().await {
            if !self.handle(event).await {
                break;
            }
        }
        debug!("Relay task finished");
    }

    /// Returns `false` once the relay should stop.
    async fn handle(&mut self, event: RelayEvent) -> bool {
        match event {
            RelayEvent::Send(command) => self.send_command(command).await,
            RelayEvent::CredentialsChanged => {
                info!("Broker credentials changed; reconnecting");
                self.disconnect().await;
                self.connect();
            }
            RelayEvent::Opened { generation, mut sink } => {
                if generation != self.generation || self.state != ConnectionState::Connecting {
                    debug!(generation, "Closing socket of an abandoned attempt");
                    sink.close().await;
                    return true;
                }
                info!("Broker connected");
                self.state = ConnectionState::Connected;
                self.sink = Some(sink);
                self.start_keepalive();
            }
            RelayEvent::Failed { generation, error } => {
                if generation == self.generation {
                    warn!(error = %error, "Broker connection failed");
                    self.on_closed();
                }
            }
            RelayEvent::Frame { generation, text } => {
                if generation == self.generation {
                    handle_reply(&text);
                }
            }
            RelayEvent::Closed { generation } => {
                if generation == self.generation {
                    info!("Broker connection closed");
                    self.on_closed();
                } else {
                    debug!(generation, "Ignoring close of a replaced connection");
                }
            }
            RelayEvent::ReconnectDue { timer } => {
                if timer == self.reconnect_timer && self.reconnect.is_some() {
                    self.reconnect = None;
                    self.connect();
                } else {
                    debug!(timer, "Ignoring cancelled reconnect timer");
                }
            }
            RelayEvent::PingDue => self.ping().await,
            RelayEvent::Status(reply) => {
                let _ = reply.send(self.status());
            }
            RelayEvent::Shutdown(reply) => {
                self.disconnect().await;
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn status(&self) -> RelayStatus {
        RelayStatus {
            state: self.state,
            reconnect_pending: self.reconnect.is_some(),
            keepalive_active: self.keepalive.is_some(),
            connect_attempts: self.counters.attempts,
            commands_sent: self.counters.sent,
            commands_dropped: self.counters.dropped,
        }
    }

    /// `Disconnected -> Connecting`, when credentials exist.
    fn connect(&mut self) {
        if self.state != ConnectionState::Disconnected {
            return;
        }
        let settings = self.store.snapshot();
        if !settings.has_credentials() {
            info!("Broker credentials not configured");
            return;
        }

        self.cancel_reconnect();
        self.generation += 1;
        self.counters.attempts += 1;
        self.state = ConnectionState::Connecting;

        let url = broker_url(
            &self.config.broker_url,
            &settings.pishock_username,
            &settings.pishock_api_key,
        );
        info!(
            host = self.config.broker_url.host_str().unwrap_or_default(),
            attempt = self.counters.attempts,
            "Connecting to broker"
        );

        let generation = self.generation;
        let connector = Arc::clone(&self.connector);
        let events = self.events.clone();
        self.connection = Some(tokio::spawn(async move {
            let (sink, mut source) = match connector.connect(&url).await {
                Ok(pair) => pair,
                Err(error) => {
                    let _ = events.send(RelayEvent::Failed { generation, error });
                    return;
                }
            };
            if events.send(RelayEvent::Opened { generation, sink }).is_err() {
                return;
            }
            while let Some(frame) = source.next_text().await {
                match frame {
                    Ok(text) => {
                        if events.send(RelayEvent::Frame { generation, text }).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Broker socket error");
                        break;
                    }
                }
            }
            let _ = events.send(RelayEvent::Closed { generation });
        }));
    }

    /// Explicit close. Bumping the generation first detaches the close
    /// handler of the current connection.
    async fn disconnect(&mut self) {
        self.stop_keepalive();
        self.cancel_reconnect();
        self.generation += 1;
        if let Some(task) = self.connection.take() {
            task.abort();
        }
        if let Some(mut sink) = self.sink.take() {
            sink.close().await;
        }
        self.state = ConnectionState::Disconnected;
    }

    /// Unexpected close or error: `-> Disconnected` plus one pending reconnect.
    fn on_closed(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.sink = None;
        if let Some(task) = self.connection.take() {
            task.abort();
        }
        self.stop_keepalive();
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if self.reconnect.is_some() {
            debug!("Reconnect already pending");
            return;
        }
        let delay = self.config.reconnect_delay;
        let events = self.events.clone();
        self.reconnect_timer += 1;
        let timer = self.reconnect_timer;
        info!(delay_ms = delay.as_millis() as u64, timer, "Scheduling broker reconnect");
        self.reconnect = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(RelayEvent::ReconnectDue { timer });
        }));
    }

    fn cancel_reconnect(&mut self) {
        if let Some(timer) = self.reconnect.take() {
            timer.abort();
        }
    }

    fn start_keepalive(&mut self) {
        self.stop_keepalive();
        let period = self.config.ping_interval;
        let events = self.events.clone();
        self.keepalive = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                if events.send(RelayEvent::PingDue).is_err() {
                    break;
                }
            }
        }));
    }

    fn stop_keepalive(&mut self) {
        if let Some(timer) = self.keepalive.take() {
            timer.abort();
        }
    }

    async fn ping(&mut self) {
        if self.state != ConnectionState::Connected {
            return;
        }
        let Ok(ping) = BrokerRequest::ping().to_json() else {
            return;
        };
        if let Err(e) = self.write(ping).await {
            warn!(error = %e, "Keepalive failed");
            self.on_closed();
        }
    }

    async fn send_command(&mut self, command: ShockCommand) {
        let settings = self.store.snapshot();
        let Some(device) = settings.device_identity() else {
            warn!(action = ?command.action, "Device not configured; dropping command");
            self.counters.dropped += 1;
            return;
        };

        if self.state != ConnectionState::Connected {
            warn!(state = ?self.state, "Broker not connected; dropping command and reconnecting");
            self.counters.dropped += 1;
            self.connect();
            return;
        }

        let request = match BrokerRequest::publish(&device, &command, &self.config.origin)
            .and_then(|request| request.to_json())
        {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Cannot encode command; dropping");
                self.counters.dropped += 1;
                return;
            }
        };

        match self.write(request).await {
            Ok(()) => {
                self.counters.sent += 1;
                info!(
                    action = ?command.action,
                    intensity = command.intensity,
                    duration = command.duration,
                    "Sent command"
                );
            }
            Err(e) => {
                error!(error = %e, "Failed to send command");
                self.counters.dropped += 1;
                self.on_closed();
            }
        }
    }

    async fn write(&mut self, text: String) -> Result<(), RelayError> {
        match self.sink.as_mut() {
            Some(sink) => sink.send_text(text).await,
            None => Err(RelayError::NotConnected),
        }
    }
}

fn handle_reply(text: &str) {
    match serde_json::from_str::<BrokerReply>(text) {
        Ok(reply) if reply.is_error => {
            error!(
                message = reply.message.as_deref().unwrap_or_default(),
                "Broker reported an error"
            );
        }
        Ok(_) => debug!("Broker reply received"),
        Err(_) => debug!("Ignoring non-JSON broker frame"),
    }
}
