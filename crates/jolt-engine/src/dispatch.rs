//! Background message router: classifies captured bodies, fans submission
//! events out to UI contexts, and forwards device commands to the relay.

use crate::classifier::SubmissionClassifier;
use crate::inspector::CapturedBody;
use crate::relay::RelayHandle;
use crate::store::SettingsStore;
use jolt_common::formatter::format_event;
use jolt_common::protocol::{
    BackgroundMessage, ContentMessage, ShockAction, ShockCommand, SubmissionEvent,
};
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

const CONTENT_CHANNEL_CAPACITY: usize = 32;

pub struct Dispatcher {
    store: Arc<SettingsStore>,
    relay: RelayHandle,
    classifier: Mutex<SubmissionClassifier>,
    content: broadcast::Sender<ContentMessage>,
}

impl Dispatcher {
    pub fn new(store: Arc<SettingsStore>, relay: RelayHandle) -> Self {
        let (content, _) = broadcast::channel(CONTENT_CHANNEL_CAPACITY);
        Self {
            store,
            relay,
            classifier: Mutex::new(SubmissionClassifier::new()),
            content,
        }
    }

    pub fn store(&self) -> &Arc<SettingsStore> {
        &self.store
    }

    pub fn relay(&self) -> &RelayHandle {
        &self.relay
    }

    /// Messages for page contexts (overlay, bridge clients).
    pub fn subscribe(&self) -> broadcast::Receiver<ContentMessage> {
        self.content.subscribe()
    }

    pub fn handle(&self, message: BackgroundMessage) {
        match message {
            BackgroundMessage::Shock { payload } => {
                self.relay.send(normalized(ShockAction::Shock, &payload))
            }
            BackgroundMessage::Vibrate { payload } => {
                self.relay.send(normalized(ShockAction::Vibrate, &payload))
            }
            BackgroundMessage::TestVibrate => {
                let settings = self.store.snapshot();
                self.relay.send(ShockCommand::vibrate(
                    settings.vibrate_intensity,
                    settings.vibrate_duration,
                ));
            }
            BackgroundMessage::SubmissionResult { data } => {
                self.submit_value(&data);
            }
        }
    }

    /// Classify a parsed check response and broadcast the resulting event.
    pub fn submit_value(&self, data: &Value) -> Option<SubmissionEvent> {
        let event = self
            .classifier
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .classify(data)?;
        self.publish(event);
        Some(event)
    }

    pub fn submit_text(&self, text: &str) -> Option<SubmissionEvent> {
        let event = self
            .classifier
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .classify_text(text)?;
        self.publish(event);
        Some(event)
    }

    fn publish(&self, event: SubmissionEvent) {
        info!(kind = ?event.kind, success = event.success, "{}", format_event(&event));
        if self
            .content
            .send(ContentMessage::Submission { payload: event })
            .is_err()
        {
            debug!("No page context listening for submission events");
        }
    }
}

/// The message type decides the action; intensity and duration are clamped
/// again since the payload fields are public.
fn normalized(action: ShockAction, payload: &ShockCommand) -> ShockCommand {
    ShockCommand::new(action, f64::from(payload.intensity), payload.duration)
}

/// Feed captured bodies into the dispatcher until every inspector hangs up.
pub fn spawn_body_pump(
    dispatcher: Arc<Dispatcher>,
    mut bodies: mpsc::Receiver<CapturedBody>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(captured) = bodies.recv().await {
            debug!(url = %captured.url, bytes = captured.body.len(), "Captured response body");
            dispatcher.submit_text(&captured.body);
        }
        debug!("Body pump finished");
    })
}
