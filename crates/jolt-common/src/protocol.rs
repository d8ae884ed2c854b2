use crate::error::ProtocolError;
use crate::settings::DeviceIdentity;
use serde::{Deserialize, Serialize};
use url::Url;

pub const DEFAULT_BROKER_URL: &str = "wss://broker.pishock.com/v2";
pub const DEFAULT_ORIGIN: &str = "leetcode-pishock";

// ---------------------------------------------------------------------------
// Commands and events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShockAction {
    Shock,
    Vibrate,
}

impl ShockAction {
    /// Single-character operation mode understood by the broker.
    pub fn mode(&self) -> &'static str {
        match self {
            ShockAction::Shock => "s",
            ShockAction::Vibrate => "v",
        }
    }
}

/// A remote-actuation instruction. Duration is in seconds.
///
/// Decoding goes through [`ShockCommand::new`], so a payload from another
/// context is clamped like a locally built one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawShockCommand")]
pub struct ShockCommand {
    pub action: ShockAction,
    pub intensity: u8,
    pub duration: f64,
}

/// Wire form: fractional and out-of-range intensities are accepted.
#[derive(Deserialize)]
struct RawShockCommand {
    action: ShockAction,
    intensity: f64,
    duration: f64,
}

impl From<RawShockCommand> for ShockCommand {
    fn from(raw: RawShockCommand) -> Self {
        ShockCommand::new(raw.action, raw.intensity, raw.duration)
    }
}

impl ShockCommand {
    /// Intensity is rounded into 1..=100, negative or non-finite durations
    /// become zero.
    pub fn new(action: ShockAction, intensity: f64, duration: f64) -> Self {
        let intensity = if intensity.is_finite() {
            intensity.round().clamp(1.0, 100.0) as u8
        } else {
            1
        };
        let duration = if duration.is_finite() { duration.max(0.0) } else { 0.0 };
        Self {
            action,
            intensity,
            duration,
        }
    }

    pub fn shock(intensity: f64, duration: f64) -> Self {
        Self::new(ShockAction::Shock, intensity, duration)
    }

    pub fn vibrate(intensity: f64, duration: f64) -> Self {
        Self::new(ShockAction::Vibrate, intensity, duration)
    }

    pub fn duration_ms(&self) -> u64 {
        (self.duration * 1000.0).round() as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionKind {
    /// Run against the sample cases.
    Test,
    /// Judged submission.
    Final,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionEvent {
    pub kind: SubmissionKind,
    pub success: bool,
}

// ---------------------------------------------------------------------------
// Inter-context messages
// ---------------------------------------------------------------------------

/// Messages sent to the background context (relay + classifier).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BackgroundMessage {
    Shock { payload: ShockCommand },
    Vibrate { payload: ShockCommand },
    TestVibrate,
    SubmissionResult { data: serde_json::Value },
}

/// Messages sent from the background context to page/UI contexts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ContentMessage {
    Submission { payload: SubmissionEvent },
}

/// Frames a browser extension pushes to the local bridge while capturing a
/// monitored response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CaptureFrame {
    /// Announces what the extension's platform can do.
    Hello {
        #[serde(default)]
        response_filter: bool,
    },
    /// Raw response chunk from a response filter, base64-encoded.
    Chunk {
        request_id: String,
        #[serde(default)]
        url: String,
        data: String,
    },
    /// The filtered response finished.
    Stop { request_id: String },
    /// Body read by the page context after the request completed.
    Completed { url: String, body: String },
    /// The user clicked into the code editor.
    EditorFocused,
    /// A problem page was (re)loaded.
    ProblemOpened {
        #[serde(default)]
        url: String,
    },
}

/// Anything the bridge accepts from an extension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BridgeInbound {
    Capture(CaptureFrame),
    Background(BackgroundMessage),
}

// ---------------------------------------------------------------------------
// Broker wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "Operation", rename_all = "UPPERCASE")]
pub enum BrokerRequest {
    Ping,
    Publish {
        #[serde(rename = "PublishCommands")]
        publish_commands: Vec<PublishCommand>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishCommand {
    #[serde(rename = "Target")]
    pub target: String,
    #[serde(rename = "Body")]
    pub body: PublishBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishBody {
    /// Shocker id.
    pub id: u64,
    /// Mode: `s` or `v`.
    pub m: String,
    /// Intensity 1..=100.
    pub i: u8,
    /// Duration in milliseconds.
    pub d: u64,
    /// Repeat flag.
    pub r: bool,
    pub l: PublishLabel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishLabel {
    pub ty: String,
    pub w: bool,
    pub h: bool,
    pub o: String,
}

impl BrokerRequest {
    pub fn ping() -> Self {
        BrokerRequest::Ping
    }

    pub fn publish(
        device: &DeviceIdentity,
        command: &ShockCommand,
        origin: &str,
    ) -> Result<Self, ProtocolError> {
        let id = device
            .shocker_id
            .trim()
            .parse::<u64>()
            .map_err(|_| ProtocolError::InvalidShockerId(device.shocker_id.clone()))?;

        Ok(BrokerRequest::Publish {
            publish_commands: vec![PublishCommand {
                target: routing_target(device),
                body: PublishBody {
                    id,
                    m: command.action.mode().to_string(),
                    i: command.intensity,
                    d: command.duration_ms(),
                    r: true,
                    l: PublishLabel {
                        ty: "sc".into(),
                        w: false,
                        h: false,
                        o: origin.to_string(),
                    },
                },
            }],
        })
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// `c<clientId>-sops-<shareCode>`
pub fn routing_target(device: &DeviceIdentity) -> String {
    format!("c{}-sops-{}", device.client_id, device.share_code)
}

/// Broker URL with credentials embedded as query parameters.
pub fn broker_url(base: &Url, username: &str, api_key: &str) -> Url {
    let mut url = base.clone();
    url.query_pairs_mut()
        .append_pair("Username", username)
        .append_pair("ApiKey", api_key);
    url
}

/// Replies pushed by the broker. Only the error flag is interpreted.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BrokerReply {
    #[serde(rename = "IsError", default)]
    pub is_error: bool,
    #[serde(rename = "Message", default)]
    pub message: Option<String>,
}
