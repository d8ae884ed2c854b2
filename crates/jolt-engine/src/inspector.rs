//! Response inspection seam shared by the browser front ends.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// A monitored response body, fully read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedBody {
    pub url: String,
    pub body: String,
}

pub type BodySink = mpsc::Sender<CapturedBody>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InspectionStrategy {
    /// Read the response stream while it is delivered.
    StreamFilter,
    /// Wait for the request to complete, then read the body out of band.
    CompletionRefetch,
}

/// What the host platform offers, probed once at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InspectorCapabilities {
    pub response_filter: bool,
    pub completion_events: bool,
}

impl InspectorCapabilities {
    pub fn strategy(&self) -> Option<InspectionStrategy> {
        if self.response_filter {
            Some(InspectionStrategy::StreamFilter)
        } else if self.completion_events {
            Some(InspectionStrategy::CompletionRefetch)
        } else {
            None
        }
    }
}

#[derive(Debug, Error)]
pub enum InspectorError {
    #[error("No response inspection strategy available")]
    Unsupported,
    #[error("Inspector setup failed: {0}")]
    Setup(String),
    #[error("Inspector protocol error: {0}")]
    Protocol(String),
    #[error("Inspector already started")]
    AlreadyStarted,
}

#[async_trait]
pub trait ResponseInspector: Send + Sync {
    fn strategy(&self) -> InspectionStrategy;

    /// Begin delivering monitored bodies to `sink`. Responses are observed,
    /// never held back or altered.
    async fn start(&mut self, sink: BodySink) -> Result<(), InspectorError>;

    async fn stop(&mut self) -> Result<(), InspectorError>;

    fn is_ready(&self) -> bool;
}

/// Hand a body to the pipeline; a closed pipeline just drops it.
pub async fn deliver(sink: &BodySink, body: CapturedBody) {
    if sink.send(body).await.is_err() {
        debug!("Body pipeline closed; dropping captured body");
    }
}

/// Incremental UTF-8 decoder for chunked response bodies.
///
/// A multi-byte sequence split across chunks is held until the next chunk
/// completes it. Invalid bytes decode to U+FFFD.
#[derive(Debug, Default)]
pub struct BodyDecoder {
    pending: Vec<u8>,
    text: String,
}

impl BodyDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    self.text.push_str(valid);
                    self.pending.clear();
                    return;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    self.text
                        .push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(bad) => {
                            self.text.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                        None => {
                            // Incomplete tail; wait for more bytes.
                            self.pending.drain(..valid);
                            return;
                        }
                    }
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.text.len() + self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flush any dangling partial sequence and return the whole body.
    pub fn finish(mut self) -> String {
        if !self.pending.is_empty() {
            self.text.push_str(&String::from_utf8_lossy(&self.pending));
        }
        self.text
    }
}
