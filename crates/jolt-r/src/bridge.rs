//! Routes what the extension sends: captured response pieces go to the body
//! sink, page events to the overlay, background messages to the dispatcher.

use crate::server::{BridgeServer, InboundEvent, ServerHandle};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use jolt_engine::dispatch::Dispatcher;
use jolt_engine::frontend::{Frontend, FrontendError, FrontendLink};
use jolt_engine::inspector::{BodyDecoder, CapturedBody, InspectionStrategy, InspectorError, deliver};
use jolt_engine::overlay::OverlayControl;
use jolt_engine::pattern::UrlPattern;
use jolt_engine::protocol::{BridgeInbound, CaptureFrame, ContentMessage};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Bodies one connection may have in flight before the oldest is dropped.
pub const MAX_PENDING_BODIES: usize = 16;

struct PendingBody {
    url: String,
    decoder: BodyDecoder,
    seq: u64,
}

/// Reassembles filtered response chunks, one body per request id.
///
/// Holds at most [`MAX_PENDING_BODIES`]; a body whose stop never arrives is
/// evicted once newer requests push it out.
#[derive(Default)]
pub struct ChunkAssembler {
    pending: HashMap<String, PendingBody>,
    next_seq: u64,
}

impl ChunkAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one base64 chunk. The URL is only read from the first chunk of
    /// a request; later chunks may leave it empty.
    pub fn push(&mut self, request_id: &str, url: &str, data: &str) -> Result<(), InspectorError> {
        let bytes = STANDARD
            .decode(data)
            .map_err(|e| InspectorError::Protocol(format!("base64: {}", e)))?;
        if !self.pending.contains_key(request_id) {
            if self.pending.len() >= MAX_PENDING_BODIES {
                self.evict_oldest();
            }
            self.next_seq += 1;
            self.pending.insert(
                request_id.to_string(),
                PendingBody {
                    url: url.to_string(),
                    decoder: BodyDecoder::new(),
                    seq: self.next_seq,
                },
            );
        }
        if let Some(entry) = self.pending.get_mut(request_id) {
            entry.decoder.push(&bytes);
        }
        Ok(())
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .pending
            .iter()
            .min_by_key(|(_, body)| body.seq)
            .map(|(id, _)| id.clone());
        if let Some(id) = oldest {
            warn!(request_id = %id, "Dropping response that never finished");
            self.pending.remove(&id);
        }
    }

    pub fn is_pending(&self, request_id: &str) -> bool {
        self.pending.contains_key(request_id)
    }

    pub fn finish(&mut self, request_id: &str) -> Option<CapturedBody> {
        let pending = self.pending.remove(request_id)?;
        Some(CapturedBody {
            url: pending.url,
            body: pending.decoder.finish(),
        })
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Per-session routing state for one bridge. Chunks are assembled per
/// connection, so two extensions reusing a request id never share a body.
pub struct BridgeRouter {
    pattern: UrlPattern,
    link: FrontendLink,
    assemblers: HashMap<u64, ChunkAssembler>,
    strategy: Option<InspectionStrategy>,
}

impl BridgeRouter {
    pub fn new(pattern: UrlPattern, link: FrontendLink) -> Self {
        Self {
            pattern,
            link,
            assemblers: HashMap::new(),
            strategy: None,
        }
    }

    /// What the last `hello` announced.
    pub fn strategy(&self) -> Option<InspectionStrategy> {
        self.strategy
    }

    /// Bodies still waiting for their stop frame, across all connections.
    pub fn pending_bodies(&self) -> usize {
        self.assemblers.values().map(ChunkAssembler::len).sum()
    }

    pub async fn handle(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::Frame { connection, frame } => self.route(connection, frame).await,
            InboundEvent::Disconnected { connection } => {
                if let Some(assembler) = self.assemblers.remove(&connection) {
                    if !assembler.is_empty() {
                        debug!(connection, abandoned = assembler.len(), "Dropping unfinished responses");
                    }
                }
            }
        }
    }

    pub async fn route(&mut self, connection: u64, inbound: BridgeInbound) {
        match inbound {
            BridgeInbound::Background(message) => self.link.dispatcher.handle(message),
            BridgeInbound::Capture(frame) => self.capture(connection, frame).await,
        }
    }

    async fn capture(&mut self, connection: u64, frame: CaptureFrame) {
        match frame {
            CaptureFrame::Hello { response_filter } => {
                let strategy = if response_filter {
                    InspectionStrategy::StreamFilter
                } else {
                    InspectionStrategy::CompletionRefetch
                };
                info!(?strategy, "Extension announced capture strategy");
                self.strategy = Some(strategy);
            }
            CaptureFrame::Chunk {
                request_id,
                url,
                data,
            } => {
                let assembler = self.assemblers.entry(connection).or_default();
                if !assembler.is_pending(&request_id) && !self.pattern.matches(&url) {
                    return;
                }
                if let Err(e) = assembler.push(&request_id, &url, &data) {
                    warn!(request_id = %request_id, error = %e, "Dropping undecodable chunk");
                }
            }
            CaptureFrame::Stop { request_id } => {
                let body = self
                    .assemblers
                    .get_mut(&connection)
                    .and_then(|assembler| assembler.finish(&request_id));
                if let Some(body) = body {
                    deliver(&self.link.bodies, body).await;
                }
            }
            CaptureFrame::Completed { url, body } => {
                if self.pattern.matches(&url) {
                    deliver(&self.link.bodies, CapturedBody { url, body }).await;
                } else {
                    debug!(url = %url, "Ignoring completed response outside the pattern");
                }
            }
            CaptureFrame::EditorFocused => self.page_event(OverlayControl::Focus).await,
            CaptureFrame::ProblemOpened { url } => {
                info!("Problem page opened: {}", url);
                self.page_event(OverlayControl::Reset).await;
            }
        }
    }

    async fn page_event(&self, control: OverlayControl) {
        if self.link.page_events.send(control).await.is_err() {
            debug!("Overlay not running; page event dropped");
        }
    }
}

/// Frontend for a browser extension that connects to a local WebSocket.
pub struct RemoteBridge {
    port: u16,
    pattern: UrlPattern,
    server: Option<ServerHandle>,
    tasks: Vec<JoinHandle<()>>,
}

impl RemoteBridge {
    pub fn new(port: u16, pattern: UrlPattern) -> Self {
        Self {
            port,
            pattern,
            server: None,
            tasks: Vec::new(),
        }
    }

    pub fn server(&self) -> Option<&ServerHandle> {
        self.server.as_ref()
    }
}

#[async_trait]
impl Frontend for RemoteBridge {
    async fn launch(&mut self, link: FrontendLink) -> Result<(), FrontendError> {
        info!("Launching extension bridge on port {}", self.port);
        let handle = BridgeServer::new(self.port).start().await?;

        self.tasks.push(forward_content(
            Arc::clone(&link.dispatcher),
            handle.outbound_tx.clone(),
        ));

        let inbound = Arc::clone(&handle.inbound_rx);
        let mut router = BridgeRouter::new(self.pattern.clone(), link);
        self.tasks.push(tokio::spawn(async move {
            let mut inbound = inbound.lock().await;
            while let Some(event) = inbound.recv().await {
                router.handle(event).await;
            }
            debug!("Bridge router finished");
        }));

        self.server = Some(handle);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), FrontendError> {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Some(server) = self.server.take() {
            server.shutdown();
        }
        Ok(())
    }

    async fn is_ready(&self) -> bool {
        self.server.is_some()
    }
}

/// Relay submission events to every connected extension.
fn forward_content(
    dispatcher: Arc<Dispatcher>,
    outbound: broadcast::Sender<ContentMessage>,
) -> JoinHandle<()> {
    let mut content = dispatcher.subscribe();
    tokio::spawn(async move {
        loop {
            match content.recv().await {
                Ok(message) => {
                    // No extension connected yet is fine.
                    let _ = outbound.send(message);
                }
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "Bridge lagged behind content"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assembler_joins_chunks_split_inside_a_character() {
        let text = "{\"status_msg\":\"Accepted ✓\"}".as_bytes();
        let split = text.len() - 3;
        let mut assembler = ChunkAssembler::new();

        assembler
            .push("r1", "https://x/check/", &STANDARD.encode(&text[..split]))
            .unwrap();
        assembler.push("r1", "", &STANDARD.encode(&text[split..])).unwrap();

        let body = assembler.finish("r1").unwrap();
        assert_eq!(body.url, "https://x/check/");
        assert_eq!(body.body, "{\"status_msg\":\"Accepted ✓\"}");
        assert!(assembler.is_empty());
    }

    #[test]
    fn test_assembler_keeps_requests_apart() {
        let mut assembler = ChunkAssembler::new();
        assembler.push("a", "u1", &STANDARD.encode("one")).unwrap();
        assembler.push("b", "u2", &STANDARD.encode("two")).unwrap();

        assert_eq!(assembler.len(), 2);
        assert_eq!(assembler.finish("b").unwrap().body, "two");
        assert_eq!(assembler.finish("a").unwrap().body, "one");
        assert!(assembler.finish("a").is_none());
    }

    #[test]
    fn test_assembler_drops_oldest_unfinished_body() {
        let mut assembler = ChunkAssembler::new();
        for i in 0..MAX_PENDING_BODIES {
            assembler.push(&format!("r{}", i), "u", &STANDARD.encode("x")).unwrap();
        }
        // Continuing a pending body never evicts.
        assembler.push("r0", "", &STANDARD.encode("y")).unwrap();
        assert_eq!(assembler.len(), MAX_PENDING_BODIES);

        assembler.push("late", "u", &STANDARD.encode("z")).unwrap();
        assert_eq!(assembler.len(), MAX_PENDING_BODIES);
        assert!(!assembler.is_pending("r0"));
        assert!(assembler.is_pending("r1"));
        assert_eq!(assembler.finish("late").unwrap().body, "z");
    }

    #[test]
    fn test_assembler_rejects_bad_base64() {
        let mut assembler = ChunkAssembler::new();
        assert!(assembler.push("a", "u", "not base64!").is_err());
        assert!(!assembler.is_pending("a"));
    }
}
