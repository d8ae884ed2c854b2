use crate::dispatch::Dispatcher;
use crate::inspector::{BodySink, InspectorError};
use crate::overlay::OverlayControl;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum FrontendError {
    #[error("Launch failed: {0}")]
    Launch(String),
    #[error(transparent)]
    Inspector(#[from] InspectorError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// What a frontend feeds and reads while it runs.
#[derive(Clone)]
pub struct FrontendLink {
    pub dispatcher: Arc<Dispatcher>,
    /// Monitored response bodies.
    pub bodies: BodySink,
    /// Editor focus and page changes, for the overlay.
    pub page_events: mpsc::Sender<OverlayControl>,
}

/// The browser side of a monitoring session (a driven Chromium, or a bridge
/// an extension connects to).
#[async_trait]
pub trait Frontend: Send + Sync {
    /// Start the frontend and begin delivering through `link`.
    async fn launch(&mut self, link: FrontendLink) -> Result<(), FrontendError>;

    /// Stop delivering and release the browser or socket.
    async fn close(&mut self) -> Result<(), FrontendError>;

    async fn is_ready(&self) -> bool;
}
