use crate::cdp::CdpClient;
use crate::features::{watch_editor_focus, watch_problem_navigation};
use crate::filter::FilterInspector;
use crate::refetch::RefetchInspector;
use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::{fetch, network};
use jolt_engine::frontend::{Frontend, FrontendError, FrontendLink};
use jolt_engine::inspector::{
    InspectionStrategy, InspectorCapabilities, InspectorError, ResponseInspector,
};
use jolt_engine::pattern::UrlPattern;
use tracing::{info, warn};

/// Matches nothing; only used to see whether `Fetch.enable` is accepted.
const PROBE_PATTERN: &str = "jolt-probe://*";

/// Ask the page which interception domains it supports.
pub async fn probe_capabilities(page: &Page) -> InspectorCapabilities {
    let probe = fetch::EnableParams {
        patterns: Some(vec![fetch::RequestPattern {
            url_pattern: Some(PROBE_PATTERN.to_string()),
            resource_type: None,
            request_stage: Some(fetch::RequestStage::Response),
        }]),
        handle_auth_requests: None,
    };
    let response_filter = match page.execute(probe).await {
        Ok(_) => {
            if let Err(e) = page.execute(fetch::DisableParams::default()).await {
                warn!("Fetch.disable after probe failed: {}", e);
            }
            true
        }
        Err(e) => {
            info!("Fetch domain unavailable: {}", e);
            false
        }
    };
    let completion_events = page.execute(network::EnableParams::default()).await.is_ok();

    InspectorCapabilities {
        response_filter,
        completion_events,
    }
}

/// The stream filter when the page supports it, the refetch otherwise.
pub fn select_inspector(
    page: &Page,
    pattern: UrlPattern,
    capabilities: InspectorCapabilities,
) -> Result<Box<dyn ResponseInspector>, InspectorError> {
    match capabilities.strategy() {
        Some(InspectionStrategy::StreamFilter) => {
            Ok(Box::new(FilterInspector::new(page.clone(), pattern)))
        }
        Some(InspectionStrategy::CompletionRefetch) => {
            Ok(Box::new(RefetchInspector::new(page.clone(), pattern)))
        }
        None => Err(InspectorError::Unsupported),
    }
}

/// Drives a local Chromium on the problem site and watches its submissions.
pub struct HeadlessMonitor {
    visible: bool,
    start_url: String,
    pattern: UrlPattern,
    client: Option<CdpClient>,
    inspector: Option<Box<dyn ResponseInspector>>,
}

impl HeadlessMonitor {
    pub fn new(visible: bool, start_url: impl Into<String>, pattern: UrlPattern) -> Self {
        Self {
            visible,
            start_url: start_url.into(),
            pattern,
            client: None,
            inspector: None,
        }
    }

    pub fn strategy(&self) -> Option<InspectionStrategy> {
        self.inspector.as_ref().map(|i| i.strategy())
    }
}

#[async_trait]
impl Frontend for HeadlessMonitor {
    async fn launch(&mut self, link: FrontendLink) -> Result<(), FrontendError> {
        info!("Launching headless monitor (Chromium)...");
        let client = CdpClient::launch(self.visible)
            .await
            .map_err(|e| FrontendError::Launch(e.to_string()))?;

        let capabilities = probe_capabilities(&client.page).await;
        let mut inspector = select_inspector(&client.page, self.pattern.clone(), capabilities)?;
        inspector.start(link.bodies.clone()).await?;
        info!(strategy = ?inspector.strategy(), "Response inspector running");

        watch_editor_focus(&client.page, link.page_events.clone())
            .await
            .map_err(|e| FrontendError::Launch(e.to_string()))?;
        watch_problem_navigation(&client.page, self.start_url.clone(), link.page_events.clone())
            .await
            .map_err(|e| FrontendError::Launch(e.to_string()))?;

        info!("Opening {}", self.start_url);
        client
            .page
            .goto(self.start_url.as_str())
            .await
            .map_err(|e| FrontendError::Launch(e.to_string()))?;

        self.inspector = Some(inspector);
        self.client = Some(client);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), FrontendError> {
        if let Some(mut inspector) = self.inspector.take() {
            if let Err(e) = inspector.stop().await {
                warn!("Stopping inspector: {}", e);
            }
        }
        if let Some(client) = self.client.take() {
            client
                .close()
                .await
                .map_err(|e| FrontendError::Launch(e.to_string()))?;
        }
        Ok(())
    }

    async fn is_ready(&self) -> bool {
        self.client.is_some() && self.inspector.as_ref().is_some_and(|i| i.is_ready())
    }
}
