//! Stream-filter strategy: pause monitored responses at the response stage,
//! read the body, and let the response continue untouched.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::fetch::{
    ContinueRequestParams, DisableParams, EnableParams, EventRequestPaused, GetResponseBodyParams,
    RequestPattern, RequestStage,
};
use futures::StreamExt;
use jolt_engine::inspector::{
    BodyDecoder, BodySink, CapturedBody, InspectionStrategy, InspectorError, ResponseInspector,
    deliver,
};
use jolt_engine::pattern::UrlPattern;
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct FilterInspector {
    page: Page,
    pattern: UrlPattern,
    task: Option<JoinHandle<()>>,
}

impl FilterInspector {
    pub fn new(page: Page, pattern: UrlPattern) -> Self {
        Self {
            page,
            pattern,
            task: None,
        }
    }
}

/// CDP patterns match the whole URL; a trailing `*` admits query strings.
/// [`UrlPattern::matches`] does the exact check afterwards.
pub(crate) fn fetch_patterns(pattern: &UrlPattern) -> EnableParams {
    EnableParams {
        patterns: Some(vec![RequestPattern {
            url_pattern: Some(format!("{}*", pattern.as_str())),
            resource_type: None,
            request_stage: Some(RequestStage::Response),
        }]),
        handle_auth_requests: None,
    }
}

#[async_trait]
impl ResponseInspector for FilterInspector {
    fn strategy(&self) -> InspectionStrategy {
        InspectionStrategy::StreamFilter
    }

    async fn start(&mut self, sink: BodySink) -> Result<(), InspectorError> {
        if self.task.is_some() {
            return Err(InspectorError::AlreadyStarted);
        }

        let mut paused = self
            .page
            .event_listener::<EventRequestPaused>()
            .await
            .map_err(|e| InspectorError::Setup(e.to_string()))?;
        self.page
            .execute(fetch_patterns(&self.pattern))
            .await
            .map_err(|e| InspectorError::Setup(format!("Fetch.enable: {}", e)))?;

        let page = self.page.clone();
        let pattern = self.pattern.clone();
        self.task = Some(tokio::spawn(async move {
            while let Some(event) = paused.next().await {
                let page = page.clone();
                let pattern = pattern.clone();
                let sink = sink.clone();
                tokio::spawn(async move {
                    handle_paused(&page, &pattern, &event, &sink).await;
                });
            }
            debug!("Fetch event stream ended");
        }));

        info!(pattern = self.pattern.as_str(), "Response filter installed");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), InspectorError> {
        if let Some(task) = self.task.take() {
            task.abort();
            self.page
                .execute(DisableParams::default())
                .await
                .map_err(|e| InspectorError::Protocol(e.to_string()))?;
        }
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.task.is_some()
    }
}

async fn handle_paused(page: &Page, pattern: &UrlPattern, event: &EventRequestPaused, sink: &BodySink) {
    let url = event.request.url.clone();
    let body = if pattern.matches(&url) {
        match page
            .execute(GetResponseBodyParams::new(event.request_id.clone()))
            .await
        {
            Ok(reply) => decode_body(&reply.result.body, reply.result.base64_encoded)
                .inspect_err(|e| debug!(url = %url, error = %e, "Undecodable response body"))
                .ok(),
            Err(e) => {
                debug!(url = %url, error = %e, "Could not read response body");
                None
            }
        }
    } else {
        None
    };

    // Always release the response, whatever happened above.
    if let Err(e) = page
        .execute(ContinueRequestParams::new(event.request_id.clone()))
        .await
    {
        warn!(url = %url, error = %e, "Failed to continue paused response");
    }

    if let Some(body) = body {
        deliver(sink, CapturedBody { url, body }).await;
    }
}

pub(crate) fn decode_body(body: &str, base64_encoded: bool) -> Result<String, InspectorError> {
    if !base64_encoded {
        return Ok(body.to_string());
    }
    let bytes = STANDARD
        .decode(body)
        .map_err(|e| InspectorError::Protocol(format!("base64: {}", e)))?;
    let mut decoder = BodyDecoder::new();
    decoder.push(&bytes);
    Ok(decoder.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_plain_and_base64_bodies() {
        assert_eq!(decode_body("{\"a\":1}", false).unwrap(), "{\"a\":1}");
        let encoded = STANDARD.encode("{\"state\":\"SUCCESS\"}");
        assert_eq!(decode_body(&encoded, true).unwrap(), "{\"state\":\"SUCCESS\"}");
        assert!(decode_body("%%%", true).is_err());
    }

    #[test]
    fn test_fetch_pattern_admits_query_strings() {
        let params = fetch_patterns(&UrlPattern::submission_check());
        let patterns = params.patterns.unwrap();
        assert_eq!(
            patterns[0].url_pattern.as_deref(),
            Some("https://leetcode.com/submissions/detail/*/check/*")
        );
        assert_eq!(patterns[0].request_stage, Some(RequestStage::Response));
    }
}
