//! Completion-refetch strategy: note monitored requests, and once one
//! finishes loading fetch the same URL again with the page's cookies.

use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent,
};
use futures::StreamExt;
use jolt_engine::inspector::{
    BodySink, CapturedBody, InspectionStrategy, InspectorError, ResponseInspector, deliver,
};
use jolt_engine::pattern::UrlPattern;
use std::collections::HashMap;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub struct RefetchInspector {
    page: Page,
    pattern: UrlPattern,
    client: reqwest::Client,
    task: Option<JoinHandle<()>>,
}

impl RefetchInspector {
    pub fn new(page: Page, pattern: UrlPattern) -> Self {
        Self {
            page,
            pattern,
            client: reqwest::Client::new(),
            task: None,
        }
    }
}

#[async_trait]
impl ResponseInspector for RefetchInspector {
    fn strategy(&self) -> InspectionStrategy {
        InspectionStrategy::CompletionRefetch
    }

    async fn start(&mut self, sink: BodySink) -> Result<(), InspectorError> {
        if self.task.is_some() {
            return Err(InspectorError::AlreadyStarted);
        }

        let setup = |e: chromiumoxide::error::CdpError| InspectorError::Setup(e.to_string());
        let mut requests = self
            .page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .map_err(setup)?;
        let mut finished = self
            .page
            .event_listener::<EventLoadingFinished>()
            .await
            .map_err(setup)?;
        let mut failed = self
            .page
            .event_listener::<EventLoadingFailed>()
            .await
            .map_err(setup)?;
        self.page
            .execute(EnableParams::default())
            .await
            .map_err(setup)?;

        let page = self.page.clone();
        let pattern = self.pattern.clone();
        let client = self.client.clone();
        self.task = Some(tokio::spawn(async move {
            let mut pending: HashMap<String, String> = HashMap::new();
            loop {
                tokio::select! {
                    Some(event) = requests.next() => {
                        if pattern.matches(&event.request.url) {
                            pending.insert(event.request_id.inner().clone(), event.request.url.clone());
                        }
                    }
                    Some(event) = finished.next() => {
                        let Some(url) = pending.remove(event.request_id.inner()) else {
                            continue;
                        };
                        let page = page.clone();
                        let client = client.clone();
                        let sink = sink.clone();
                        tokio::spawn(async move {
                            match refetch(&page, &client, &url).await {
                                Ok(body) => deliver(&sink, CapturedBody { url, body }).await,
                                Err(e) => debug!(url = %url, error = %e, "Refetch failed"),
                            }
                        });
                    }
                    Some(event) = failed.next() => {
                        pending.remove(event.request_id.inner());
                    }
                    else => break,
                }
            }
            debug!("Network event streams ended");
        }));

        info!(pattern = self.pattern.as_str(), "Completion watcher installed");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), InspectorError> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.task.is_some()
    }
}

async fn refetch(page: &Page, client: &reqwest::Client, url: &str) -> Result<String, InspectorError> {
    let host = url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .ok_or_else(|| InspectorError::Protocol(format!("no host in {}", url)))?;
    let cookies = page
        .get_cookies()
        .await
        .map_err(|e| InspectorError::Protocol(e.to_string()))?;
    let header = cookie_header(
        cookies
            .iter()
            .map(|c| (c.name.as_str(), c.value.as_str(), c.domain.as_str())),
        &host,
    );

    let mut request = client.get(url);
    if !header.is_empty() {
        request = request.header(reqwest::header::COOKIE, header);
    }
    let response = request
        .send()
        .await
        .map_err(|e| InspectorError::Protocol(e.to_string()))?;
    response
        .text()
        .await
        .map_err(|e| InspectorError::Protocol(e.to_string()))
}

/// `name=value; …` for every cookie whose domain covers `host`.
pub(crate) fn cookie_header<'a>(
    cookies: impl IntoIterator<Item = (&'a str, &'a str, &'a str)>,
    host: &str,
) -> String {
    cookies
        .into_iter()
        .filter(|(_, _, domain)| domain_matches(domain, host))
        .map(|(name, value, _)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join("; ")
}

fn domain_matches(domain: &str, host: &str) -> bool {
    let domain = domain.trim_start_matches('.');
    host == domain || host.ends_with(&format!(".{}", domain))
}
