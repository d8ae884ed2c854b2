use crate::cdp::CdpResult;
use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, EventFrameNavigated,
};
use chromiumoxide::cdp::js_protocol::runtime::{AddBindingParams, EventBindingCalled};
use futures::StreamExt;
use jolt_engine::overlay::OverlayControl;
use tokio::sync::mpsc;

pub const EDITOR_SELECTOR: &str = r#"[data-track-load="code_editor"]"#;
const FOCUS_BINDING: &str = "__joltEditorFocused";

/// Reports the first click inside the code editor of each page load. The
/// click itself is never intercepted.
fn focus_script() -> String {
    format!(
        r#"(() => {{
  let reported = false;
  document.addEventListener("click", (event) => {{
    if (reported) return;
    const editor = document.querySelector('{selector}');
    if (editor && event.target instanceof Node && editor.contains(event.target)) {{
      reported = true;
      window.{binding}("focus");
    }}
  }}, true);
}})();"#,
        selector = EDITOR_SELECTOR,
        binding = FOCUS_BINDING
    )
}

pub async fn watch_editor_focus(page: &Page, events: mpsc::Sender<OverlayControl>) -> CdpResult<()> {
    page.execute(AddBindingParams::new(FOCUS_BINDING))
        .await
        .map_err(|e| format!("Failed to add focus binding: {}", e))?;
    page.execute(AddScriptToEvaluateOnNewDocumentParams::new(focus_script()))
        .await
        .map_err(|e| format!("Failed to install focus script: {}", e))?;

    let mut calls = page
        .event_listener::<EventBindingCalled>()
        .await
        .map_err(|e| format!("Failed to subscribe to binding calls: {}", e))?;

    tokio::spawn(async move {
        while let Some(call) = calls.next().await {
            if call.name != FOCUS_BINDING {
                continue;
            }
            tracing::debug!("Code editor focused");
            if events.send(OverlayControl::Focus).await.is_err() {
                break;
            }
        }
    });
    Ok(())
}

/// A top-level navigation to a problem page starts a fresh overlay session.
pub async fn watch_problem_navigation(
    page: &Page,
    problems_prefix: String,
    events: mpsc::Sender<OverlayControl>,
) -> CdpResult<()> {
    let mut navigations = page
        .event_listener::<EventFrameNavigated>()
        .await
        .map_err(|e| format!("Failed to subscribe to navigation events: {}", e))?;

    tokio::spawn(async move {
        while let Some(event) = navigations.next().await {
            if event.frame.parent_id.is_some() || !event.frame.url.starts_with(&problems_prefix) {
                continue;
            }
            tracing::info!("Problem page opened: {}", event.frame.url);
            if events.send(OverlayControl::Reset).await.is_err() {
                break;
            }
        }
    });
    Ok(())
}
