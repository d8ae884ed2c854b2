use jolt_common::protocol::{SubmissionEvent, SubmissionKind};
use serde_json::Value;
use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

pub const TEST_TASK: &str = "judger.runcodetask.RunCode";
pub const FINAL_TASK: &str = "judger.judgetask.Judge";
pub const FINISHED_STATE: &str = "SUCCESS";
pub const ACCEPTED_STATUS: &str = "Accepted";

/// Turns check responses into submission events, at most once per submission.
///
/// A final run counts as successful only when `status_msg` is `"Accepted"`;
/// a test run uses the `run_success` flag.
#[derive(Debug, Default)]
pub struct SubmissionClassifier {
    seen: HashSet<String>,
}

impl SubmissionClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn classify(&mut self, body: &Value) -> Option<SubmissionEvent> {
        self.classify_at(body, now_millis())
    }

    /// Same as [`classify`](Self::classify) with an explicit clock, used when
    /// the response carries no finish time.
    pub fn classify_at(&mut self, body: &Value, now_ms: u128) -> Option<SubmissionEvent> {
        let obj = body.as_object()?;

        // An empty state (null, "", false, 0) counts as no state at all.
        if let Some(state) = obj.get("state").filter(|state| !is_blank(state)) {
            if state.as_str() != Some(FINISHED_STATE) {
                return None;
            }
        }

        let task_name = obj.get("task_name").and_then(Value::as_str)?;
        let kind = match task_name {
            TEST_TASK => SubmissionKind::Test,
            FINAL_TASK => SubmissionKind::Final,
            _ => return None,
        };

        let success = match kind {
            SubmissionKind::Test => obj.get("run_success").and_then(Value::as_bool).unwrap_or(false),
            SubmissionKind::Final => {
                obj.get("status_msg").and_then(Value::as_str) == Some(ACCEPTED_STATUS)
            }
        };

        let id = id_field(obj.get("submission_id"))
            .or_else(|| id_field(obj.get("submissionId")))
            .unwrap_or_else(|| {
                let finish = id_field(obj.get("task_finish_time")).unwrap_or_else(|| now_ms.to_string());
                format!("{}:{}", task_name, finish)
            });

        if !self.seen.insert(id.clone()) {
            debug!(id = %id, "Ignoring already seen submission");
            return None;
        }

        Some(SubmissionEvent { kind, success })
    }

    /// Parse and classify a raw response body. Empty or non-JSON bodies are
    /// ignored.
    pub fn classify_text(&mut self, text: &str) -> Option<SubmissionEvent> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }
        match serde_json::from_str::<Value>(trimmed) {
            Ok(value) => self.classify(&value),
            Err(e) => {
                debug!(error = %e, "Ignoring non-JSON response body");
                None
            }
        }
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }
}

/// Non-empty strings and numbers identify a submission; anything else does not.
fn id_field(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::Array(_) | Value::Object(_) => false,
    }
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}
