use crate::protocol::{ShockAction, ShockCommand, SubmissionEvent, SubmissionKind};
use crate::settings::{SettingKey, Settings, format_number};

/// `m:ss`
pub fn format_countdown(seconds: u64) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

pub fn format_event(event: &SubmissionEvent) -> String {
    let kind = match event.kind {
        SubmissionKind::Test => "Test run",
        SubmissionKind::Final => "Submission",
    };
    let outcome = match (event.kind, event.success) {
        (SubmissionKind::Final, true) => "accepted",
        (SubmissionKind::Final, false) => "rejected",
        (SubmissionKind::Test, true) => "passed",
        (SubmissionKind::Test, false) => "failed",
    };
    format!("{} {}", kind, outcome)
}

/// Toast shown whenever a command is issued.
pub fn format_command(command: &ShockCommand) -> String {
    match command.action {
        ShockAction::Shock => format!("⚡ Shocking you @ {}% ⚡", command.intensity),
        ShockAction::Vibrate => format!(
            "Vibrating @ {}% for {}s",
            command.intensity,
            format_number(command.duration)
        ),
    }
}

/// One `key = value` line per setting, secrets masked.
pub fn format_settings(settings: &Settings) -> String {
    let width = SettingKey::ALL
        .iter()
        .map(|k| k.as_str().len())
        .max()
        .unwrap_or(0);

    settings
        .entries()
        .into_iter()
        .map(|(key, value)| {
            let shown = match value {
                None => "(disabled)".to_string(),
                Some(v) if key.is_secret() => mask(&v.to_string()),
                Some(v) => v.to_string(),
            };
            format!("{:width$} = {}", key.as_str(), shown, width = width)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn mask(secret: &str) -> String {
    let count = secret.chars().count();
    if count <= 4 {
        return "*".repeat(count);
    }
    let tail: String = secret.chars().skip(count - 4).collect();
    format!("****{}", tail)
}
