//! Interactive settings form and device console.
//!
//! `set`/`unset` edit a draft; `save` clamps it and writes every key through
//! the store, `discard` throws it away. The remaining commands talk to the
//! relay and overlay.

use crate::dispatch::Dispatcher;
use crate::overlay::{OverlayHandle, OverlayView};
use crate::relay::{ConnectionState, RelayStatus};
use crate::store::StoreError;
use jolt_common::error::SettingsError;
use jolt_common::formatter::format_settings;
use jolt_common::protocol::{BackgroundMessage, ShockCommand};
use jolt_common::settings::{SettingKey, Settings, format_number};
use std::error::Error;
use std::io::{self, Write};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};

pub const HELP: &str = "\
Commands:
  show                      Show settings (draft if editing)
  get <key>                 Show one setting
  set <key> <value>         Edit a setting in the draft
  unset <key>               Reset a setting in the draft (interval: disable)
  save                      Clamp and persist the draft
  discard                   Drop the draft
  test-vibrate              Vibrate with the saved vibrate settings
  shock [intensity] [secs]  Send a shock
  vibrate [intensity] [secs]
                            Send a vibration
  focus                     Start the overlay countdown
  overlay                   Show the overlay state
  status                    Show the broker connection state
  help                      Show this help";

#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("Unknown command: {0} (try 'help')")]
    UnknownCommand(String),
    #[error("Usage: {0}")]
    Usage(&'static str),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Overlay is not running in this mode")]
    NoOverlay,
    #[error("Relay stopped")]
    RelayStopped,
}

#[derive(Clone, Copy)]
pub struct OutputHandlers {
    pub out: fn(&str),
    pub err: fn(&str),
}

pub enum FileErrorMode {
    Plain,
    WithLine,
}

pub struct FileOptions {
    pub stop_on_error: bool,
    pub error_mode: FileErrorMode,
}

pub struct ReplOptions<'a> {
    pub banner_lines: &'a [&'a str],
    pub prompt: &'a str,
    pub exit_commands: &'a [&'a str],
    pub handle_ctrl_c: bool,
    pub ctrl_c_message: Option<&'a str>,
}

pub struct Console {
    dispatcher: Arc<Dispatcher>,
    overlay: Option<OverlayHandle>,
    draft: Option<Settings>,
}

impl Console {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            overlay: None,
            draft: None,
        }
    }

    pub fn with_overlay(mut self, overlay: OverlayHandle) -> Self {
        self.overlay = Some(overlay);
        self
    }

    pub fn overlay(&self) -> Option<&OverlayHandle> {
        self.overlay.as_ref()
    }

    pub fn has_draft(&self) -> bool {
        self.draft.is_some()
    }

    pub async fn execute_line(&mut self, line: &str) -> Result<String, ConsoleError> {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            return Ok(String::new());
        };
        let args: Vec<&str> = words.collect();

        match command {
            "show" => Ok(self.show()),
            "get" => {
                let [key] = args[..] else {
                    return Err(ConsoleError::Usage("get <key>"));
                };
                let key: SettingKey = key.parse()?;
                let settings = self.current();
                Ok(match settings.get(key) {
                    Some(value) => format!("{} = {}", key, value),
                    None => format!("{} = (disabled)", key),
                })
            }
            "set" => {
                if args.len() < 2 {
                    return Err(ConsoleError::Usage("set <key> <value>"));
                }
                let key: SettingKey = args[0].parse()?;
                let value = key.parse_value(&args[1..].join(" "))?;
                let shown = value.to_string();
                self.draft_mut().apply(key, Some(value))?;
                Ok(format!("{} = {} (unsaved)", key, shown))
            }
            "unset" => {
                let [key] = args[..] else {
                    return Err(ConsoleError::Usage("unset <key>"));
                };
                let key: SettingKey = key.parse()?;
                self.draft_mut().apply(key, None)?;
                Ok(match self.current().get(key) {
                    Some(value) => format!("{} = {} (unsaved)", key, value),
                    None => format!("{} disabled (unsaved)", key),
                })
            }
            "save" => {
                let Some(draft) = self.draft.take() else {
                    return Ok("Nothing to save".into());
                };
                match self.dispatcher.store().save(&draft).await {
                    Ok(changed) if changed.is_empty() => Ok("Saved (no changes)".into()),
                    Ok(changed) => Ok(format!(
                        "Saved: {}",
                        changed.iter().map(|k| k.as_str()).collect::<Vec<_>>().join(", ")
                    )),
                    Err(e) => {
                        self.draft = Some(draft);
                        Err(e.into())
                    }
                }
            }
            "discard" => {
                self.draft = None;
                Ok("Draft discarded".into())
            }
            "test-vibrate" => {
                self.dispatcher.handle(BackgroundMessage::TestVibrate);
                Ok("Test vibration sent".into())
            }
            "shock" | "vibrate" => {
                let saved = self.dispatcher.store().snapshot();
                let (default_intensity, default_duration) = if command == "shock" {
                    (saved.initial_shock_intensity, saved.initial_shock_duration)
                } else {
                    (saved.vibrate_intensity, saved.vibrate_duration)
                };
                let intensity = number_arg(args.first(), default_intensity)?;
                let duration = number_arg(args.get(1), default_duration)?;
                let message = if command == "shock" {
                    BackgroundMessage::Shock {
                        payload: ShockCommand::shock(intensity, duration),
                    }
                } else {
                    BackgroundMessage::Vibrate {
                        payload: ShockCommand::vibrate(intensity, duration),
                    }
                };
                self.dispatcher.handle(message);
                Ok(format!(
                    "Sent {} @ {}% for {}s",
                    command,
                    format_number(intensity.round().clamp(1.0, 100.0)),
                    format_number(duration)
                ))
            }
            "focus" => {
                let overlay = self.overlay.as_ref().ok_or(ConsoleError::NoOverlay)?;
                overlay.focus().await;
                Ok("Editor focused".into())
            }
            "overlay" => {
                let overlay = self.overlay.as_ref().ok_or(ConsoleError::NoOverlay)?;
                Ok(format_overlay(&overlay.view()))
            }
            "status" => {
                let status = self
                    .dispatcher
                    .relay()
                    .status()
                    .await
                    .ok_or(ConsoleError::RelayStopped)?;
                Ok(format_status(&status))
            }
            "help" => Ok(HELP.to_string()),
            other => Err(ConsoleError::UnknownCommand(other.to_string())),
        }
    }

    fn current(&self) -> Settings {
        match &self.draft {
            Some(draft) => draft.clone(),
            None => (*self.dispatcher.store().snapshot()).clone(),
        }
    }

    fn draft_mut(&mut self) -> &mut Settings {
        let saved = self.dispatcher.store().snapshot();
        self.draft.get_or_insert_with(|| (*saved).clone())
    }

    fn show(&self) -> String {
        let mut out = format_settings(&self.current());
        if self.draft.is_some() {
            out.push_str("\n(unsaved changes; 'save' or 'discard')");
        }
        out
    }
}

fn number_arg(arg: Option<&&str>, default: f64) -> Result<f64, ConsoleError> {
    match arg {
        None => Ok(default),
        Some(raw) => raw
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .ok_or(ConsoleError::Usage("shock|vibrate [intensity] [seconds]")),
    }
}

pub fn format_status(status: &RelayStatus) -> String {
    let state = match status.state {
        ConnectionState::Disconnected => "disconnected",
        ConnectionState::Connecting => "connecting",
        ConnectionState::Connected => "connected",
    };
    format!(
        "broker: {}\nreconnect pending: {}\nkeepalive: {}\nattempts: {}  sent: {}  dropped: {}",
        state,
        yes_no(status.reconnect_pending),
        yes_no(status.keepalive_active),
        status.connect_attempts,
        status.commands_sent,
        status.commands_dropped
    )
}

pub fn format_overlay(view: &OverlayView) -> String {
    let countdown = view.countdown.as_deref().unwrap_or("(interval disabled)");
    format!(
        "{} [{:?}]\nIntensity: {}%\nDuration: {}s",
        countdown,
        view.color,
        format_number(view.intensity),
        format_number(view.duration)
    )
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

pub async fn run_file(
    console: &mut Console,
    output: OutputHandlers,
    path: &str,
    options: FileOptions,
) -> Result<(), Box<dyn Error>> {
    let content = tokio::fs::read_to_string(path).await?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        match console.execute_line(trimmed).await {
            Ok(result) => (output.out)(&result),
            Err(err) => {
                match options.error_mode {
                    FileErrorMode::Plain => (output.err)(&format!("Error: {}", err)),
                    FileErrorMode::WithLine => {
                        (output.err)(&format!("Error executing line '{}': {}", trimmed, err))
                    }
                }
                if options.stop_on_error {
                    return Err(io::Error::other(err.to_string()).into());
                }
            }
        }
    }
    Ok(())
}

/// Possible outcomes from reading a single REPL line.
enum ReadLineResult {
    Input(String),
    Skip,
    Exit,
    Error(io::Error),
}

async fn read_line(
    reader: &mut tokio::io::Lines<BufReader<tokio::io::Stdin>>,
    exit_commands: &[&str],
    handle_ctrl_c: bool,
    ctrl_c_message: Option<&str>,
    output: OutputHandlers,
) -> ReadLineResult {
    if handle_ctrl_c {
        tokio::select! {
            line = reader.next_line() => {
                classify_line(line, exit_commands)
            }
            _ = tokio::signal::ctrl_c() => {
                if let Some(message) = ctrl_c_message {
                    (output.out)(message);
                }
                ReadLineResult::Exit
            }
        }
    } else {
        classify_line(reader.next_line().await, exit_commands)
    }
}

fn classify_line(
    result: Result<Option<String>, io::Error>,
    exit_commands: &[&str],
) -> ReadLineResult {
    match result {
        Ok(Some(input)) => {
            let trimmed = input.trim().to_string();
            if trimmed.is_empty() {
                ReadLineResult::Skip
            } else if exit_commands.contains(&trimmed.as_str()) {
                ReadLineResult::Exit
            } else {
                ReadLineResult::Input(trimmed)
            }
        }
        Ok(None) => ReadLineResult::Exit,
        Err(e) => ReadLineResult::Error(e),
    }
}

pub async fn run_repl(
    console: &mut Console,
    output: OutputHandlers,
    options: ReplOptions<'_>,
) -> Result<(), Box<dyn Error>> {
    for line in options.banner_lines {
        (output.out)(line);
    }

    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin).lines();
    let mut stdout = io::stdout();

    loop {
        print!("{}", options.prompt);
        stdout.flush()?;

        match read_line(
            &mut reader,
            options.exit_commands,
            options.handle_ctrl_c,
            options.ctrl_c_message,
            output,
        )
        .await
        {
            ReadLineResult::Input(line) => match console.execute_line(&line).await {
                Ok(result) => (output.out)(&result),
                Err(err) => (output.err)(&format!("Error: {}", err)),
            },
            ReadLineResult::Skip => continue,
            ReadLineResult::Exit => break,
            ReadLineResult::Error(e) => return Err(e.into()),
        }
    }

    if console.has_draft() {
        (output.err)("Unsaved settings changes were discarded");
    }
    Ok(())
}
