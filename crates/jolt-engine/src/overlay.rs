//! Problem-page overlay: the countdown, escalating shocks and the
//! reactions to submission events.
//!
//! [`OverlaySession`] is the pure model, advanced one second at a time by
//! [`OverlayDriver`], which also feeds it submission events and settings
//! changes and forwards the commands it produces to the dispatcher.

use crate::dispatch::Dispatcher;
use crate::store::SettingsSubscription;
use jolt_common::formatter::{format_command, format_countdown};
use jolt_common::protocol::{
    BackgroundMessage, ContentMessage, ShockAction, ShockCommand, SubmissionEvent, SubmissionKind,
};
use jolt_common::settings::Settings;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// At or below this many seconds the countdown turns red.
pub const IMMINENT_THRESHOLD_SECS: u64 = 15;
pub const TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlayColor {
    /// Editor not focused yet (blue).
    Idle,
    /// Counting down (yellow).
    Counting,
    /// Shock is close (red).
    Imminent,
    /// Final submission accepted (green).
    Solved,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlayView {
    /// `m:ss`, or `None` when the interval is disabled.
    pub countdown: Option<String>,
    pub remaining: u64,
    pub color: OverlayColor,
    pub intensity: f64,
    pub duration: f64,
    pub focused: bool,
    pub solved: bool,
}

#[derive(Debug, Clone)]
pub struct OverlaySession {
    settings: Arc<Settings>,
    focused: bool,
    solved: bool,
    running: bool,
    remaining: u64,
    intensity: f64,
    duration: f64,
}

impl OverlaySession {
    pub fn new(settings: Arc<Settings>) -> Self {
        let remaining = interval_secs(&settings).unwrap_or(0);
        Self {
            intensity: settings.initial_shock_intensity,
            duration: settings.initial_shock_duration,
            settings,
            focused: false,
            solved: false,
            running: false,
            remaining,
        }
    }

    /// Pick up edited settings. The escalated intensity and duration stay
    /// where they are; the countdown restarts only if it is not running.
    pub fn update_settings(&mut self, settings: Arc<Settings>) {
        self.settings = settings;
        match interval_secs(&self.settings) {
            None => {
                self.running = false;
                self.remaining = 0;
            }
            Some(interval) if !self.running => {
                self.remaining = interval;
                self.running = self.focused && !self.solved;
            }
            Some(_) => {}
        }
    }

    /// The first focus of the code editor starts the countdown.
    pub fn focus_editor(&mut self) {
        if self.focused {
            return;
        }
        self.focused = true;
        if let Some(interval) = interval_secs(&self.settings) {
            if !self.solved {
                self.remaining = interval;
                self.running = true;
            }
        }
    }

    /// Advance one second. Returns the shock due when the countdown hits zero.
    pub fn tick(&mut self) -> Option<ShockCommand> {
        if !self.running {
            return None;
        }
        let interval = interval_secs(&self.settings)?;
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining > 0 {
            return None;
        }
        self.remaining = interval;
        Some(self.incremental_shock())
    }

    pub fn on_submission(&mut self, event: &SubmissionEvent) -> Option<ShockCommand> {
        match event.kind {
            SubmissionKind::Final if event.success => {
                if self.solved {
                    return None;
                }
                self.solved = true;
                self.running = false;
                Some(ShockCommand::vibrate(
                    self.settings.vibrate_intensity,
                    self.settings.vibrate_duration,
                ))
            }
            SubmissionKind::Final => {
                self.solved = false;
                self.settings
                    .shock_on_final_fail
                    .then(|| self.incremental_shock())
            }
            SubmissionKind::Test if !event.success && self.settings.shock_on_test_fail => {
                Some(self.incremental_shock())
            }
            SubmissionKind::Test => None,
        }
    }

    /// Shock at the current level, then escalate for next time.
    fn incremental_shock(&mut self) -> ShockCommand {
        let command = ShockCommand::shock(self.intensity, self.duration);
        let max_intensity = self.settings.max_intensity.min(100.0);
        self.intensity = (self.intensity + self.settings.incremental_intensity_step)
            .min(max_intensity)
            .max(0.0);
        self.duration = (self.duration + self.settings.incremental_duration_step)
            .min(self.settings.max_duration)
            .max(0.0);
        command
    }

    pub fn view(&self) -> OverlayView {
        let color = if self.solved {
            OverlayColor::Solved
        } else if !self.focused {
            OverlayColor::Idle
        } else if self.remaining > IMMINENT_THRESHOLD_SECS {
            OverlayColor::Counting
        } else {
            OverlayColor::Imminent
        };
        OverlayView {
            countdown: interval_secs(&self.settings).map(|_| format_countdown(self.remaining)),
            remaining: self.remaining,
            color,
            intensity: self.intensity,
            duration: self.duration,
            focused: self.focused,
            solved: self.solved,
        }
    }
}

fn interval_secs(settings: &Settings) -> Option<u64> {
    settings
        .shock_interval_seconds
        .filter(|secs| secs.is_finite() && *secs >= 1.0)
        .map(|secs| secs.round() as u64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayControl {
    /// The user clicked into the code editor.
    Focus,
    /// A new problem page was opened.
    Reset,
}

pub struct OverlayHandle {
    control: mpsc::Sender<OverlayControl>,
    view: watch::Receiver<OverlayView>,
    toasts: broadcast::Sender<String>,
    task: JoinHandle<()>,
}

impl OverlayHandle {
    pub async fn focus(&self) {
        let _ = self.control.send(OverlayControl::Focus).await;
    }

    pub async fn reset(&self) {
        let _ = self.control.send(OverlayControl::Reset).await;
    }

    /// Sender for page-side events (editor clicks, navigation).
    pub fn controller(&self) -> mpsc::Sender<OverlayControl> {
        self.control.clone()
    }

    pub fn view(&self) -> OverlayView {
        self.view.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<OverlayView> {
        self.view.clone()
    }

    pub fn toasts(&self) -> broadcast::Receiver<String> {
        self.toasts.subscribe()
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}

pub struct OverlayDriver {
    session: OverlaySession,
    dispatcher: Arc<Dispatcher>,
    view: watch::Sender<OverlayView>,
    toasts: broadcast::Sender<String>,
}

impl OverlayDriver {
    pub fn spawn(dispatcher: Arc<Dispatcher>) -> OverlayHandle {
        let session = OverlaySession::new(dispatcher.store().snapshot());
        let (view_tx, view_rx) = watch::channel(session.view());
        let (control_tx, control_rx) = mpsc::channel(8);
        let (toasts, _) = broadcast::channel(16);

        let driver = OverlayDriver {
            session,
            dispatcher,
            view: view_tx,
            toasts: toasts.clone(),
        };
        let content = driver.dispatcher.subscribe();
        let settings = driver.dispatcher.store().subscribe();
        let task = tokio::spawn(driver.run(control_rx, content, settings));

        OverlayHandle {
            control: control_tx,
            view: view_rx,
            toasts,
            task,
        }
    }

    async fn run(
        mut self,
        mut control: mpsc::Receiver<OverlayControl>,
        mut content: broadcast::Receiver<ContentMessage>,
        mut settings: SettingsSubscription,
    ) {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + TICK, TICK);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(command) = self.session.tick() {
                        self.fire(command);
                    }
                }
                message = content.recv() => match message {
                    Ok(ContentMessage::Submission { payload }) => {
                        if let Some(command) = self.session.on_submission(&payload) {
                            self.fire(command);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => debug!(skipped, "Overlay lagged behind submissions"),
                    Err(RecvError::Closed) => break,
                },
                change = settings.recv() => match change {
                    Some(change) => self.session.update_settings(change.snapshot),
                    None => break,
                },
                ctrl = control.recv() => match ctrl {
                    Some(OverlayControl::Focus) => self.session.focus_editor(),
                    Some(OverlayControl::Reset) => {
                        info!("Overlay reset");
                        self.session = OverlaySession::new(self.dispatcher.store().snapshot());
                    }
                    None => break,
                },
            }
            self.view.send_replace(self.session.view());
        }
        debug!("Overlay driver finished");
    }

    fn fire(&self, command: ShockCommand) {
        let toast = format_command(&command);
        info!("{}", toast);
        let _ = self.toasts.send(toast);
        let message = match command.action {
            ShockAction::Shock => BackgroundMessage::Shock { payload: command },
            ShockAction::Vibrate => BackgroundMessage::Vibrate { payload: command },
        };
        self.dispatcher.handle(message);
    }
}
