use anyhow::Context;
use clap::{Parser, Subcommand};
use jolt_engine::cli::{self, Console, FileErrorMode, FileOptions, OutputHandlers, ReplOptions};
use jolt_engine::config::{ConfigLoader, JoltConfig};
use jolt_engine::dispatch::{Dispatcher, spawn_body_pump};
use jolt_engine::formatter::{format_event, format_settings};
use jolt_engine::frontend::{Frontend, FrontendLink};
use jolt_engine::overlay::OverlayDriver;
use jolt_engine::protocol::{BackgroundMessage, ContentMessage};
use jolt_engine::relay::{ConnectionState, Relay, RelayHandle, WsConnector};
use jolt_engine::settings::SettingKey;
use jolt_engine::store::{FileBackend, SettingsStore, spawn_reload_poller};
use jolt_h::HeadlessMonitor;
use jolt_r::RemoteBridge;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "jolt", version, about = "Shock yourself into solving problems")]
struct Args {
    #[command(subcommand)]
    mode: Mode,

    /// Console commands to execute instead of the interactive prompt
    #[arg(long, global = true)]
    file: Option<String>,

    /// Config file (default: ./jolt.yaml, then ~/.jolt/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Mode {
    /// Monitor submissions in a Chromium driven over CDP
    Headless {
        /// Show the browser window
        #[arg(long)]
        visible: bool,
    },
    /// Monitor submissions reported by the browser extension
    Remote {
        /// WebSocket port (default from config)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Read or edit the persisted settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
    /// Connect to the broker and send one vibration with the saved settings
    TestVibrate,
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Print every setting
    Show,
    /// Print one setting
    Get { key: String },
    /// Clamp and save one setting
    Set {
        key: String,
        #[arg(required = true, num_args = 1..)]
        value: Vec<String>,
    },
    /// Reset one setting (the interval becomes disabled)
    Unset { key: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries console output.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => ConfigLoader::load_from(path).await,
        None => ConfigLoader::load_default().await,
    }
    .context("loading config")?;

    let store = Arc::new(SettingsStore::open(Arc::new(FileBackend::new(config.settings_path()))).await);

    match args.mode {
        Mode::Settings { action } => settings_command(&store, action).await,
        Mode::TestVibrate => test_vibrate(&config, store).await,
        Mode::Headless { visible } => {
            let frontend = HeadlessMonitor::new(
                visible,
                config.monitor.start_url.clone(),
                config.url_pattern()?,
            );
            monitor(&config, store, Box::new(frontend), args.file).await
        }
        Mode::Remote { port } => {
            let port = port.unwrap_or(config.bridge.port);
            let frontend = RemoteBridge::new(port, config.url_pattern()?);
            monitor(&config, store, Box::new(frontend), args.file).await
        }
    }
}

async fn settings_command(store: &SettingsStore, action: SettingsAction) -> anyhow::Result<()> {
    match action {
        SettingsAction::Show => println!("{}", format_settings(&store.snapshot())),
        SettingsAction::Get { key } => {
            let key: SettingKey = key.parse()?;
            match store.get(key) {
                Some(value) => println!("{} = {}", key, value),
                None => println!("{} = (disabled)", key),
            }
        }
        SettingsAction::Set { key, value } => {
            let key: SettingKey = key.parse()?;
            let value = key.parse_value(&value.join(" "))?;
            let mut draft = (*store.snapshot()).clone();
            draft.apply(key, Some(value))?;
            store.save(&draft).await?;
            match store.get(key) {
                Some(saved) => println!("{} = {}", key, saved),
                None => println!("{} = (disabled)", key),
            }
        }
        SettingsAction::Unset { key } => {
            let key: SettingKey = key.parse()?;
            let mut draft = (*store.snapshot()).clone();
            draft.apply(key, None)?;
            store.save(&draft).await?;
            println!("{} reset", key);
        }
    }
    Ok(())
}

async fn test_vibrate(config: &JoltConfig, store: Arc<SettingsStore>) -> anyhow::Result<()> {
    if !store.snapshot().has_credentials() {
        anyhow::bail!("Set pishockUsername and pishockApiKey first");
    }
    let relay = Relay::spawn(config.relay_config()?, Arc::new(WsConnector), Arc::clone(&store));
    let dispatcher = Dispatcher::new(store, relay.clone());

    let connected = tokio::time::timeout(CONNECT_TIMEOUT, wait_until(&relay, |state, _| {
        state == ConnectionState::Connected
    }))
    .await;
    if connected.is_err() {
        relay.shutdown().await;
        anyhow::bail!("Broker did not accept the connection");
    }

    dispatcher.handle(BackgroundMessage::TestVibrate);
    let sent = tokio::time::timeout(CONNECT_TIMEOUT, wait_until(&relay, |_, sent| sent > 0)).await;
    relay.shutdown().await;
    match sent {
        Ok(()) => {
            println!("Test vibration sent");
            Ok(())
        }
        Err(_) => anyhow::bail!("Test vibration was not sent (check the device settings)"),
    }
}

/// Poll relay status until `done(state, commands_sent)` holds.
async fn wait_until(relay: &RelayHandle, done: impl Fn(ConnectionState, u64) -> bool) {
    loop {
        if let Some(status) = relay.status().await {
            if done(status.state, status.commands_sent) {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

async fn monitor(
    config: &JoltConfig,
    store: Arc<SettingsStore>,
    mut frontend: Box<dyn Frontend>,
    file: Option<String>,
) -> anyhow::Result<()> {
    let poller = spawn_reload_poller(
        Arc::clone(&store),
        Duration::from_millis(config.monitor.settings_poll_ms.max(100)),
    );
    let relay = Relay::spawn(config.relay_config()?, Arc::new(WsConnector), Arc::clone(&store));
    let dispatcher = Arc::new(Dispatcher::new(store, relay.clone()));
    let overlay = OverlayDriver::spawn(Arc::clone(&dispatcher));

    let (bodies_tx, bodies_rx) = mpsc::channel(32);
    let pump = spawn_body_pump(Arc::clone(&dispatcher), bodies_rx);
    let link = FrontendLink {
        dispatcher: Arc::clone(&dispatcher),
        bodies: bodies_tx,
        page_events: overlay.controller(),
    };

    if let Err(e) = frontend.launch(link).await {
        eprintln!("Failed to launch front end: {}", e);
        relay.shutdown().await;
        return Err(e.into());
    }
    info!("Monitoring submissions");

    let notices = print_notices(dispatcher.subscribe(), overlay.toasts());
    let mut console = Console::new(dispatcher).with_overlay(overlay);
    let output = OutputHandlers {
        out: |msg| println!("{}", msg),
        err: |msg| eprintln!("{}", msg),
    };

    let result = match file {
        Some(path) => cli::run_file(
            &mut console,
            output,
            &path,
            FileOptions {
                stop_on_error: true,
                error_mode: FileErrorMode::WithLine,
            },
        )
        .await
        .map_err(|e| anyhow::anyhow!("Error executing file {}: {}", path, e)),
        None => cli::run_repl(
            &mut console,
            output,
            ReplOptions {
                banner_lines: &[
                    "Monitoring. Open a problem and click into the editor to start the countdown.",
                    "Type 'help' for commands, 'exit' or 'quit' to close.",
                ],
                prompt: "jolt> ",
                exit_commands: &["exit", "quit"],
                handle_ctrl_c: true,
                ctrl_c_message: Some("Interrupted"),
            },
        )
        .await
        .map_err(|e| anyhow::anyhow!("Error during session: {}", e)),
    };

    if let Err(e) = frontend.close().await {
        warn!("Closing front end: {}", e);
    }
    if let Some(overlay) = console.overlay() {
        overlay.abort();
    }
    notices.abort();
    pump.abort();
    poller.abort();
    relay.shutdown().await;
    result
}

/// Echo submission outcomes and shock toasts while the console runs.
fn print_notices(
    mut content: broadcast::Receiver<ContentMessage>,
    mut toasts: broadcast::Receiver<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                message = content.recv() => match message {
                    Ok(ContentMessage::Submission { payload }) => println!("{}", format_event(&payload)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                toast = toasts.recv() => match toast {
                    Ok(toast) => println!("{}", toast),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_settings_set_joins_value_words() {
        let args = Args::try_parse_from(["jolt", "settings", "set", "pishockUsername", "a", "b"]).unwrap();
        match args.mode {
            Mode::Settings {
                action: SettingsAction::Set { key, value },
            } => {
                assert_eq!(key, "pishockUsername");
                assert_eq!(value, vec!["a", "b"]);
            }
            _ => panic!("wrong mode"),
        }
    }

    #[test]
    fn test_remote_port_is_optional() {
        let args = Args::try_parse_from(["jolt", "remote"]).unwrap();
        assert!(matches!(args.mode, Mode::Remote { port: None }));
        let args = Args::try_parse_from(["jolt", "--config", "x.yaml", "remote", "--port", "9100"]).unwrap();
        assert!(matches!(args.mode, Mode::Remote { port: Some(9100) }));
        assert_eq!(args.config, Some(PathBuf::from("x.yaml")));
    }
}
