//! # beacon-tail
//!
//! Follows the realtime event stream from a terminal: prints every delivered
//! event as one JSON line on stdout and logs connection status on stderr.
//!
//! On unix, `SIGUSR1` reports the application as foregrounded and `SIGUSR2`
//! as backgrounded, which exercises the immediate-reconnect path.

#![deny(unsafe_code)]

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use beacon_client::{Handler, RealtimeEvents, Subscription};
use beacon_core::logging::init_subscriber;
use beacon_core::{ActionKey, ActionKeys, StatusChange};
use beacon_settings::{BeaconSettings, load_settings_from_path, settings_path};
use clap::Parser;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Follow the realtime event stream.
#[derive(Parser, Debug)]
#[command(name = "beacon-tail", about = "Follow the realtime event stream")]
struct Cli {
    /// Settings file (defaults to `~/.beacon/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Server base URL (overrides settings).
    #[arg(long)]
    base_url: Option<String>,

    /// Action to follow; repeatable. `ALL` follows every event.
    #[arg(long = "action", value_name = "KEY")]
    actions: Vec<String>,

    /// Log level or filter directive (overrides settings).
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn action_keys(&self) -> ActionKeys {
        if self.actions.is_empty() {
            ActionKeys::from(ActionKey::Wildcard)
        } else {
            ActionKeys::new(self.actions.iter().map(|a| ActionKey::parse(a)))
        }
    }

    fn apply_overrides(&self, settings: &mut BeaconSettings) {
        if let Some(url) = &self.base_url {
            settings.realtime.base_url.clone_from(url);
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
    }

    fn load_settings(&self) -> Result<BeaconSettings> {
        let path = self.settings.clone().unwrap_or_else(settings_path);
        let mut settings = load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;
        self.apply_overrides(&mut settings);
        settings.validate().context("Invalid settings")?;
        Ok(settings)
    }
}

/// Handler printing each event as one JSON line.
///
/// Wildcard handlers already receive the full envelope; specific ones get
/// `data` only, so the action is added back.
fn printer(key: &ActionKey) -> Handler {
    let action = match key {
        ActionKey::Specific(action) => Some(action.clone()),
        ActionKey::Wildcard => None,
    };
    Handler::new(move |value| {
        let line = match &action {
            Some(action) => json!({ "action": action, "data": value }),
            None => value.clone(),
        };
        let mut out = std::io::stdout().lock();
        writeln!(out, "{line}")?;
        Ok(())
    })
}

async fn log_status(mut changes: broadcast::Receiver<StatusChange>) {
    loop {
        match changes.recv().await {
            Ok(change) => info!(
                status = %change.status,
                attempt = change.attempt,
                "connection status changed"
            ),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "status log fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(unix)]
async fn forward_signals(trigger: beacon_client::VisibilityTrigger) -> Result<()> {
    use beacon_client::Visibility;
    use tokio::signal::unix::{SignalKind, signal};

    let mut usr1 =
        signal(SignalKind::user_defined1()).context("Failed to install SIGUSR1 handler")?;
    let mut usr2 =
        signal(SignalKind::user_defined2()).context("Failed to install SIGUSR2 handler")?;

    loop {
        let visibility = tokio::select! {
            Some(()) = usr1.recv() => Visibility::Foreground,
            Some(()) = usr2.recv() => Visibility::Background,
            else => break,
        };
        if !trigger.notify(visibility) {
            break;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.load_settings()?;
    init_subscriber(&settings.logging.level);

    let events = RealtimeEvents::from_settings(&settings.realtime)
        .context("Failed to start realtime client")?;
    info!(
        url = %settings.realtime.events_url(),
        "following realtime events"
    );

    let subscriptions: Vec<Subscription> = cli
        .action_keys()
        .into_vec()
        .into_iter()
        .map(|key| {
            let handler = printer(&key);
            events.subscribe(key, handler)
        })
        .collect();

    let status_task = tokio::spawn(log_status(events.status_changes()));

    #[cfg(unix)]
    let signal_task = {
        let trigger = events.visibility();
        tokio::spawn(async move {
            if let Err(e) = forward_signals(trigger).await {
                warn!(error = %e, "visibility signals unavailable");
            }
        })
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    info!("Shutting down...");
    #[cfg(unix)]
    signal_task.abort();
    drop(subscriptions);
    events.shutdown().await;
    let _ = status_task.await;

    info!("Shutdown complete");
    Ok(())
}
