//! # tether-cli
//!
//! Drives the client control plane from a terminal. Routed events,
//! interaction changes, and connection state are printed to stdout as JSON
//! lines; logs go to stderr.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tether_client::interaction::{InteractionEvent, Response};
use tether_client::{CommandClient, ControlPlane, RoutedEvent};
use tether_core::{Decision, RuntimeKind, Scope, SessionId};
use tether_settings::ClientSettings;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

/// Tether client.
#[derive(Parser, Debug)]
#[command(name = "tether", about = "Remote agent session client")]
struct Cli {
    /// Settings file (defaults to `~/.tether/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check the command endpoint is reachable.
    Health,
    /// List sessions known to the remote agent.
    Sessions,
    /// Stream events for one session.
    Watch {
        /// Session to activate.
        #[arg(long)]
        session: String,
        /// Runtime to accept events from.
        #[arg(long)]
        runtime: Option<RuntimeKind>,
        /// Approve live permission requests automatically.
        #[arg(long)]
        auto_approve: bool,
        /// Deny every permission request that is not auto-approved.
        #[arg(long, conflicts_with = "auto_approve")]
        deny_all: bool,
    },
}

fn load(path: Option<&PathBuf>) -> Result<ClientSettings> {
    let settings = match path {
        Some(path) => tether_settings::load_settings_from_path(path),
        None => tether_settings::load_settings(),
    };
    settings.context("Failed to load settings")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load(cli.settings.as_ref())?;

    if cli.json_logs || settings.logging.json {
        tether_core::logging::init_json_subscriber(&settings.logging.level);
    } else {
        tether_core::logging::init_subscriber(&settings.logging.level);
    }

    match cli.command {
        Command::Health => health(&settings).await,
        Command::Sessions => sessions(&settings).await,
        Command::Watch {
            session,
            runtime,
            auto_approve,
            deny_all,
        } => {
            let mut settings = settings;
            if let Some(runtime) = runtime {
                settings.router.selected_runtime = runtime;
            }
            settings.interaction.auto_approve |= auto_approve;
            watch(&settings, SessionId::from(session), deny_all).await
        }
    }
}

async fn health(settings: &ClientSettings) -> Result<()> {
    let client = CommandClient::new(&settings.endpoint, settings.command.clone())?;
    let report = client.health().await.context("Health check failed")?;
    println!(
        "{}",
        json!({
            "status": "ok",
            "destination": report.destination.as_str(),
            "latency_ms": report.latency.as_millis(),
        })
    );
    Ok(())
}

async fn sessions(settings: &ClientSettings) -> Result<()> {
    let client = CommandClient::new(&settings.endpoint, settings.command.clone())?;
    let sessions: serde_json::Value = client
        .get("/api/sessions")
        .await
        .context("Failed to list sessions")?;
    println!("{sessions}");
    Ok(())
}

async fn watch(settings: &ClientSettings, session_id: SessionId, deny_all: bool) -> Result<()> {
    let (plane, mut events) = ControlPlane::from_settings(settings)?;
    let mut interactions = plane.interactions().subscribe();
    let mut connection = plane.connection().watch();

    let report = plane
        .router()
        .activate(session_id.clone())
        .await
        .context("Event router stopped")?;
    info!(session_id = %session_id, replayed = report.replayed, "session activated");
    plane.connection().connect().context("Connection manager stopped")?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            event = events.recv() => match event {
                Some(event) => print_event(&event),
                None => break,
            },
            changed = connection.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = connection.borrow_and_update().clone();
                println!(
                    "{}",
                    json!({
                        "kind": "connection",
                        "state": snapshot.state.name(),
                        "suspended": snapshot.suspended,
                    })
                );
            }
            update = interactions.recv() => match update {
                Ok(update) => {
                    println!("{}", json!({"kind": "interaction", "update": &update}));
                    if let (true, InteractionEvent::Pending(pending)) = (deny_all, &update) {
                        let response = Response::Permission {
                            decision: Decision::Deny,
                            scope: Scope::Once,
                        };
                        if let Err(err) = plane.interactions().respond(pending, response).await {
                            warn!(interaction_id = %pending.id, error = %err, "deny failed");
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "interaction updates dropped"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    plane.connection().disconnect().context("Connection manager stopped")?;
    Ok(())
}

fn print_event(event: &RoutedEvent) {
    let envelope = &event.envelope;
    let payload = envelope
        .payload_json::<serde_json::Value>()
        .unwrap_or(serde_json::Value::Null);
    println!(
        "{}",
        json!({
            "kind": "event",
            "type": envelope.event_type().as_str(),
            "session_id": envelope.session_id(),
            "runtime": envelope.runtime().to_string(),
            "liveness": event.liveness,
            "received_at": envelope.received_at(),
            "payload": payload,
        })
    );
}
