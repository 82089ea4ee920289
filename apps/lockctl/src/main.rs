use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use client_core::{outcome, BridgeResponse, ErrorReports, LockBridge};
use shared::{
    error::{ErrorCode, FailurePayload},
    protocol::{BridgeCommand, ReplyEnvelope, ReplyPayload},
};
use storage::Storage;
use terminal::SimulatedService;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;

#[derive(Parser, Debug)]
#[command(name = "lockctl", about = "Drive the vehicle lock bridge against a simulated terminal")]
struct Cli {
    /// Overrides `database_url` from settings.
    #[arg(long)]
    database_url: Option<String>,
    /// Overrides the simulated terminal's callback latency.
    #[arg(long)]
    latency_ms: Option<u64>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Configure {
        terminal_id: String,
    },
    SaveAuthKey {
        auth_key: String,
    },
    GetAuthKey,
    Connect {
        #[arg(long)]
        timeout_seconds: Option<u64>,
    },
    Disconnect,
    RemoveAuthKey,
    SendAction {
        action: String,
    },
    LockState,
    /// Reads one JSON command per line from stdin and prints one reply per line.
    Script,
    /// Prints the effective settings as TOML.
    ShowConfig,
}

impl Command {
    fn into_bridge_command(self) -> Option<BridgeCommand> {
        let command = match self {
            Command::Configure { terminal_id } => BridgeCommand::Configure { terminal_id },
            Command::SaveAuthKey { auth_key } => BridgeCommand::SaveAuthKey { auth_key },
            Command::GetAuthKey => BridgeCommand::GetAuthKey,
            Command::Connect { timeout_seconds } => {
                BridgeCommand::ScanAndConnectToPeripheral { timeout_seconds }
            }
            Command::Disconnect => BridgeCommand::Disconnect,
            Command::RemoveAuthKey => BridgeCommand::RemoveAuthKey,
            Command::SendAction { action } => BridgeCommand::SendAction { action },
            Command::LockState => BridgeCommand::GetLockState,
            Command::Script | Command::ShowConfig => return None,
        };
        Some(command)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let mut settings = config::load_settings();
    if let Some(database_url) = cli.database_url {
        settings.database_url = database_url;
    }
    if let Some(latency_ms) = cli.latency_ms {
        settings.terminal_latency_ms = latency_ms;
    }

    if matches!(cli.command, Command::ShowConfig) {
        print!("{}", toml::to_string(&settings).context("failed to render settings")?);
        return Ok(());
    }

    let database_url = config::prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url)
        .await
        .with_context(|| format!("failed to open binding store at {database_url}"))?;
    let service = Arc::new(SimulatedService::new(settings.terminal_latency()));
    let bridge = LockBridge::new(service, Arc::new(storage), settings.correlator_config());

    if let Some(terminal_id) = bridge.restore().await? {
        info!(terminal_id = %terminal_id, "using persisted terminal");
    }

    match cli.command.into_bridge_command() {
        Some(command) => run_command(&bridge, command).await?,
        None => run_script(&bridge).await?,
    }

    if let Some(stats) = bridge.stats().await {
        info!(?stats, "correlator statistics");
    }
    Ok(())
}

async fn run_command(bridge: &LockBridge, command: BridgeCommand) -> Result<()> {
    let name = command.name();
    match bridge.execute(command).await {
        BridgeResponse::Reply(pending) => {
            let reply = pending.wait().await;
            print_line(&ReplyEnvelope::new(name, &reply))?;
        }
        BridgeResponse::ErrorReports(reports) => {
            print_line(&ReplyEnvelope::new(
                name,
                &Ok(ReplyPayload::text(outcome::ERROR_HANDLER_MARKER)),
            ))?;
            tokio::spawn(forward_reports(reports));
        }
    }
    Ok(())
}

async fn run_script(bridge: &LockBridge) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<BridgeCommand>(line) {
            Ok(command) => run_command(bridge, command).await?,
            Err(err) => {
                warn!(error = %err, "skipping malformed command");
                print_line(&ReplyEnvelope {
                    command: "invalid".into(),
                    ok: false,
                    payload: None,
                    error: Some(FailurePayload::new(ErrorCode::Validation, err.to_string())),
                })?;
            }
        }
    }
    Ok(())
}

async fn forward_reports(mut reports: ErrorReports) {
    while let Some(report) = reports.next().await {
        let line = serde_json::json!({ "event": "onError", "error": report });
        println!("{line}");
    }
}

fn print_line(envelope: &ReplyEnvelope) -> Result<()> {
    println!("{}", serde_json::to_string(envelope)?);
    Ok(())
}
