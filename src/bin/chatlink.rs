//! Chatlink CLI binary.
//!
//! Secure chat transport client.
//!
//! # Commands
//!
//! - `connect` - Connect to a server; send JSON envelopes read from stdin,
//!   print inbound envelopes as JSON lines
//! - `config` - Print the effective configuration

use std::path::PathBuf;

use anyhow::Context;
use chatlink::{
    config::Config, ChatClient, ChatLinkError, ConnectionEvent, Envelope, KeyPolicy,
    MessageDispatcher, OpCode, SendDecision, VERSION,
};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "chatlink")]
#[command(version = VERSION)]
#[command(about = "Chatlink - secure chat transport client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and exchange envelopes over stdin/stdout
    Connect {
        /// Server endpoint (ws:// or wss://)
        #[arg(short, long)]
        endpoint: Option<String>,

        /// Config file path
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Key policy (per-connection, per-process)
        #[arg(long)]
        key_policy: Option<String>,

        /// Verbose logging
        #[arg(short, long)]
        verbose: bool,

        /// Log as JSON
        #[arg(long)]
        json_logs: bool,
    },

    /// Print the effective configuration as TOML
    Config {
        /// Config file path
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Server endpoint override
        #[arg(short, long)]
        endpoint: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Connect {
            endpoint,
            config,
            key_policy,
            verbose,
            json_logs,
        } => cmd_connect(endpoint, config, key_policy, verbose, json_logs),

        Commands::Config { config, endpoint } => cmd_config(config, endpoint),
    }
}

fn load_config(
    path: Option<PathBuf>,
    endpoint: Option<String>,
    key_policy: Option<String>,
) -> anyhow::Result<Config> {
    let mut config = Config::load(path.as_deref())?;
    if let Some(endpoint) = endpoint {
        config.client.endpoint = endpoint;
    }
    if let Some(policy) = key_policy {
        config.client.key_policy = policy
            .parse::<KeyPolicy>()
            .map_err(|e| anyhow::anyhow!(e))?;
    }
    Ok(config)
}

fn init_logging(verbose: bool, json: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    // Logs go to stderr; stdout carries envelopes
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn cmd_config(path: Option<PathBuf>, endpoint: Option<String>) -> anyhow::Result<()> {
    let config = load_config(path, endpoint, None)?;
    print!("{}", toml::to_string_pretty(&config)?);
    if let Err(e) = config.validate() {
        eprintln!("warning: {e}");
    }
    Ok(())
}

fn cmd_connect(
    endpoint: Option<String>,
    path: Option<PathBuf>,
    key_policy: Option<String>,
    verbose: bool,
    json_logs: bool,
) -> anyhow::Result<()> {
    init_logging(verbose, json_logs);

    let config = load_config(path, endpoint, key_policy)?;
    config.validate().context("Invalid configuration")?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run_session(config))
}

async fn run_session(config: Config) -> anyhow::Result<()> {
    let (tx, mut inbound) = mpsc::unbounded_channel::<Envelope>();
    let dispatcher = OpCode::ALL
        .iter()
        .filter(|op| !matches!(op, OpCode::ReceiveRsa | OpCode::SendAes))
        .fold(MessageDispatcher::new(), |dispatcher, op| {
            dispatcher.forward(*op, tx.clone())
        });
    drop(tx);

    let client = ChatClient::websocket(&config, dispatcher)?;
    let mut events = client.subscribe_events();
    let supervisor = client.start()?;

    tracing::info!(endpoint = %config.client.endpoint, "Connecting");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let parsed = serde_json::from_str::<serde_json::Value>(line)
                    .map_err(ChatLinkError::from)
                    .and_then(Envelope::from_json);
                let envelope = match parsed {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        tracing::warn!(error = %e, "Skipping invalid envelope");
                        continue;
                    },
                };
                match client.send(&envelope).await? {
                    SendDecision::Sent => tracing::debug!(op_code = %envelope.op_code(), "Sent"),
                    SendDecision::Throttled { remaining } => {
                        tracing::warn!(op_code = %envelope.op_code(), ?remaining, "Throttled");
                    },
                    other => tracing::warn!(op_code = %envelope.op_code(), outcome = ?other, "Not sent"),
                }
            },
            Some(envelope) = inbound.recv() => {
                println!("{}", envelope.to_json());
            },
            event = events.recv() => match event {
                Ok(ConnectionEvent::HandshakeComplete { connection_id }) => {
                    tracing::info!(%connection_id, "Ready");
                },
                Ok(event) => tracing::debug!(?event, "Connection event"),
                Err(e) => tracing::debug!(error = %e, "Event stream lagged"),
            },
        }
    }

    client.close("stdin closed");
    supervisor.await?;
    Ok(())
}
