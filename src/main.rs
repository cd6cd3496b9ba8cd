// MIT License - Copyright (c) 2026 Peter Wright
// gms-monitor: print decoded panel traffic, discover names, send area commands

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

use telenot_gms::constants::{ADDR_EXT_OCCUPIED_INPUTS, ADDR_EXT_OCCUPIED_OUTPUTS};
use telenot_gms::{CommandOutcome, ConnectionConfig, PanelEvent, TelenotPanel};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "gms-monitor")]
#[command(about = "Monitor and control a Telenot alarm panel through its GMS gateway")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "gms.toml")]
    config: String,

    /// Gateway host, overriding the configuration file
    #[arg(long)]
    host: Option<String>,

    /// Omit timestamps from log output
    #[arg(long)]
    no_timestamps: bool,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Print every decoded event as a JSON line until interrupted
    Listen,
    /// Query the names of addresses (hex `0x0010`, decimal, or ranges `0x0000-0x001F`)
    Discover {
        #[arg(long = "address", required = true, num_args = 1..)]
        addresses: Vec<String>,
    },
    /// Arm an area (Sicherungsbereich scharf)
    ArmAway {
        #[arg(long)]
        area: u8,
    },
    /// Arm an area internally (Internbereich ein)
    ArmHome {
        #[arg(long)]
        area: u8,
    },
    /// Disarm an area
    Disarm {
        #[arg(long)]
        area: u8,
    },
    /// Print which inputs (or, with --outputs, outputs) the panel reports as used
    UsedState {
        #[arg(long)]
        outputs: bool,
    },
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct Config {
    #[serde(default)]
    gateway: GatewayToml,
    #[serde(default)]
    discovery: DiscoveryToml,
}

#[derive(Debug, Deserialize)]
struct GatewayToml {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_connect_timeout")]
    connect_timeout_ms: u64,
    #[serde(default = "default_ack_timeout")]
    ack_timeout_ms: u64,
    #[serde(default = "default_poll_timeout")]
    poll_timeout_ms: u64,
    #[serde(default = "default_reconnect_delay")]
    reconnect_delay_ms: u64,
    #[serde(default = "default_max_connect_retries")]
    max_connect_retries: u32,
    #[serde(default)]
    request_status_on_announce: bool,
}

impl Default for GatewayToml {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            connect_timeout_ms: default_connect_timeout(),
            ack_timeout_ms: default_ack_timeout(),
            poll_timeout_ms: default_poll_timeout(),
            reconnect_delay_ms: default_reconnect_delay(),
            max_connect_retries: default_max_connect_retries(),
            request_status_on_announce: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DiscoveryToml {
    #[serde(default = "default_discovery_attempts")]
    attempts: u32,
    #[serde(default = "default_discovery_interval")]
    interval_ms: u64,
    #[serde(default = "default_query_delay")]
    query_delay_ms: u64,
    /// Addresses whose names `listen` queries after connecting
    #[serde(default)]
    addresses: Vec<String>,
}

impl Default for DiscoveryToml {
    fn default() -> Self {
        Self {
            attempts: default_discovery_attempts(),
            interval_ms: default_discovery_interval(),
            query_delay_ms: default_query_delay(),
            addresses: Vec::new(),
        }
    }
}

fn default_host() -> String {
    ConnectionConfig::default().host
}
fn default_port() -> u16 {
    telenot_gms::config::DEFAULT_PORT
}
fn default_connect_timeout() -> u64 {
    10000
}
fn default_ack_timeout() -> u64 {
    5000
}
fn default_poll_timeout() -> u64 {
    1000
}
fn default_reconnect_delay() -> u64 {
    5000
}
fn default_max_connect_retries() -> u32 {
    3
}
fn default_discovery_attempts() -> u32 {
    30
}
fn default_discovery_interval() -> u64 {
    100
}
fn default_query_delay() -> u64 {
    500
}

fn load_config(path: &str) -> Result<Config> {
    if !Path::new(path).exists() {
        info!("No config file at {}, using defaults", path);
        return Ok(Config::default());
    }
    let text = std::fs::read_to_string(path).context("Failed to read config file")?;
    toml::from_str(&text).context("Failed to parse config file")
}

fn build_connection_config(config: &Config, host_override: Option<&str>) -> ConnectionConfig {
    let gateway = &config.gateway;
    let discovery = &config.discovery;
    ConnectionConfig::builder()
        .host(host_override.unwrap_or(gateway.host.as_str()))
        .port(gateway.port)
        .connect_timeout_ms(gateway.connect_timeout_ms)
        .ack_timeout_ms(gateway.ack_timeout_ms)
        .poll_timeout_ms(gateway.poll_timeout_ms)
        .reconnect_delay_ms(gateway.reconnect_delay_ms)
        .max_connect_retries(gateway.max_connect_retries)
        .request_status_on_announce(gateway.request_status_on_announce)
        .discovery_attempts(discovery.attempts)
        .discovery_interval_ms(discovery.interval_ms)
        .discovery_query_delay_ms(discovery.query_delay_ms)
        .build()
}

fn parse_number(s: &str) -> Result<u16> {
    let s = s.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16).with_context(|| format!("Invalid hex address: {s}")),
        None => s.parse().with_context(|| format!("Invalid address: {s}")),
    }
}

/// Parse address arguments: single values or inclusive `start-end` ranges.
fn parse_addresses(args: &[String]) -> Result<Vec<u16>> {
    let mut addresses = Vec::new();
    for arg in args.iter().flat_map(|a| a.split(',')) {
        match arg.split_once('-') {
            Some((start, end)) => {
                let (start, end) = (parse_number(start)?, parse_number(end)?);
                anyhow::ensure!(start <= end, "Empty address range: {arg}");
                addresses.extend(start..=end);
            }
            None => addresses.push(parse_number(arg)?),
        }
    }
    Ok(addresses)
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct EventLine<'a> {
    time: String,
    #[serde(flatten)]
    event: &'a PanelEvent,
}

fn print_event(event: &PanelEvent) {
    let line = EventLine {
        time: Utc::now().to_rfc3339(),
        event,
    };
    match serde_json::to_string(&line) {
        Ok(json) => println!("{json}"),
        Err(e) => warn!("Failed to serialize event: {e}"),
    }
}

fn report_outcome(action: &str, area: u8, outcome: CommandOutcome) -> Result<()> {
    match outcome {
        CommandOutcome::Success => {
            info!("{action} area {area}: acknowledged");
            Ok(())
        }
        CommandOutcome::Failed { phase, reason } => {
            anyhow::bail!("{action} area {area} failed during {phase:?}: {reason}")
        }
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Stream events until SIGINT/SIGTERM, reconnecting when the gateway drops.
async fn listen(connection_config: ConnectionConfig, addresses: Vec<u16>) -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let reconnect_delay_ms = connection_config.reconnect_delay_ms;

    let mut attempt: u32 = 0;
    loop {
        if attempt > 0 {
            let delay_ms = reconnect_delay_ms * (1u64 << (attempt - 1).min(4));
            error!(
                "Reconnecting in {:.1}s (attempt {attempt})...",
                delay_ms as f64 / 1000.0
            );
            sleep(Duration::from_millis(delay_ms)).await;
        }

        let mut panel = match TelenotPanel::connect(connection_config.clone()).await {
            Ok(panel) => panel,
            Err(e) if e.is_retryable() => {
                warn!("Connect failed: {e}");
                attempt += 1;
                continue;
            }
            Err(e) => return Err(e).context("Failed to connect to gateway"),
        };
        attempt = 0;

        let mut events = panel.subscribe();
        if !addresses.is_empty() {
            match panel.discover_names(&addresses).await {
                Ok(report) => info!("{} of {} names found", report.found, report.queried),
                Err(e) => warn!("Name discovery failed: {e}"),
            }
        }

        let shutdown = loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(PanelEvent::Disconnected) => {
                        print_event(&PanelEvent::Disconnected);
                        break false;
                    }
                    Ok(event) => print_event(&event),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Dropped {n} events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break false,
                },
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down...");
                    break true;
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down...");
                    break true;
                }
            }
        };

        if let Err(e) = panel.disconnect().await {
            warn!("Error disconnecting: {e}");
        }
        if shutdown {
            return Ok(());
        }
        warn!("Gateway disconnected, will attempt reconnection");
        attempt = 1;
    }
}

async fn discover(connection_config: ConnectionConfig, addresses: Vec<u16>) -> Result<()> {
    let mut panel = TelenotPanel::connect(connection_config)
        .await
        .context("Failed to connect to gateway")?;
    let report = panel.discover_names(&addresses).await;
    panel.disconnect().await?;

    let report = report.context("Name discovery failed")?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn used_state(connection_config: ConnectionConfig, outputs: bool) -> Result<()> {
    let extension = if outputs {
        ADDR_EXT_OCCUPIED_OUTPUTS
    } else {
        ADDR_EXT_OCCUPIED_INPUTS
    };
    let mut panel = TelenotPanel::connect(connection_config)
        .await
        .context("Failed to connect to gateway")?;
    let status = panel.query_used_state(extension).await;
    panel.disconnect().await?;

    let status = status
        .context("Used-state query failed")?
        .context("No used-state answer from the panel")?;
    let used: Vec<String> = status
        .states()
        .filter(|&(_, active)| active)
        .map(|(address, _)| format!("{address:#06x}"))
        .collect();
    println!("{}", serde_json::to_string_pretty(&used)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG controls verbosity (e.g. RUST_LOG=debug or RUST_LOG=telenot_gms=trace).
    // Default: info.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // Logs go to stderr so stdout stays valid JSON lines
    if cli.no_timestamps || std::env::var_os("JOURNAL_STREAM").is_some() {
        tracing_subscriber::fmt()
            .without_time()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let config = load_config(&cli.config)?;
    let connection_config = build_connection_config(&config, cli.host.as_deref());

    match cli.command {
        CliCommand::Listen => {
            let addresses = parse_addresses(&config.discovery.addresses)?;
            listen(connection_config, addresses).await
        }
        CliCommand::Discover { addresses } => {
            discover(connection_config, parse_addresses(&addresses)?).await
        }
        CliCommand::ArmAway { area } => {
            let mut panel = TelenotPanel::connect(connection_config).await?;
            let outcome = panel.arm_away(area).await;
            panel.disconnect().await?;
            report_outcome("Arm away", area, outcome?)
        }
        CliCommand::ArmHome { area } => {
            let mut panel = TelenotPanel::connect(connection_config).await?;
            let outcome = panel.arm_home(area).await;
            panel.disconnect().await?;
            report_outcome("Arm home", area, outcome?)
        }
        CliCommand::Disarm { area } => {
            let mut panel = TelenotPanel::connect(connection_config).await?;
            let outcome = panel.disarm(area).await;
            panel.disconnect().await?;
            report_outcome("Disarm", area, outcome?)
        }
        CliCommand::UsedState { outputs } => used_state(connection_config, outputs).await,
    }
}
