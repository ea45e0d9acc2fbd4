#![forbid(unsafe_code)]

//! `companion-bridge`: command-line front end for the bridge.
//!
//! Resolves the companion serving the current directory, streams its events
//! as JSON lines, and sends one-shot editor actions.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use companion_bridge::discovery::resolver::PortResolver;
use companion_bridge::discovery::ValidatedServer;
use companion_bridge::events::bus::Notification;
use companion_bridge::{AppError, Bridge, BridgeConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "companion-bridge",
    about = "Find and talk to a local companion server",
    version,
    long_about = None
)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Use this port instead of discovering one.
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
    port: Option<u16>,

    /// Working directory to match servers against (defaults to the current one).
    #[arg(long)]
    cwd: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List every validated companion and the one that would be selected.
    Discover,

    /// Print the resolved port.
    Resolve {
        /// Start the companion if none is running.
        #[arg(long)]
        launch: bool,
    },

    /// Stream events as JSON lines until interrupted.
    Watch {
        /// Start the companion if none is running.
        #[arg(long)]
        launch: bool,
        /// Only print these event types (repeatable). Lifecycle changes are
        /// always printed.
        #[arg(long = "event")]
        events: Vec<String>,
        /// Also print server heartbeats.
        #[arg(long)]
        heartbeats: bool,
    },

    /// Append text to the companion's prompt.
    Append {
        /// Text to append.
        text: String,
        /// Start the companion if none is running.
        #[arg(long)]
        launch: bool,
    },

    /// Run a companion command.
    #[command(name = "command")]
    Exec {
        /// Command name.
        name: String,
        /// Start the companion if none is running.
        #[arg(long)]
        launch: bool,
    },

    /// Ask the companion to exit.
    Shutdown,
}

/// Exit status when no companion could be found or started.
const EXIT_NO_COMPANION: u8 = 2;

fn main() -> Result<ExitCode> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    let outcome = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args));
    exit_status(outcome).map(ExitCode::from)
}

/// Discovery failures are an expected outcome, reported with a distinct
/// status; anything else propagates.
fn exit_status(outcome: Result<()>) -> Result<u8> {
    match outcome {
        Ok(()) => Ok(0),
        Err(err) if err.is_discovery() => {
            warn!(%err, "no companion server available");
            Ok(EXIT_NO_COMPANION)
        }
        Err(err) => Err(err),
    }
}

async fn run(args: Cli) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => BridgeConfig::load_from_path(path)?,
        None => BridgeConfig::default(),
    };
    config.apply_env_overrides();
    if args.port.is_some() {
        config.port = args.port;
    }

    let cwd = match args.cwd {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };

    match args.command {
        Command::Discover => discover(&config, cwd).await,
        Command::Resolve { launch } => {
            let bridge = Bridge::from_config(&config, cwd)?;
            let port = bridge.resolve_port(launch).await?;
            println!("{port}");
            Ok(())
        }
        Command::Watch {
            launch,
            events,
            heartbeats,
        } => {
            let bridge = Bridge::from_config(&config, cwd)?;
            watch(&bridge, launch, &events, heartbeats).await
        }
        Command::Append { text, launch } => {
            let bridge = Bridge::from_config(&config, cwd)?;
            let port = bridge.resolve_port(launch).await?;
            bridge.append_text(port, &text).await
        }
        Command::Exec { name, launch } => {
            let bridge = Bridge::from_config(&config, cwd)?;
            let port = bridge.resolve_port(launch).await?;
            bridge.execute_command(port, &name).await
        }
        Command::Shutdown => {
            let bridge = Bridge::from_config(&config, cwd)?;
            let port = bridge.resolve_port(false).await?;
            if bridge.request_shutdown(port).await {
                info!(port, "companion acknowledged shutdown");
                Ok(())
            } else {
                Err(AppError::Unreachable(format!(
                    "companion on port {port} did not acknowledge shutdown"
                )))
            }
        }
    }
}

async fn discover(config: &BridgeConfig, cwd: PathBuf) -> Result<()> {
    let resolver = PortResolver::from_config(config, cwd)?;
    let servers = resolver.discover().await?;
    let selected = resolver.select(servers.clone()).await.ok();

    println!("{}", discovery_report(&servers, selected.as_ref())?);
    Ok(())
}

fn discovery_report(
    servers: &[ValidatedServer],
    selected: Option<&ValidatedServer>,
) -> Result<String> {
    let report = serde_json::json!({
        "servers": servers,
        "selected": selected,
    });
    serde_json::to_string_pretty(&report)
        .map_err(|err| AppError::Io(format!("failed to encode discovery report: {err}")))
}

/// Whether `watch` prints `notification`. Lifecycle notifications always
/// pass; events must match `filter` (when non-empty), and heartbeats need
/// `heartbeats` or an explicit filter entry.
fn should_print(notification: &Notification, filter: &[String], heartbeats: bool) -> bool {
    let Notification::Event { event, .. } = notification else {
        return true;
    };
    if filter.is_empty() {
        return heartbeats || !event.is_heartbeat();
    }
    filter.contains(&event.event_type)
}

async fn watch(bridge: &Bridge, launch: bool, filter: &[String], heartbeats: bool) -> Result<()> {
    let mut notifications = bridge.on_all();
    let port = bridge.connect(launch).await?;
    info!(port, "watching companion events");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
            notification = notifications.recv() => {
                let Some(notification) = notification else { break };
                if !should_print(&notification, filter, heartbeats) {
                    continue;
                }
                match serde_json::to_string(&notification) {
                    Ok(line) => println!("{line}"),
                    Err(err) => warn!(%err, "failed to encode notification"),
                }
            }
        }
    }

    bridge.shutdown();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
