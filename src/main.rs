use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

mod cli;

use cli::Cli;
use cli::commands::Commands;
use rmf::Gateway;
use rmf::backend::HttpConnector;
use rmf::config::Config;
use rmf::events::{Event, EventKind};
use rmf::ipc::{IpcServer, IpcServerConfig};

/// Watch interval when neither the flag nor the config sets one
const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_secs(60);

/// Level used until the configuration has been read
const PROVISIONAL_LOG_LEVEL: log::LevelFilter = log::LevelFilter::Info;

fn setup_logging() -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rmf")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("rmf.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    // Without RUST_LOG the logger accepts everything and log::max_level gates
    // it, so the configured level can be applied once config is loaded
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("trace"))
        .target(env_logger::Target::Pipe(target))
        .init();
    if !rust_log_set() {
        log::set_max_level(PROVISIONAL_LOG_LEVEL);
    }

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn rust_log_set() -> bool {
    std::env::var_os(env_logger::DEFAULT_FILTER_ENV).is_some()
}

fn parse_level(level: &str) -> Option<log::LevelFilter> {
    level.trim().parse().ok()
}

/// Switch to the configured level; RUST_LOG wins when set
fn apply_log_level(level: &str) {
    if rust_log_set() {
        return;
    }
    match parse_level(level) {
        Some(filter) => {
            log::set_max_level(filter);
            info!("Log level set to {}", filter);
        }
        None => log::warn!("Unknown logging.level '{}', keeping {}", level, PROVISIONAL_LOG_LEVEL),
    }
}

fn build_gateway(config: &Config) -> Result<Arc<Gateway>> {
    let descriptors = config.descriptors()?;
    let settings = config.gateway_settings()?;
    let gateway = Gateway::new(descriptors, Arc::new(HttpConnector), settings).context("Failed to build gateway")?;
    Ok(Arc::new(gateway))
}

fn seconds(flag: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .ok()
        .filter(|d| !d.is_zero())
        .ok_or_else(|| eyre::eyre!("{} must be a positive number of seconds, got {}", flag, value))
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
        println!("  {} backend(s) configured", config.remote_mcps.len());
    }

    let gateway = build_gateway(config)?;

    match &cli.command {
        Commands::Tools { json } => handle_tools_command(&gateway, *json).await,
        Commands::Call { tool, args, timeout } => handle_call_command(&gateway, tool, args, *timeout).await,
        Commands::Watch { interval } => handle_watch_command(&gateway, *interval).await,
        Commands::Serve { socket } => handle_serve_command(gateway, socket.clone(), config).await,
        Commands::Check => handle_check_command(&gateway),
    }
}

async fn handle_tools_command(gateway: &Gateway, json: bool) -> Result<()> {
    info!("Listing tools");
    let report = gateway.refresh().await.context("Catalog refresh failed")?;
    let snapshot = gateway.snapshot();

    if json {
        let tools: Vec<_> = snapshot.tools().collect();
        println!("{}", serde_json::to_string_pretty(&tools)?);
        return Ok(());
    }

    for failure in &report.failed {
        println!(
            "{} {} ({}): {}",
            "Unavailable:".yellow(),
            failure.name,
            failure.code,
            failure.message
        );
    }
    if snapshot.is_empty() {
        println!("{}", "No tools available".yellow());
        return Ok(());
    }
    for tool in snapshot.tools() {
        println!("{}  {}", tool.tool_id.green().bold(), tool.description);
    }
    println!("{} tool(s), revision {}", snapshot.len(), snapshot.revision());
    Ok(())
}

async fn handle_call_command(gateway: &Gateway, tool: &str, args: &str, timeout: Option<f64>) -> Result<()> {
    info!("Calling tool: {}", tool);
    let arguments: serde_json::Value = serde_json::from_str(args).context("--args must be valid JSON")?;

    let result = match timeout {
        Some(secs) => {
            gateway
                .call_tool_with_deadline(tool, arguments, seconds("--timeout", secs)?)
                .await
        }
        None => gateway.call_tool(tool, arguments).await,
    };

    match result {
        Ok(outcome) => {
            println!("{}", serde_json::to_string_pretty(&outcome.result)?);
            println!(
                "{} {} in {} ms ({} attempt(s))",
                "Done:".green(),
                outcome.tool_id,
                outcome.latency_ms(),
                outcome.attempts
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("{} [{}] {}", "Error:".red(), e.code().red().bold(), e);
            if let Some(status) = e.upstream_status() {
                eprintln!("  upstream status: {}", status);
            }
            Err(e).context(format!("Tool call '{}' failed", tool))
        }
    }
}

fn print_event(event: &Event) {
    let kind = match event.kind {
        EventKind::Error => event.kind.as_str().red(),
        EventKind::CatalogUpdated => event.kind.as_str().cyan(),
        EventKind::ToolCalled => event.kind.as_str().green(),
    };
    println!(
        "#{} {} {} {}",
        event.sequence,
        event.timestamp.format("%H:%M:%S"),
        kind,
        event.payload
    );
}

async fn handle_watch_command(gateway: &Gateway, interval: Option<f64>) -> Result<()> {
    let period = match interval {
        Some(secs) => seconds("--interval", secs)?,
        None => gateway.settings().refresh_interval.unwrap_or(DEFAULT_WATCH_INTERVAL),
    };
    info!("Watching with refresh every {:?}", period);
    println!("{} refresh every {:?}, Ctrl-C to stop", "Watching:".cyan(), period);

    let mut events = gateway.subscribe_events()?;
    let refresher = gateway.spawn_refresh_loop(period);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.next() => match event {
                Some(event) => print_event(&event),
                None => break,
            },
        }
    }

    gateway.shutdown();
    refresher.await.context("Refresh loop panicked")?;
    if events.dropped() > 0 {
        println!("{} {} event(s) dropped", "Note:".yellow(), events.dropped());
    }
    Ok(())
}

async fn handle_serve_command(gateway: Arc<Gateway>, socket: Option<PathBuf>, config: &Config) -> Result<()> {
    let socket_path = socket.unwrap_or_else(|| config.server.socket_path());
    info!("Serving on {}", socket_path.display());
    println!("{} {}", "Serving on".green(), socket_path.display());

    let refresher = gateway
        .settings()
        .refresh_interval
        .map(|period| gateway.spawn_refresh_loop(period));

    let stopper = {
        let gateway = Arc::clone(&gateway);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                gateway.shutdown();
            }
        })
    };

    let server = IpcServer::new(Arc::clone(&gateway), IpcServerConfig::default().with_socket_path(&socket_path));
    let result = server.run().await;

    gateway.shutdown();
    stopper.abort();
    if let Some(refresher) = refresher {
        refresher.await.context("Refresh loop panicked")?;
    }
    result.context("IPC server failed")?;
    println!("{}", "Stopped".cyan());
    Ok(())
}

fn handle_check_command(gateway: &Gateway) -> Result<()> {
    let registry = gateway.registry();
    println!("{} {} backend(s)", "Configuration OK:".green(), registry.len());
    for backend in registry.iter() {
        let descriptor = &backend.descriptor;
        println!(
            "  {} {} -> {} (timeout {:?}, {} attempt(s))",
            descriptor.namespace.green().bold(),
            descriptor.name,
            descriptor.base_url,
            descriptor.timeout,
            descriptor.retry.max_attempts
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Setup logging first so config loading is recorded
    setup_logging().context("Failed to setup logging")?;

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    apply_log_level(&config.logging.level);

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug"), Some(log::LevelFilter::Debug));
        assert_eq!(parse_level(" WARN "), Some(log::LevelFilter::Warn));
        assert_eq!(parse_level("off"), Some(log::LevelFilter::Off));
        assert_eq!(parse_level("loud"), None);
    }

    #[test]
    fn test_provisional_level_keeps_config_warnings() {
        assert!(log::Level::Warn <= PROVISIONAL_LOG_LEVEL);
        assert!(log::Level::Info <= PROVISIONAL_LOG_LEVEL);
    }

    #[test]
    fn test_seconds_rejects_non_positive() {
        assert!(seconds("--timeout", 0.0).is_err());
        assert!(seconds("--timeout", -1.0).is_err());
        assert_eq!(seconds("--timeout", 2.5).unwrap(), Duration::from_millis(2500));
    }
}
