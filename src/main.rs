//! Manifold MCP Gateway
//!
//! One MCP endpoint in front of many backend MCP servers. Each client
//! session gets its own set of backend connections; capabilities are
//! aggregated under collision-free names and every call routes back to
//! the backend that owns it.

use clap::{Parser, Subcommand};
use manifold::auth::StaticResolver;
use manifold::backend::McpConnector;
use manifold::capability::PrefixingAggregator;
use manifold::config::GatewayConfig;
use manifold::logging::init_logging;
use manifold::metrics::GatewayMetrics;
use manifold::server::{serve_http, GatewayServer};
use manifold::session::{MemorySessionStore, SessionFactory, SessionManager};
use rmcp::transport::stdio;
use rmcp::ServiceExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "manifold", version, about = "MCP aggregation gateway")]
struct Cli {
    /// Path to the gateway configuration file
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the gateway on stdio (default)
    Serve,
    /// Serve the gateway over streamable HTTP
    ServeHttp,
    /// Load and validate the configuration, then print a summary
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut cli = Cli::parse();
    let command = cli.command.take().unwrap_or(Command::Serve);
    let config = load_config(&cli)?;

    match command {
        Command::Serve => {
            init_logging(&config.logging);
            run_stdio(config).await
        }
        Command::ServeHttp => {
            init_logging(&config.logging);
            run_http(config).await
        }
        Command::Check => run_check(config),
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<GatewayConfig> {
    let mut config = match &cli.config {
        Some(path) => GatewayConfig::load_from_path(path)?,
        None => GatewayConfig::load()?,
    };
    config.validate_and_expand()?;
    Ok(config)
}

fn build_manager(config: &GatewayConfig, metrics: Arc<GatewayMetrics>) -> Arc<SessionManager> {
    let connector = Arc::new(McpConnector::new(Arc::new(StaticResolver::new())));
    let aggregator = Arc::new(PrefixingAggregator::new());
    let factory = SessionFactory::new(connector, aggregator, config, Arc::clone(&metrics));
    let store = Arc::new(MemorySessionStore::new(Duration::from_secs(
        config.session.ttl_secs,
    )));
    Arc::new(SessionManager::new(
        store,
        factory,
        config.session.clone(),
        metrics,
    ))
}

fn log_final_stats(metrics: &GatewayMetrics) {
    let stats = metrics.snapshot();
    info!(
        sessions_created = stats.sessions_created,
        calls_routed = stats.calls_routed,
        call_failures = stats.call_failures,
        call_success_rate = stats.call_success_rate(),
        backend_reinits = stats.backend_reinits,
        "Gateway stopped"
    );
}

async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigquit = signal(SignalKind::quit())?;
        tokio::select! {
            _ = sigterm.recv() => {},
            _ = sigint.recv() => {},
            _ = sigquit.recv() => {},
            _ = tokio::signal::ctrl_c() => {},
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }

    Ok(())
}

async fn run_stdio(config: GatewayConfig) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let metrics = Arc::new(GatewayMetrics::new());
    let manager = build_manager(&config, Arc::clone(&metrics));
    let sweeper = manager.spawn_sweep_task();

    let server = GatewayServer::new(Arc::clone(&manager), Arc::clone(&config));
    let running = server.serve(stdio()).await?;
    info!("Gateway listening on stdio");

    let shutdown_notify = Arc::new(Notify::new());
    let shutdown_signal = shutdown_notify.clone();
    tokio::spawn(async move {
        if wait_for_shutdown_signal().await.is_ok() {
            info!("Shutdown signal received");
            shutdown_signal.notify_one();
        } else {
            info!("Shutdown signal handler failed; gateway will continue running");
        }
    });

    tokio::select! {
        quit = running.waiting() => match quit {
            Ok(reason) => info!(reason = ?reason, "Stdio transport closed"),
            Err(e) => error!(error = %e, "Stdio service task failed"),
        },
        _ = shutdown_notify.notified() => {
            info!("Gateway shutting down");
        }
    }

    sweeper.abort();
    manager.close_all().await;
    log_final_stats(&metrics);
    Ok(())
}

async fn run_http(config: GatewayConfig) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let metrics = Arc::new(GatewayMetrics::new());
    let manager = build_manager(&config, Arc::clone(&metrics));
    let sweeper = manager.spawn_sweep_task();

    let cancel = CancellationToken::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        if wait_for_shutdown_signal().await.is_ok() {
            info!("Shutdown signal received");
            cancel_on_signal.cancel();
        } else {
            info!("Shutdown signal handler failed; gateway will continue running");
        }
    });

    serve_http(Arc::clone(&manager), Arc::clone(&config), cancel).await?;

    sweeper.abort();
    manager.close_all().await;
    log_final_stats(&metrics);
    Ok(())
}

fn run_check(config: GatewayConfig) -> anyhow::Result<()> {
    let enabled = config.enabled_backends().len();
    println!("Configuration OK");
    println!("  server    {} ({})", config.server.name, config.server.bind);
    println!(
        "  sessions  max_active={} ttl={}s call_timeout={}s",
        config.session.max_active, config.session.ttl_secs, config.session.call_timeout_secs
    );
    println!(
        "  backends  {} enabled, {} disabled",
        enabled,
        config.backends.len() - enabled
    );
    for backend in &config.backends {
        let status = if backend.enabled { "on " } else { "off" };
        println!(
            "    [{}] {:<16} {}",
            status,
            backend.id,
            backend.transport.description()
        );
    }
    Ok(())
}
