//! Main entry point for the Queue Warden matchmaking queue service
//!
//! This is the production entry point that initializes and runs the queue
//! service with proper error handling, logging, and graceful shutdown.

use anyhow::Result;
use clap::Parser;
use queue_warden::config::{AppConfig, StoreBackend};
use queue_warden::service::{AppState, HealthCheck, HealthStatus};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::time::Duration;
use tracing::{error, info, warn};

/// Queue Warden - distributed matchmaking queue with a lease-guarded tick
#[derive(Parser)]
#[command(
    name = "queue-warden",
    version,
    about = "A distributed matchmaking queue with periodic team formation",
    long_about = "Queue Warden keeps a shared, join-time ordered matchmaking queue in Redis. \
                 Every instance serves join/leave/status over HTTP; a periodic tick, guarded by \
                 a cross-instance lease, pulls the oldest players into two alternating teams \
                 and hands the match off, while a sweep expires entries that waited too long."
)]
struct Args {
    /// Configuration file path
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Path to configuration file (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Perform health check and exit
    #[arg(long, help = "Perform a health check and exit with status code")]
    health_check: bool,

    /// Log level override
    #[arg(
        short,
        long,
        value_name = "LEVEL",
        help = "Override log level (trace, debug, info, warn, error)"
    )]
    log_level: Option<String>,

    /// Redis URL override
    #[arg(long, value_name = "URL", help = "Override Redis connection URL")]
    redis_url: Option<String>,

    /// Use the process-local store
    #[arg(
        long,
        help = "Use the in-memory queue store and lock (single instance only)"
    )]
    memory_store: bool,

    /// AMQP URL override
    #[arg(long, value_name = "URL", help = "Override AMQP connection URL")]
    amqp_url: Option<String>,

    /// Disable event publishing
    #[arg(long, help = "Do not connect to AMQP; queue events are dropped")]
    no_amqp: bool,

    /// HTTP port override
    #[arg(long, value_name = "PORT", help = "Override queue API port")]
    http_port: Option<u16>,

    /// Metrics port override
    #[arg(long, value_name = "PORT", help = "Override metrics server port")]
    metrics_port: Option<u16>,

    /// Enable debug mode
    #[arg(short, long, help = "Enable debug mode with verbose logging")]
    debug: bool,

    /// Dry run mode (validate config and exit)
    #[arg(
        long,
        help = "Validate configuration and exit without starting service"
    )]
    dry_run: bool,
}

/// Initialize structured logging with the configured level
fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Perform health check and return appropriate exit code
async fn perform_health_check(config: AppConfig) -> Result<()> {
    info!("Performing health check...");

    let app_state = Arc::new(AppState::new(config).await?);

    // The check reports on a running service; no servers are started here
    match HealthCheck::check(app_state).await {
        Ok(health) => {
            println!("Health Check: {}", health.status);
            for check in &health.checks {
                println!(
                    "  {}: {}{}",
                    check.name,
                    check.status,
                    check
                        .message
                        .as_ref()
                        .map(|m| format!(" ({})", m))
                        .unwrap_or_default()
                );
            }
            match health.stats.players_queued {
                Some(count) => println!("  Players queued: {}", count),
                None => println!("  Players queued: unknown"),
            }

            let store_ok = health
                .checks
                .iter()
                .any(|c| c.name == "queue_store" && c.status == HealthStatus::Healthy);
            std::process::exit(if store_ok { 0 } else { 1 });
        }
        Err(e) => {
            error!("Health check failed: {}", e);
            std::process::exit(1);
        }
    }
}

/// Wait for shutdown signals (SIGINT, SIGTERM)
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C) signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

/// Periodically log the queue and tick picture
async fn health_check_task(app_state: Arc<AppState>) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));

    while app_state.is_running().await {
        interval.tick().await;

        match HealthCheck::check(app_state.clone()).await {
            Ok(health) => {
                info!(
                    "Health check: {} - {:?} queued, {} matches formed by this instance",
                    health.status, health.stats.players_queued, health.stats.matches_formed
                );
            }
            Err(e) => {
                warn!("Health check failed: {}", e);
            }
        }
    }
}

/// Display startup banner with service information
fn display_startup_banner(config: &AppConfig) {
    info!("🚀 Queue Warden Matchmaking Queue");
    info!("   Service: {}", config.service.name);
    info!("   Instance: {}", config.service.instance_id);
    info!("   Log level: {}", config.service.log_level);
    info!("   Queue API port: {}", config.service.http_port);
    info!("   Metrics port: {}", config.service.metrics_port);
    match config.store.backend {
        StoreBackend::Redis => info!("   Store: redis ({})", config.store.redis_url),
        StoreBackend::Memory => info!("   Store: in-memory"),
    }
    if config.amqp.enabled {
        info!("   AMQP: {}", config.amqp.url);
    } else {
        info!("   AMQP: disabled");
    }
    info!(
        "   Team size: {} ({} players per match)",
        config.matchmaking.team_size,
        config.matchmaking.team_size * 2
    );
    info!(
        "   Tick every {}s, sweep every {}s, queue timeout {}s",
        config.matchmaking.tick_interval_seconds,
        config.matchmaking.sweep_interval_seconds,
        config.matchmaking.queue_timeout_seconds
    );
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}

/// Load and merge configuration from environment and CLI arguments
fn load_config(args: &Args) -> Result<AppConfig> {
    // Start with environment-based config
    let mut config = if let Some(config_path) = &args.config {
        AppConfig::from_file(config_path)?
    } else {
        AppConfig::from_env()?
    };

    // Apply CLI overrides
    if let Some(log_level) = &args.log_level {
        config.service.log_level = log_level.clone();
    }

    if args.debug {
        config.service.log_level = "debug".to_string();
    }

    if let Some(redis_url) = &args.redis_url {
        config.store.redis_url = redis_url.clone();
    }

    if args.memory_store {
        config.store.backend = StoreBackend::Memory;
    }

    if let Some(amqp_url) = &args.amqp_url {
        config.amqp.url = amqp_url.clone();
    }

    if args.no_amqp {
        config.amqp.enabled = false;
    }

    if let Some(http_port) = args.http_port {
        config.service.http_port = http_port;
    }

    if let Some(metrics_port) = args.metrics_port {
        config.service.metrics_port = metrics_port;
    }

    queue_warden::config::validate_config(&config)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration (CLI args can override environment/config file)
    let config = load_config(&args).unwrap_or_else(|e| {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    });

    // Initialize logging early (before any other operations)
    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    // Handle special modes
    if args.health_check {
        return perform_health_check(config).await;
    }

    if args.dry_run {
        info!("Configuration validation successful");
        display_startup_banner(&config);
        info!("Dry run completed - exiting without starting service");
        return Ok(());
    }

    display_startup_banner(&config);

    info!("Initializing service components...");
    let app_state = match AppState::new(config.clone()).await {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("Failed to initialize application: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting service...");
    if let Err(e) = app_state.start().await {
        error!("Failed to start service: {}", e);
        std::process::exit(1);
    }

    let health_task = {
        let app_state = app_state.clone();
        tokio::spawn(async move {
            health_check_task(app_state).await;
        })
    };

    info!("✅ Queue Warden is running");
    info!("Press Ctrl+C to shutdown gracefully...");

    wait_for_shutdown_signal().await;

    info!("🛑 Shutdown signal received, beginning graceful shutdown...");
    health_task.abort();

    match tokio::time::timeout(config.shutdown_timeout(), app_state.shutdown()).await {
        Ok(Ok(())) => {
            info!("✅ Graceful shutdown completed successfully");
        }
        Ok(Err(e)) => {
            error!("Error during shutdown: {}", e);
        }
        Err(_) => {
            warn!("⚠️  Shutdown timeout exceeded, forcing exit");
        }
    }

    info!("🛑 Queue Warden stopped");
    Ok(())
}
