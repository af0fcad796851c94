//! Orderwatch - Main Entry Point
//!
//! Durable scheduler for conditional trading missions, exposed over HTTP.

use std::sync::Arc;

use clap::Parser;
use mimalloc::MiMalloc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use orderwatch::config::AppConfig;
use orderwatch::execution::{HttpActivityRecorder, HttpExecutionClient};
use orderwatch::market::HttpPriceOracle;
use orderwatch::scheduler::Collaborators;
use orderwatch::server::create_app;
use orderwatch::store::SqliteMissionStore;

// Use mimalloc for better performance
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "orderwatch")]
#[command(about = "Orderwatch - Conditional Trading Mission Scheduler")]
#[command(version)]
struct Args {
    /// Host to bind to.
    #[arg(long, env = "ORDERWATCH_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on.
    #[arg(short, long, env = "ORDERWATCH_PORT", default_value = "8080")]
    port: u16,

    /// Path to the mission database.
    #[arg(long, env = "ORDERWATCH_DB", default_value = "orderwatch.db")]
    database: String,

    /// Base URL of the price oracle service.
    #[arg(long, env = "ORDERWATCH_ORACLE_URL")]
    oracle_url: Option<String>,

    /// Base URL of the execution service.
    #[arg(long, env = "ORDERWATCH_EXECUTOR_URL")]
    executor_url: Option<String>,

    /// Base URL of the activity sink.
    #[arg(long, env = "ORDERWATCH_ACTIVITY_URL")]
    activity_url: Option<String>,

    /// Canonical identifier of the quote asset swaps trade against.
    #[arg(long, env = "ORDERWATCH_QUOTE_ASSET")]
    quote_asset: Option<String>,

    /// Log level.
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_tracing(&args.log_level);

    tracing::info!("Starting Orderwatch v{}", env!("CARGO_PKG_VERSION"));

    let mut config = AppConfig::default();
    config.server.host = args.host;
    config.server.port = args.port;
    if let Some(url) = args.oracle_url {
        config.collaborators.oracle_url = url;
    }
    if let Some(url) = args.executor_url {
        config.collaborators.executor_url = url;
    }
    if let Some(url) = args.activity_url {
        config.collaborators.activity_url = url;
    }
    if let Some(asset) = args.quote_asset {
        config.collaborators.quote_asset = asset;
    }

    let store = Arc::new(SqliteMissionStore::open(&args.database).await?);
    tracing::info!(path = %args.database, "Mission store opened");

    let oracle = Arc::new(HttpPriceOracle::new(
        config.collaborators.oracle_url.clone(),
    )?);
    let executor = Arc::new(HttpExecutionClient::new(
        config.collaborators.executor_url.clone(),
    )?);
    let recorder = Arc::new(HttpActivityRecorder::new(
        config.collaborators.activity_url.clone(),
    )?);
    let collaborators = Collaborators {
        oracle: oracle.clone(),
        resolver: oracle,
        executor: executor.clone(),
        recorder,
        identity: executor,
        quote_asset: config.collaborators.quote_asset.clone(),
    };

    let (app, scheduler) = create_app(&config, store, collaborators);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.abort();
    tracing::info!("Server shut down gracefully");
    Ok(())
}

/// Initialize tracing/logging.
fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
