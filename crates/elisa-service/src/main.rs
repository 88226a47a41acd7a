#![forbid(unsafe_code)]

//! **elisa** – Build orchestrator service.
//!
//! Hosts the session API: create sessions, start builds from a NuggetSpec,
//! observe progress, answer gates and questions, and export the built
//! workspace. Without a configured agent backend the service runs with
//! dry-run collaborators so the whole protocol can be exercised locally.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use elisa_orchestration::{OrchestratorConfig, SessionStore, StoreConfig};
use elisa_service::{create_app, dryrun, ServiceState};

//─────────────────────────────
//  CLI structure
//─────────────────────────────

#[derive(Parser)]
#[command(name = "elisa")]
#[command(about = "elisa build orchestrator - session API and scheduler")]
#[command(version)]
struct Cli {
    /// HTTP server port
    #[arg(long, default_value = "8080")]
    port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Concurrent tasks per session
    #[arg(long, default_value = "1")]
    max_parallel_tasks: usize,

    /// Session token budget
    #[arg(long, default_value = "500000")]
    max_budget: u64,

    /// Seconds between a session finishing and its removal
    #[arg(long, default_value = "300")]
    cleanup_grace_secs: u64,
}

//─────────────────────────────
//  Main application
//─────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    init_logging(&cli.log_level);

    info!("Starting elisa orchestrator service v{}", env!("CARGO_PKG_VERSION"));

    let store_config = StoreConfig {
        orchestrator: OrchestratorConfig {
            max_parallel_tasks: cli.max_parallel_tasks,
            max_budget: cli.max_budget,
            ..OrchestratorConfig::default()
        },
        cleanup_grace: Duration::from_secs(cli.cleanup_grace_secs),
    };

    // No agent backend is wired in this build; run with the dry-run
    // collaborators so sessions exercise the full protocol locally.
    let store: Arc<SessionStore> = SessionStore::new(dryrun::collaborators(), store_config);
    info!("session store initialized (dry-run collaborators)");

    let app = create_app(ServiceState::new(store));
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", cli.port))
        .await
        .with_context(|| format!("Failed to bind to port {}", cli.port))?;

    info!("HTTP server listening on port {}", cli.port);
    info!("Session API: http://localhost:{}/api/sessions", cli.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("elisa orchestrator service stopped");
    Ok(())
}

//─────────────────────────────
//  Utility functions
//─────────────────────────────

fn init_logging(log_level: &str) {
    let filter = format!("elisa_service={log_level},elisa_orchestration={log_level},tower_http=warn");
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
