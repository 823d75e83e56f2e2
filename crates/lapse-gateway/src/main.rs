use clap::Parser;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use lapse_bookings::BookingStateMachine;
use lapse_core::{Clock, LapseConfig, SystemClock};
use lapse_jobs::{JobKind, JobQueue, QueueSettings};
use lapse_scheduler::{CancelBookingHandler, EngineSettings, JobHandlerRegistry, SchedulerEngine};

mod app;
mod http;
mod logging;

#[derive(Debug, Parser)]
#[command(name = "lapse-gateway", version, about = "Booking API with a persistent job scheduler")]
struct Args {
    /// Path to lapse.toml (default: $LAPSE_CONFIG or ~/.lapse/lapse.toml)
    #[arg(long)]
    config: Option<String>,

    /// Override the configured HTTP port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // load config: explicit path > LAPSE_CONFIG env > ~/.lapse/lapse.toml
    let (mut config, load_error) = match LapseConfig::load(args.config.as_deref()) {
        Ok(config) => (config, None),
        Err(e) => (LapseConfig::default(), Some(e)),
    };
    let _log_guards = logging::init_logging(&config.logging);
    if let Some(e) = load_error {
        warn!("Config load failed ({}), using defaults", e);
    }
    if let Some(port) = args.port {
        config.gateway.port = port;
    }

    let db_path = config.database.path.clone();
    ensure_parent_dir(&db_path);
    info!(path = %db_path, "opening SQLite database");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let queue_settings = QueueSettings::from_config(&config.scheduler);

    // request side: bookings and their jobs share one connection so they commit together
    let shared = Arc::new(Mutex::new(lapse_jobs::db::open(&db_path)?));
    let queue = Arc::new(
        JobQueue::with_shared(shared, clock.clone())?.with_settings(queue_settings.clone()),
    );
    let bookings = Arc::new(
        BookingStateMachine::new(queue.clone(), clock.clone())?
            .with_grace_period(config.booking.grace_period()),
    );
    info!("database migrations complete");

    // engine side: its own connection so polling never waits on request handlers
    let engine_queue = Arc::new(
        JobQueue::new(lapse_jobs::db::open(&db_path)?, clock.clone())?
            .with_settings(queue_settings),
    );
    let mut registry = JobHandlerRegistry::new();
    registry.register(
        JobKind::CancelBooking,
        Arc::new(CancelBookingHandler::new(bookings.clone())),
    );
    let engine = SchedulerEngine::new(engine_queue, Arc::new(registry))
        .with_settings(EngineSettings::from_config(&config.scheduler));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let engine_task = tokio::spawn(engine.run(shutdown_rx));

    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;
    let state = Arc::new(app::AppState::new(config, queue, bookings));
    let router = app::build_router(state);

    info!("lapse gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // let the scheduler finish its current tick before exiting
    let _ = shutdown_tx.send(true);
    if let Err(e) = engine_task.await {
        warn!("scheduler task ended abnormally: {e}");
    }
    info!("shutdown complete");
    Ok(())
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("cannot listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl-C, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}
