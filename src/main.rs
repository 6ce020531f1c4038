//! Shelfie Engine
//!
//! Backend for a swipe-based book discovery client.
//!
//! # Architecture
//!
//! - **Queue Engine**: keeps an ordered queue of recommended books with covers
//! - **Library**: SQLite store of shown titles and liked books
//! - **API Server**: REST endpoints for the swipe client
//!
//! # Graceful Shutdown
//!
//! The engine handles SIGTERM and SIGINT signals, ensuring:
//! - In-flight requests complete
//! - Pending decisions are persisted
//! - Database connections are closed cleanly

use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use shelfie::api::{self, AppState};
use shelfie::config::Config;
use shelfie::database::{self, Database};
use shelfie::error::Result;
use shelfie::library::SqliteLibrary;
use shelfie::queue::{Collaborators, QueueEngine, QueueEvent};
use shelfie::sources::{HttpImageFetcher, HttpRecommendationSource, OpenLibraryCovers};

#[tokio::main]
async fn main() -> Result<()> {
    // Keep the guard alive so buffered file logs are flushed on exit
    let _log_guard = init_tracing();

    info!("===============================================================");
    info!("  Shelfie Engine v{}", env!("CARGO_PKG_VERSION"));
    info!("===============================================================");

    // Load configuration
    let config = Arc::new(Config::from_env()?);
    info!("Configuration loaded and validated");

    // Create shutdown channel
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Initialize database connection pool
    let db = Database::new(&config.database).await?;
    database::run_migrations(db.pool()).await?;
    info!("Library database ready");

    let library = Arc::new(SqliteLibrary::new(db.pool().clone()));
    let collaborators = Collaborators {
        source: Arc::new(HttpRecommendationSource::new(&config.source)?),
        covers: Arc::new(OpenLibraryCovers::new(&config.covers)?),
        images: Arc::new(HttpImageFetcher::new(&config.images)?),
        history: library.clone(),
        decisions: library.clone(),
    };

    let engine = QueueEngine::new(collaborators, config.queue.clone())?;
    info!("Queue engine started");

    let mut handles = Vec::new();
    handles.push(spawn_event_logger(&engine, shutdown_tx.subscribe()));

    // Load the first batch before the client asks for it
    let request = engine.request_session_refill();
    info!("Initial refill: {:?}", request);

    let state = Arc::new(AppState {
        engine: engine.clone(),
        favorites: library,
        database: Some(db.clone()),
    });
    handles.push(spawn_api_server(state, config.clone(), shutdown_tx.subscribe()));

    info!("===============================================================");
    info!("  API: http://{}:{}", config.api.host, config.api.port);
    info!("  Health: http://{}:{}/health", config.api.host, config.api.port);
    info!("===============================================================");

    // Wait for shutdown signal or service failure
    tokio::select! {
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
        }
        _ = wait_for_any_failure(&mut handles) => {
            warn!("A service failed, initiating shutdown");
        }
    }

    info!("Initiating graceful shutdown...");
    let _ = shutdown_tx.send(());

    let shutdown_timeout = Duration::from_secs(30);
    let graceful = async {
        shutdown_services(handles).await;
        engine.shutdown().await;
    };
    if tokio::time::timeout(shutdown_timeout, graceful).await.is_err() {
        warn!("Shutdown timeout exceeded, forcing exit");
    }

    db.close().await;

    info!("Shelfie Engine stopped gracefully");
    Ok(())
}

/// Initialize structured logging with tracing
///
/// `LOG_FORMAT=json` switches stdout to JSON lines. `LOG_DIR` adds a daily
/// rolling log file.
fn init_tracing() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        // Default log levels
        EnvFilter::new("shelfie=debug,shelfie_engine=debug,tower_http=debug,sqlx=warn,info")
    });

    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));
    let plain_layer = (!json).then(|| {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .with_ansi(std::env::var("NO_COLOR").is_err())
    });
    let json_layer = json.then(|| fmt::layer().json().with_current_span(true));

    let (file_layer, guard) = match std::env::var("LOG_DIR") {
        Ok(dir) if !dir.is_empty() => {
            let appender = tracing_appender::rolling::daily(dir, "shelfie-engine.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(plain_layer)
        .with(json_layer)
        .with(file_layer)
        .init();

    guard
}

/// Log queue events until shutdown
fn spawn_event_logger(
    engine: &QueueEngine,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    let mut events = engine.subscribe();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(QueueEvent::RefillFailed { reason }) => warn!("Refill failed: {}", reason),
                    Ok(QueueEvent::QueueStarved) => warn!("Queue starved; waiting for the client to retry"),
                    Ok(QueueEvent::ItemsAvailable { count }) => info!("{} books ready", count),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Event logger lagged, missed {} events", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = shutdown_rx.recv() => {
                    info!("Event logger shutting down");
                    break;
                }
            }
        }
    })
}

/// Spawn the API server
fn spawn_api_server(
    state: Arc<AppState>,
    config: Arc<Config>,
    shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = api::start_server(state, &config.api, shutdown_rx).await {
            error!("API server error: {:?}", e);
        }
    })
}

/// Wait for any task to fail
async fn wait_for_any_failure(handles: &mut [tokio::task::JoinHandle<()>]) {
    loop {
        if handles.iter().any(|handle| handle.is_finished()) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Wait for all services to complete shutdown
async fn shutdown_services(handles: Vec<tokio::task::JoinHandle<()>>) {
    for handle in handles {
        let _ = handle.await;
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
