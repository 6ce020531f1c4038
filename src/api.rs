//! HTTP API Server for the swipe client
//!
//! Exposes the queue engine and the liked-books library as REST endpoints.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ApiConfig;
use crate::database::Database;
use crate::error::{Error, ErrorBody, ErrorResponse, Result};
use crate::queue::{
    Book, Decision, DecisionTag, FavoritesStore, QueueEngine, QueueSnapshot, QueueStatus,
    RefillRequest, StatsSnapshot,
};

/// Shared application state
pub struct AppState {
    pub engine: QueueEngine,
    pub favorites: Arc<dyn FavoritesStore>,
    pub database: Option<Database>,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// The book currently on screen
#[derive(Debug, Serialize)]
pub struct CurrentBookResponse {
    pub title: String,
    pub description: String,
    pub cover_url: Option<String>,
    /// Undecided books including this one
    pub remaining: usize,
}

/// Request body for recording a like/skip
#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    pub tag: String,
}

#[derive(Debug, Serialize)]
pub struct RefillResponse {
    pub request: RefillRequest,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: QueueStatus,
    pub remaining: usize,
    pub snapshot: QueueSnapshot,
    pub stats: StatsSnapshot,
    /// Share of fetched candidates that reached the ready queue
    pub yield_ratio: f32,
}

/// Build the application router
pub fn router(state: Arc<AppState>, config: &ApiConfig) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Queue
        .route("/api/v1/queue/current", get(get_current))
        .route("/api/v1/queue/current/cover", get(get_current_cover))
        .route("/api/v1/queue/decisions", post(record_decision))
        .route("/api/v1/queue/refill", post(request_refill))
        .route("/api/v1/queue/status", get(get_status))
        // Library
        .route("/api/v1/favorites", get(list_favorites))
        .route("/api/v1/favorites/:title", delete(remove_favorite))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(config.request_timeout))
        .layer(cors)
        .with_state(state)
}

/// Start the API server and serve until `shutdown` fires
pub async fn start_server(
    state: Arc<AppState>,
    config: &ApiConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = router(state, config);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting queue API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            info!("API server shutting down");
        })
        .await?;

    Ok(())
}

/// Health check endpoint
async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let status = match &state.database {
        Some(database) => match database.health_check().await {
            Ok(()) => "healthy",
            Err(e) => {
                warn!("Health check: {}", e);
                "degraded"
            }
        },
        None => "healthy",
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// 404 telling the client whether to show a spinner or a retry button
fn queue_empty(status: QueueStatus) -> Response {
    let state = match status {
        QueueStatus::Loading => "loading",
        QueueStatus::Closed => "closed",
        _ => "starved",
    };
    let body = ErrorResponse {
        error: ErrorBody {
            code: Error::EmptyQueue.error_code(),
            message: format!("{} ({})", Error::EmptyQueue, state),
            retryable: status == QueueStatus::Starved,
        },
    };
    (StatusCode::NOT_FOUND, Json(body)).into_response()
}

async fn get_current(State(state): State<Arc<AppState>>) -> Response {
    let Some((current, remaining)) = state.engine.current_with_remaining() else {
        return queue_empty(state.engine.status());
    };

    let book = current.into_book();
    Json(CurrentBookResponse {
        title: book.title,
        description: book.description,
        cover_url: book.cover_url,
        remaining,
    })
    .into_response()
}

async fn get_current_cover(State(state): State<Arc<AppState>>) -> Response {
    let Some(current) = state.engine.current() else {
        return queue_empty(state.engine.status());
    };

    let cover = current.cover();
    (
        [(header::CONTENT_TYPE, cover.content_type())],
        cover.as_bytes().to_vec(),
    )
        .into_response()
}

async fn record_decision(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DecisionRequest>,
) -> Result<Json<Decision>> {
    let tag: DecisionTag = request.tag.parse()?;
    let decision = state.engine.decide(tag)?;
    Ok(Json(decision))
}

async fn request_refill(State(state): State<Arc<AppState>>) -> (StatusCode, Json<RefillResponse>) {
    let request = state.engine.request_session_refill();
    (StatusCode::ACCEPTED, Json(RefillResponse { request }))
}

async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let snapshot = state.engine.snapshot();
    let stats = state.engine.stats();
    Json(StatusResponse {
        status: snapshot.status(),
        remaining: snapshot.remaining(),
        snapshot,
        yield_ratio: stats.yield_ratio(),
        stats,
    })
}

async fn list_favorites(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Book>>> {
    Ok(Json(state.favorites.favorites().await?))
}

async fn remove_favorite(
    State(state): State<Arc<AppState>>,
    Path(title): Path<String>,
) -> Result<StatusCode> {
    if state.favorites.remove_favorite(&title).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(Error::not_found("favorite", title))
    }
}
