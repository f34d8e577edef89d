//! API routes.

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, Method, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use moodlens_core::{DetectionResult, Pipeline};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::codec::decode_image;
use crate::error::{ApiError, ApiResult};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

impl AppState {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DetectRequest {
    image: Option<String>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Create the API router.
pub fn create_router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/detect-emotion", post(detect_emotion).options(preflight))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
        .with_state(state)
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}

async fn detect_emotion(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> ApiResult<Json<DetectionResult>> {
    let body = body.map_err(body_error)?;
    let request: DetectRequest =
        serde_json::from_slice(&body).map_err(|e| ApiError::bad_request(format!("invalid JSON body: {e}")))?;
    let payload = request
        .image
        .ok_or_else(|| ApiError::bad_request("missing 'image' field"))?;
    let frame = decode_image(&payload).map_err(|e| ApiError::bad_request(e.to_string()))?;

    let pipeline = Arc::clone(&state.pipeline);
    let result = tokio::task::spawn_blocking(move || pipeline.detect(&frame))
        .await
        .map_err(|e| ApiError::internal(format!("detection worker failed: {e}")))?;

    Ok(Json(result))
}

/// Oversized bodies surface as a length-limit rejection; keep them in the
/// JSON error shape.
fn body_error(rejection: BytesRejection) -> ApiError {
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::payload_too_large(rejection.body_text())
    } else {
        ApiError::bad_request(rejection.body_text())
    }
}

async fn preflight() -> StatusCode {
    StatusCode::OK
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
