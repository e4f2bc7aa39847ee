pub mod access;
pub mod features;
pub mod generate;
pub mod history;

use axum::extract::{DefaultBodyLimit, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::error::ApiResult;
use crate::state::AppState;

/// Room for a base64 photo of a few megabytes.
const MAX_BODY_BYTES: usize = 20 * 1024 * 1024;

pub async fn health(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    state.db.health_check().await?;
    Ok(Json(json!({ "status": "ok" })))
}

pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/api/features", get(features::features))
        .route(generate::GENERATE_ROUTE, post(generate::generate))
        .route("/api/history", get(history::history))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
}
