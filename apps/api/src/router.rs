use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::{json, Value};

use appointment_cell::handlers::AppState;
use appointment_cell::router::scheduling_routes;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic scheduling API is running!" }))
        .route("/health", get(health))
        .merge(scheduling_routes(state))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
