use axum::{extract::State, response::Json};
use std::sync::Arc;

use crate::providers::openai::HealthResponse;
use crate::server::AppState;

pub async fn health(State(app_state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: app_state.settings.server.version.clone(),
    })
}
