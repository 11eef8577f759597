use axum::{extract::State, response::Json};
use chrono::Utc;
use std::sync::Arc;

use crate::providers::openai::{Model, ModelListResponse};
use crate::server::AppState;

pub const OWNED_BY: &str = "z.ai";

pub async fn list_models(State(app_state): State<Arc<AppState>>) -> Json<ModelListResponse> {
    Json(ModelListResponse {
        object: "list".to_string(),
        data: vec![Model {
            id: app_state.settings.model.default.clone(),
            object: "model".to_string(),
            created: Utc::now().timestamp(),
            owned_by: OWNED_BY.to_string(),
        }],
    })
}
