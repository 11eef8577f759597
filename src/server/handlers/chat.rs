use axum::{
    body::Bytes,
    extract::State,
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::GatewayError;
use crate::providers::openai::validate::parse_chat_request;
use crate::server::AppState;
use crate::server::streaming::{collect_completion, stream_completion};

pub async fn chat_completions(
    State(app_state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, GatewayError> {
    let mut request = parse_chat_request(&body)?;
    if request.model.is_empty() {
        request.model = app_state.settings.model.default.clone();
    }

    let chat_id = Uuid::new_v4().to_string();
    tracing::info!(
        model = %request.model,
        stream = request.stream,
        messages = request.messages.len(),
        chat_id = %chat_id,
        "Processing chat completion request"
    );

    let upstream = app_state.upstream.send(&request, &chat_id).await?;

    if request.stream {
        Ok(stream_completion(app_state, request, upstream))
    } else {
        let response = collect_completion(&app_state, &request, upstream).await;
        Ok(Json(response).into_response())
    }
}
