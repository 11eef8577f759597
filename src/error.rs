use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Upstream auth error (status {status:?}): {message}")]
    UpstreamAuth { status: Option<u16>, message: String },

    #[error("Upstream API error: status {status}")]
    UpstreamApi { status: u16 },

    #[error("Request construction error: {0}")]
    RequestConstruction(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Image upload error: {0}")]
    ImageUpload(String),

    #[error("Rate limit exceeded ({limit} requests per minute)")]
    RateLimited { limit: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

/// 对外错误体：`{code, message, type}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiErrorBody {
    pub code: u16,
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
}

impl ApiErrorBody {
    pub fn new(status: StatusCode, message: impl Into<String>, error_type: &str) -> Self {
        Self {
            code: status.as_u16(),
            message: message.into(),
            error_type: error_type.to_string(),
        }
    }
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            GatewayError::Validation(_) => "validation_error",
            GatewayError::UpstreamAuth { .. }
            | GatewayError::UpstreamApi { .. }
            | GatewayError::ImageUpload(_) => "upstream_error",
            GatewayError::RateLimited { .. } => "rate_limit_error",
            _ => "api_error",
        }
    }

    // 5xx 不向调用方暴露上游细节，只写日志
    fn public_message(&self) -> String {
        match self {
            GatewayError::Validation(msg) => msg.clone(),
            GatewayError::RateLimited { limit } => format!(
                "Rate limit exceeded. Maximum {} requests per minute.",
                limit
            ),
            _ => "Failed to process request".to_string(),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = ApiErrorBody::new(status, self.public_message(), self.error_type());
        (status, Json(body)).into_response()
    }
}
