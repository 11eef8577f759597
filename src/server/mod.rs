pub mod handlers;
pub mod rate_limit;
pub(crate) mod streaming;
pub mod util;

use std::any::Any;
use std::sync::Arc;

use axum::Router;
use axum::http::{Method, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any as AnyOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Settings;
use crate::error::ApiErrorBody;
use crate::providers::zai::ChatUpstream;
use crate::tokenizer::TokenCounter;

use self::rate_limit::RateLimiter;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub upstream: Arc<dyn ChatUpstream>,
    pub tokenizer: Arc<dyn TokenCounter>,
    pub limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(
        settings: Arc<Settings>,
        upstream: Arc<dyn ChatUpstream>,
        tokenizer: Arc<dyn TokenCounter>,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::new(settings.server.rate_limit_per_minute));
        Self {
            settings,
            upstream,
            tokenizer,
            limiter,
        }
    }
}

// panic 内容只记日志，不返回给调用方
fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    tracing::error!(panic = %detail, "Panic recovered");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiErrorBody::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error",
            "api_error",
        )),
    )
        .into_response()
}

pub fn create_app(state: AppState) -> Router {
    let limiter = state.limiter.clone();

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_origin(AnyOrigin);

    // 外层在后：panic 恢复 > 访问日志 > CORS > 限流
    handlers::routes()
        .layer(axum::middleware::from_fn_with_state(
            limiter,
            rate_limit::rate_limit,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(handle_panic))
        .with_state(Arc::new(state))
}
