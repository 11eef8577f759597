pub mod client;
pub mod formatter;
pub mod sse;
pub mod translate;
pub mod types;
pub mod upload;

pub use client::{ByteStream, ChatUpstream, UpstreamGatewayClient};
pub use formatter::{FormattedDelta, ResponsePhaseFormatter};
pub use sse::parse_sse_stream;
pub use translate::{ImageUploader, RequestTranslator};
pub use types::{Phase, UpstreamEvent, UpstreamRequestBody};
pub use upload::ZaiImageUploader;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, REFERER};

use crate::config::Settings;
use crate::http_client::header_map;

pub const AUTH_PATH: &str = "/api/v1/auths/";
pub const UPLOAD_PATH: &str = "/api/v1/files/";
pub const CHAT_PATH: &str = "/api/v2/chat/completions";

/// Browser header set plus bearer token and the per-chat referer.
pub(crate) fn chat_headers(settings: &Settings, token: &str, chat_id: &str) -> HeaderMap {
    let mut headers = header_map(&settings.upstream_headers());
    match HeaderValue::from_str(&format!("Bearer {}", token)) {
        Ok(v) => {
            headers.insert(AUTHORIZATION, v);
        }
        Err(_) => tracing::warn!("Session token is not a valid header value, sending without it"),
    }
    if let Ok(v) = HeaderValue::from_str(&format!(
        "{}/c/{}",
        settings.upstream.origin(),
        chat_id
    )) {
        headers.insert(REFERER, v);
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_headers_override_referer_and_add_bearer() {
        let settings = Settings::default();
        let headers = chat_headers(&settings, "tok", "chat-1");
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer tok");
        assert_eq!(
            headers.get(REFERER).unwrap(),
            "https://chat.z.ai/c/chat-1"
        );
        assert_eq!(headers.get_all(REFERER).iter().count(), 1);
        assert!(headers.get("x-fe-version").is_some());
    }
}
