use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use uuid::Uuid;

use crate::auth::SessionProvider;
use crate::config::Settings;
use crate::crypto::{RequestSigner, SignatureParams};
use crate::error::{GatewayError, Result as AppResult};
use crate::providers::openai::ChatRequest;

use super::translate::{ImageUploader, RequestTranslator};
use super::{CHAT_PATH, chat_headers};

/// Open upstream response body, consumed as SSE.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, GatewayError>> + Send>>;

#[async_trait]
pub trait ChatUpstream: Send + Sync {
    /// Opens one signed, streaming chat call. `chat_id` scopes image uploads and the referer.
    async fn send(&self, request: &ChatRequest, chat_id: &str) -> AppResult<ByteStream>;
}

pub struct UpstreamGatewayClient {
    http: reqwest::Client,
    settings: Arc<Settings>,
    sessions: Arc<dyn SessionProvider>,
    signer: Arc<dyn RequestSigner>,
    uploader: Arc<dyn ImageUploader>,
}

impl UpstreamGatewayClient {
    pub fn new(
        http: reqwest::Client,
        settings: Arc<Settings>,
        sessions: Arc<dyn SessionProvider>,
        signer: Arc<dyn RequestSigner>,
        uploader: Arc<dyn ImageUploader>,
    ) -> Self {
        Self {
            http,
            settings,
            sessions,
            signer,
            uploader,
        }
    }
}

#[async_trait]
impl ChatUpstream for UpstreamGatewayClient {
    async fn send(&self, request: &ChatRequest, chat_id: &str) -> AppResult<ByteStream> {
        let timestamp = chrono::Utc::now().timestamp_millis().to_string();
        let request_id = Uuid::new_v4().to_string();

        let session = self.sessions.get_session(&self.settings).await?;

        let translator = if self.settings.upstream.anonymous {
            RequestTranslator::text_only()
        } else {
            RequestTranslator::with_uploader(self.uploader.as_ref(), &session)
        };
        let mut body = translator
            .translate(request, &self.settings.model.default, chat_id)
            .await;

        let mut query = vec![
            ("timestamp", timestamp.clone()),
            ("requestId", request_id.clone()),
        ];
        let mut headers = chat_headers(&self.settings, &session.token, chat_id);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if session.has_user() {
            query.push(("user_id", session.user_id.clone()));
            let prompt = request.last_user_message();
            let params = SignatureParams::new(&request_id, &timestamp, &session.user_id);
            match self.signer.sign(&params, &prompt) {
                Ok(sig) => {
                    if let Ok(v) = HeaderValue::from_str(&sig.signature) {
                        headers.insert("x-signature", v);
                    }
                    query.push(("signature_timestamp", sig.timestamp.to_string()));
                    body.signature_prompt = Some(prompt);
                }
                // 签名失败不阻断请求，上游可能仍接受未签名调用
                Err(e) => tracing::warn!(error = %e, "Failed to generate signature, continuing without it"),
            }
        }

        let url = reqwest::Url::parse_with_params(&self.settings.upstream.endpoint(CHAT_PATH), &query)
            .map_err(|e| GatewayError::RequestConstruction(format!("invalid upstream URL: {}", e)))?;

        tracing::debug!(
            chat_id = %chat_id,
            model = %body.model,
            signed = body.signature_prompt.is_some(),
            "Sending chat request upstream"
        );

        // 流式响应不设整体超时
        let resp = self.http.post(url).headers(headers).json(&body).send().await?;

        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            drop(resp);
            return Err(GatewayError::UpstreamApi {
                status: status.as_u16(),
            });
        }

        Ok(Box::pin(
            resp.bytes_stream().map(|chunk| chunk.map_err(GatewayError::from)),
        ))
    }
}
