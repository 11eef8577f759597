use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64_STANDARD;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::AuthenticatedSession;
use crate::config::Settings;
use crate::error::{GatewayError, Result as AppResult};
use crate::http_client::UPLOAD_TIMEOUT;

use super::translate::ImageUploader;
use super::{UPLOAD_PATH, chat_headers};

#[derive(Debug, Deserialize)]
struct UploadResponse {
    id: String,
    filename: String,
}

/// Multipart upload to the upstream file endpoint.
pub struct ZaiImageUploader {
    http: reqwest::Client,
    settings: Arc<Settings>,
}

impl ZaiImageUploader {
    pub fn new(http: reqwest::Client, settings: Arc<Settings>) -> Self {
        Self { http, settings }
    }
}

/// Payload bytes of a `data:<mime>;base64,<payload>` URL.
pub fn decode_data_url(data_url: &str) -> AppResult<Vec<u8>> {
    let (_, encoded) = data_url
        .split_once(',')
        .ok_or_else(|| GatewayError::ImageUpload("invalid data URL format".into()))?;
    B64_STANDARD
        .decode(encoded.trim())
        .map_err(|e| GatewayError::ImageUpload(format!("failed to decode base64: {}", e)))
}

#[async_trait]
impl ImageUploader for ZaiImageUploader {
    async fn upload(
        &self,
        data_url: &str,
        chat_id: &str,
        session: &AuthenticatedSession,
    ) -> AppResult<String> {
        let image = decode_data_url(data_url)?;
        let form = Form::new().part("file", Part::bytes(image).file_name(Uuid::new_v4().to_string()));

        let resp = self
            .http
            .post(self.settings.upstream.endpoint(UPLOAD_PATH))
            .headers(chat_headers(&self.settings, &session.token, chat_id))
            .multipart(form)
            .timeout(UPLOAD_TIMEOUT)
            .send()
            .await
            .map_err(|e| GatewayError::ImageUpload(format!("failed to send upload request: {}", e)))?;

        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::ImageUpload(format!(
                "upload failed with status {}: {}",
                status.as_u16(),
                body
            )));
        }

        let uploaded: UploadResponse = resp.json().await.map_err(|e| {
            GatewayError::ImageUpload(format!("failed to parse upload response: {}", e))
        })?;
        tracing::debug!(file_id = %uploaded.id, chat_id = %chat_id, "Image uploaded");
        Ok(format!("{}_{}", uploaded.id, uploaded.filename))
    }
}
