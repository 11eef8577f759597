use async_trait::async_trait;
use uuid::Uuid;

use crate::auth::AuthenticatedSession;
use crate::error::Result as AppResult;
use crate::providers::openai::{ChatRequest, ContentPart, Message, MessageContent};

use super::types::{
    Features, UpstreamContent, UpstreamImageUrl, UpstreamMessage, UpstreamPart,
    UpstreamRequestBody,
};

/// Uploads an inline `data:` image and returns the upstream file reference.
#[async_trait]
pub trait ImageUploader: Send + Sync {
    async fn upload(
        &self,
        data_url: &str,
        chat_id: &str,
        session: &AuthenticatedSession,
    ) -> AppResult<String>;
}

/// Converts OpenAI-shaped messages to the upstream body.
///
/// Without an uploader (anonymous sessions) image URLs are forwarded as-is.
pub struct RequestTranslator<'a> {
    uploads: Option<(&'a dyn ImageUploader, &'a AuthenticatedSession)>,
}

impl<'a> RequestTranslator<'a> {
    pub fn text_only() -> Self {
        Self { uploads: None }
    }

    pub fn with_uploader(uploader: &'a dyn ImageUploader, session: &'a AuthenticatedSession) -> Self {
        Self {
            uploads: Some((uploader, session)),
        }
    }

    pub async fn translate(
        &self,
        request: &ChatRequest,
        default_model: &str,
        chat_id: &str,
    ) -> UpstreamRequestBody {
        let model = if request.model.is_empty() {
            default_model.to_string()
        } else {
            request.model.clone()
        };

        let mut messages = Vec::with_capacity(request.messages.len());
        for message in &request.messages {
            messages.push(self.translate_message(message, chat_id).await);
        }

        UpstreamRequestBody {
            model,
            messages,
            stream: true,
            chat_id: chat_id.to_string(),
            id: Uuid::new_v4().to_string(),
            signature_prompt: None,
            features: Features::default(),
        }
    }

    async fn translate_message(&self, message: &Message, chat_id: &str) -> UpstreamMessage {
        let parts = match &message.content {
            MessageContent::Text(text) => {
                return UpstreamMessage {
                    role: message.role,
                    content: UpstreamContent::Text(text.clone()),
                };
            }
            MessageContent::Parts(parts) => parts,
        };

        let base = message
            .content
            .texts()
            .first()
            .map(|s| s.to_string())
            .unwrap_or_default();

        let mut images = Vec::new();
        for part in parts {
            let ContentPart::ImageUrl { image_url } = part else {
                continue;
            };
            if image_url.url.is_empty() {
                continue;
            }
            if let Some(url) = self.resolve_image(&image_url.url, chat_id).await {
                images.push(UpstreamPart::ImageUrl {
                    image_url: UpstreamImageUrl { url },
                });
            }
        }

        let content = if images.is_empty() {
            UpstreamContent::Text(base)
        } else {
            let mut out = Vec::with_capacity(images.len() + 1);
            if !base.is_empty() {
                out.push(UpstreamPart::Text { text: base });
            }
            out.extend(images);
            UpstreamContent::Parts(out)
        };
        UpstreamMessage {
            role: message.role,
            content,
        }
    }

    /// `None` drops the image; the rest of the request still goes out.
    async fn resolve_image(&self, url: &str, chat_id: &str) -> Option<String> {
        let Some((uploader, session)) = self.uploads else {
            return Some(url.to_string());
        };
        if !url.starts_with("data:") {
            return Some(url.to_string());
        }
        match uploader.upload(url, chat_id, session).await {
            Ok(reference) => Some(reference),
            Err(e) => {
                tracing::warn!(error = %e, chat_id = %chat_id, "Failed to upload image, dropping it");
                None
            }
        }
    }
}
