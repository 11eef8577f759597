use serde::{Deserialize, Deserializer, Serialize};

use crate::providers::openai::Role;

// 上游 SSE 帧

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Thinking,
    Answer,
    ToolCall,
    /// `other`, empty, or any phase this gateway does not know about.
    #[default]
    #[serde(other)]
    Other,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct UpstreamEvent {
    #[serde(default, deserialize_with = "null_as_default")]
    pub phase: Phase,
    #[serde(default, deserialize_with = "null_as_default")]
    pub delta_content: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub edit_content: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub done: bool,
}

impl UpstreamEvent {
    pub fn new(phase: Phase, delta_content: impl Into<String>) -> Self {
        Self {
            phase,
            delta_content: delta_content.into(),
            ..Default::default()
        }
    }

    /// `delta_content`, or `edit_content` when the delta is empty.
    pub fn content(&self) -> &str {
        if self.delta_content.is_empty() {
            &self.edit_content
        } else {
            &self.delta_content
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamFrame {
    #[serde(default)]
    pub data: Option<UpstreamEvent>,
}

// 上游请求体

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpstreamImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpstreamPart {
    Text { text: String },
    ImageUrl { image_url: UpstreamImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum UpstreamContent {
    Text(String),
    Parts(Vec<UpstreamPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpstreamMessage {
    pub role: Role,
    pub content: UpstreamContent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Features {
    pub enable_thinking: bool,
}

impl Default for Features {
    fn default() -> Self {
        // 推理由模型侧决定，请求层面固定关闭
        Self {
            enable_thinking: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpstreamRequestBody {
    pub model: String,
    pub messages: Vec<UpstreamMessage>,
    pub stream: bool,
    pub chat_id: String,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature_prompt: Option<String>,
    pub features: Features,
}
