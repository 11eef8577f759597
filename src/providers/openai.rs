pub mod types;
pub mod validate;

pub use types::{
    ChatRequest, ChatResponse, Choice, ContentPart, HealthResponse, ImageUrl, Message,
    MessageContent, Model, ModelListResponse, ResponseMessage, Role, StreamOptions, Usage,
};
