pub mod settings;

pub use settings::{HeadersConfig, ModelConfig, ServerConfig, Settings, ThinkMode, UpstreamConfig};
