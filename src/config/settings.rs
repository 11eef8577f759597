use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::{GatewayError, Result as AppResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub model: ModelConfig,
    pub headers: HeadersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub debug: bool,
    pub version: String,
    pub rate_limit_per_minute: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            debug: false,
            version: env!("CARGO_PKG_VERSION").to_string(),
            rate_limit_per_minute: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub protocol: String,
    pub host: String,
    pub token: String,
    pub anonymous: bool,
    /// 覆盖内置的签名密钥（通常来自 ZAI_SECRET_KEY）
    pub signing_secret: Option<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            protocol: "https".to_string(),
            host: "chat.z.ai".to_string(),
            token: String::new(),
            anonymous: true,
            signing_secret: None,
        }
    }
}

impl UpstreamConfig {
    /// `https://chat.z.ai`；兼容 `https:` 这种带冒号的写法
    pub fn origin(&self) -> String {
        format!(
            "{}://{}",
            self.protocol.trim_end_matches(':'),
            self.host.trim_end_matches('/')
        )
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.origin(), path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkMode {
    /// Reasoning goes to `reasoning_content`, markup stripped.
    #[default]
    Reasoning,
    /// Reasoning stays in `content`, wrapped in `<think>` tags.
    Think,
    /// Reasoning markup removed entirely.
    Strip,
    /// Upstream `<details>` blocks kept as `<reasoning>` blocks.
    Details,
}

impl ThinkMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThinkMode::Reasoning => "reasoning",
            ThinkMode::Think => "think",
            ThinkMode::Strip => "strip",
            ThinkMode::Details => "details",
        }
    }
}

impl fmt::Display for ThinkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThinkMode {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reasoning" => Ok(ThinkMode::Reasoning),
            "think" => Ok(ThinkMode::Think),
            "strip" => Ok(ThinkMode::Strip),
            "details" => Ok(ThinkMode::Details),
            other => Err(GatewayError::Config(format!(
                "invalid think mode: {} (must be one of: reasoning, think, strip, details)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub default: String,
    pub think_mode: ThinkMode,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            default: "GLM-4-6-API-V1".to_string(),
            think_mode: ThinkMode::Reasoning,
        }
    }
}

// 上游要求“看起来像浏览器”的固定请求头
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadersConfig {
    pub accept: String,
    pub accept_language: String,
    pub user_agent: String,
    pub sec_ch_ua: String,
    pub sec_ch_ua_mobile: String,
    pub sec_ch_ua_platform: String,
    pub x_fe_version: String,
}

impl Default for HeadersConfig {
    fn default() -> Self {
        Self {
            accept: "*/*".to_string(),
            accept_language: "en-US".to_string(),
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/141.0.0.0 Safari/537.36".to_string(),
            sec_ch_ua: r#""Chromium";v="141", "Not?A_Brand";v="8""#.to_string(),
            sec_ch_ua_mobile: "?0".to_string(),
            sec_ch_ua_platform: "Linux".to_string(),
            x_fe_version: "prod-fe-1.0.117".to_string(),
        }
    }
}

impl Settings {
    pub fn load() -> AppResult<Self> {
        let mut settings = match Self::find_config_file() {
            Some(path) => Self::from_file(&path)?,
            None => {
                tracing::info!("No config file found, using built-in defaults");
                Settings::default()
            }
        };
        settings.apply_env_overrides(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| GatewayError::Config(format!("failed to parse {}: {}", path, e)))
    }

    fn find_config_file() -> Option<String> {
        if let Ok(path) = std::env::var("CONFIG_PATH")
            && !path.trim().is_empty()
        {
            return Some(path);
        }

        ["custom-config.toml", "config.toml"]
            .iter()
            .find(|name| Path::new(name).exists())
            .map(|name| name.to_string())
    }

    /// Applies environment overrides through `lookup` so tests need not touch the process env.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> AppResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(port) = get("PORT") {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|_| GatewayError::Config(format!("invalid PORT: {}", port)))?;
        }
        if let Some(host) = get("HOST") {
            self.server.host = host;
        }
        if let Some(debug) = get("DEBUG") {
            self.server.debug = matches!(debug.trim(), "1" | "true" | "TRUE" | "True");
        }
        if let Some(limit) = get("RATE_LIMIT") {
            self.server.rate_limit_per_minute = limit
                .trim()
                .parse()
                .map_err(|_| GatewayError::Config(format!("invalid RATE_LIMIT: {}", limit)))?;
        }

        if let Some(token) = get("ZAI_TOKEN") {
            self.upstream.token = token.trim().to_string();
            self.upstream.anonymous = false;
        }
        if let Some(secret) = get("ZAI_SECRET_KEY") {
            self.upstream.signing_secret = Some(secret);
        }

        if let Some(model) = get("MODEL") {
            self.model.default = model;
        }
        if let Some(mode) = get("THINK_MODE") {
            self.model.think_mode = mode.parse()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.server.port == 0 {
            return Err(GatewayError::Config(
                "invalid server port: 0 (must be 1-65535)".into(),
            ));
        }
        if self.server.rate_limit_per_minute == 0 {
            return Err(GatewayError::Config(
                "rate_limit_per_minute must be greater than 0".into(),
            ));
        }
        if self.upstream.host.trim().is_empty() {
            return Err(GatewayError::Config("upstream.host is required".into()));
        }
        if !self.upstream.anonymous && self.upstream.token.trim().is_empty() {
            return Err(GatewayError::Config(
                "upstream.token is required when anonymous = false".into(),
            ));
        }
        Ok(())
    }

    /// Fixed browser-like header set sent on every upstream call.
    pub fn upstream_headers(&self) -> Vec<(&'static str, String)> {
        let h = &self.headers;
        let origin = self.upstream.origin();
        vec![
            ("Accept", h.accept.clone()),
            ("Accept-Language", h.accept_language.clone()),
            ("Cache-Control", "no-cache".to_string()),
            ("Connection", "keep-alive".to_string()),
            ("Pragma", "no-cache".to_string()),
            ("Sec-Ch-Ua", h.sec_ch_ua.clone()),
            ("Sec-Ch-Ua-Mobile", h.sec_ch_ua_mobile.clone()),
            ("Sec-Ch-Ua-Platform", h.sec_ch_ua_platform.clone()),
            ("Sec-Fetch-Dest", "empty".to_string()),
            ("Sec-Fetch-Mode", "cors".to_string()),
            ("Sec-Fetch-Site", "same-origin".to_string()),
            ("User-Agent", h.user_agent.clone()),
            ("X-FE-Version", h.x_fe_version.clone()),
            ("Origin", origin.clone()),
            ("Referer", format!("{}/", origin)),
        ]
    }
}
