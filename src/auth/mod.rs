use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderValue};
use tokio::sync::RwLock;

use crate::config::Settings;
use crate::error::{GatewayError, Result as AppResult};
use crate::http_client::{AUTH_TIMEOUT, header_map};
use crate::providers::zai::AUTH_PATH;
use crate::server::util::mask_key;

pub const SESSION_TTL: Duration = Duration::from_secs(30 * 60);

/// Upstream identity used to authorise and sign chat calls.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuthenticatedSession {
    pub user_id: String,
    pub token: String,
}

impl AuthenticatedSession {
    pub fn has_user(&self) -> bool {
        !self.user_id.is_empty()
    }
}

#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn get_session(&self, settings: &Settings) -> AppResult<AuthenticatedSession>;
}

fn string_field(body: &serde_json::Value, key: &str) -> String {
    body.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

struct CachedSession {
    session: AuthenticatedSession,
    cached_at: Instant,
}

/// Session cache keyed by token value.
///
/// The key ignores which upstream produced the entry; a changed host with
/// the same token still hits.
pub struct AuthCache {
    http: reqwest::Client,
    ttl: Duration,
    entries: RwLock<HashMap<String, CachedSession>>,
}

impl AuthCache {
    pub fn new(http: reqwest::Client) -> Self {
        Self::with_ttl(http, SESSION_TTL)
    }

    pub fn with_ttl(http: reqwest::Client, ttl: Duration) -> Self {
        Self {
            http,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
        tracing::info!("User session cache cleared");
    }

    pub async fn cached_count(&self) -> usize {
        self.entries.read().await.len()
    }

    async fn cached(&self, token: &str) -> Option<AuthenticatedSession> {
        let entries = self.entries.read().await;
        let entry = entries.get(token)?;
        (entry.cached_at.elapsed() < self.ttl).then(|| entry.session.clone())
    }

    async fn fetch(&self, settings: &Settings) -> AppResult<AuthenticatedSession> {
        let upstream = &settings.upstream;
        let configured = upstream.token.trim();

        let mut headers = header_map(&settings.upstream_headers());
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if !upstream.anonymous
            && !configured.is_empty()
            && let Ok(v) = HeaderValue::from_str(&format!("Bearer {}", configured))
        {
            headers.insert(AUTHORIZATION, v);
        }

        let resp = self
            .http
            .get(upstream.endpoint(AUTH_PATH))
            .headers(headers)
            .timeout(AUTH_TIMEOUT)
            .send()
            .await?;

        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            return Err(GatewayError::UpstreamAuth {
                status: Some(status.as_u16()),
                message: format!("auth API returned status {}", status.as_u16()),
            });
        }

        let body: serde_json::Value = resp.json().await.map_err(|e| GatewayError::UpstreamAuth {
            status: None,
            message: format!("failed to decode auth response: {}", e),
        })?;

        let user_id = string_field(&body, "id");
        // 非匿名模式始终使用配置的 token，上游返回的 token 只在匿名模式下采用
        let token = if upstream.anonymous {
            string_field(&body, "token")
        } else {
            configured.to_string()
        };
        let session = AuthenticatedSession { user_id, token };

        // 匿名模式每次都拿新的访客 token，不入缓存
        if !upstream.anonymous && !session.token.is_empty() && session.has_user() {
            let mut entries = self.entries.write().await;
            entries.retain(|_, e| e.cached_at.elapsed() < self.ttl);
            entries.insert(
                session.token.clone(),
                CachedSession {
                    session: session.clone(),
                    cached_at: Instant::now(),
                },
            );
        }
        if session.has_user() {
            tracing::info!(
                user_id = %session.user_id,
                name = %string_field(&body, "name"),
                token = %mask_key(&session.token),
                "User authenticated"
            );
        }
        Ok(session)
    }
}

#[async_trait]
impl SessionProvider for AuthCache {
    async fn get_session(&self, settings: &Settings) -> AppResult<AuthenticatedSession> {
        let token = settings.upstream.token.trim();
        if !token.is_empty()
            && let Some(session) = self.cached(token).await
        {
            tracing::debug!(user_id = %session.user_id, "Using cached user info");
            return Ok(session);
        }
        self.fetch(settings).await
    }
}
