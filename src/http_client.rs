use std::time::Duration;

use reqwest::ClientBuilder;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

/// 身份接口超时
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(10);
/// 图片上传超时（与聊天流分离）
pub const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

fn has_proxy_env() -> bool {
    [
        "HTTPS_PROXY",
        "https_proxy",
        "HTTP_PROXY",
        "http_proxy",
        "ALL_PROXY",
        "all_proxy",
    ]
    .iter()
    .any(|k| std::env::var(k).is_ok_and(|v| !v.trim().is_empty()))
}

fn should_bypass_proxy_impl(proxy_env_present: bool, opt_out: Option<&str>) -> bool {
    if !proxy_env_present {
        return false;
    }
    opt_out.is_some_and(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "yes" | "YES"))
}

/// Escape hatch: `UPSTREAM_NO_PROXY=1` talks to the upstream directly even when proxy env vars are set.
pub fn maybe_disable_proxy(builder: ClientBuilder) -> ClientBuilder {
    let opt_out = std::env::var("UPSTREAM_NO_PROXY").ok();
    if should_bypass_proxy_impl(has_proxy_env(), opt_out.as_deref()) {
        builder.no_proxy()
    } else {
        builder
    }
}

/// Shared upstream client. No overall timeout: the chat body is an unbounded
/// stream, so bounded calls (auth, upload) set a per-request timeout instead.
pub fn build_upstream_client() -> Result<reqwest::Client, reqwest::Error> {
    let builder = reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT);
    maybe_disable_proxy(builder).build()
}

/// Converts configured header pairs, dropping (and logging) any that are not valid HTTP.
pub fn header_map(pairs: &[(&str, String)]) -> HeaderMap {
    let mut map = HeaderMap::with_capacity(pairs.len());
    for (name, value) in pairs {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(n), Ok(v)) => {
                map.insert(n, v);
            }
            _ => tracing::warn!(header = %name, "Skipping invalid upstream header"),
        }
    }
    map
}
