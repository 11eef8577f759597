use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::GatewayError;
use crate::server::util::client_ip;

pub const REFILL_INTERVAL: Duration = Duration::from_secs(60);
/// 清理周期，同时也是空闲判定阈值
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug)]
struct Visitor {
    tokens: u32,
    max_tokens: u32,
    refill_at: Instant,
    last_seen: Instant,
}

/// Per-IP token bucket with a discrete, once-a-minute refill.
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    visitors: Mutex<HashMap<String, Visitor>>,
}

impl RateLimiter {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            visitors: Mutex::new(HashMap::new()),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn allow(&self, ip: &str) -> bool {
        self.allow_at(ip, Instant::now())
    }

    fn allow_at(&self, ip: &str, now: Instant) -> bool {
        let mut visitors = self.visitors.lock().unwrap_or_else(|e| e.into_inner());
        let visitor = visitors.entry(ip.to_string()).or_insert_with(|| Visitor {
            tokens: self.limit,
            max_tokens: self.limit,
            refill_at: now + REFILL_INTERVAL,
            last_seen: now,
        });
        visitor.last_seen = now;

        if now > visitor.refill_at {
            visitor.tokens = visitor.max_tokens;
            visitor.refill_at = now + REFILL_INTERVAL;
        }
        // 拒绝时不扣减
        if visitor.tokens > 0 {
            visitor.tokens -= 1;
            true
        } else {
            false
        }
    }

    /// Drops visitors idle for longer than [`SWEEP_INTERVAL`]; returns how many.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut visitors = self.visitors.lock().unwrap_or_else(|e| e.into_inner());
        let before = visitors.len();
        visitors.retain(|_, v| now.duration_since(v.last_seen) <= SWEEP_INTERVAL);
        before - visitors.len()
    }

    pub fn visitor_count(&self) -> usize {
        self.visitors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(Instant::now() + SWEEP_INTERVAL, SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                let removed = limiter.sweep();
                if removed > 0 {
                    tracing::debug!(removed, "Swept idle rate limit buckets");
                }
            }
        })
    }
}

pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request,
    next: Next,
) -> Response {
    let ip = client_ip(&req);
    if !limiter.allow(&ip) {
        tracing::warn!(ip = %ip, path = %req.uri().path(), "Rate limit exceeded");
        return GatewayError::RateLimited {
            limit: limiter.limit(),
        }
        .into_response();
    }
    next.run(req).await
}
