//! Rate limiting middleware.
//!
//! Sliding-window limiting keyed by the hash of the caller's API key when
//! one is presented, otherwise by client IP. Exhaustion answers 429 with a
//! `Retry-After` header.

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Configuration for rate limiting.
#[derive(Clone)]
pub struct RateLimitConfig {
    /// Maximum requests per window.
    pub max_requests: u32,
    /// Window duration.
    pub window: Duration,
    /// Burst allowance (extra requests above the limit before hard reject).
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window: Duration::from_secs(60),
            burst: 40,
        }
    }
}

/// How a request is bucketed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ClientKey {
    ApiKeyHash(u64),
    Ip(std::net::IpAddr),
}

/// Rate limiter state tracking requests per client.
#[derive(Clone)]
pub struct RateLimitLayer {
    config: RateLimitConfig,
    state: Arc<Mutex<HashMap<ClientKey, RateLimitEntry>>>,
}

struct RateLimitEntry {
    count: u32,
    window_start: Instant,
}

enum RateLimitResult {
    Allowed,
    BurstUsed,
    Exceeded { retry_after: Duration },
}

impl RateLimitLayer {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn check(&self, key: ClientKey) -> RateLimitResult {
        let mut state = self.state.lock();
        let now = Instant::now();

        let entry = state.entry(key).or_insert(RateLimitEntry {
            count: 0,
            window_start: now,
        });

        // Reset window if expired
        if now.duration_since(entry.window_start) >= self.config.window {
            entry.count = 0;
            entry.window_start = now;
        }

        entry.count += 1;

        let limit = self.config.max_requests + self.config.burst;
        let reset_at = entry.window_start + self.config.window;

        if entry.count > limit {
            RateLimitResult::Exceeded {
                retry_after: reset_at.duration_since(now),
            }
        } else if entry.count > self.config.max_requests {
            RateLimitResult::BurstUsed
        } else {
            RateLimitResult::Allowed
        }
    }

    /// Periodic cleanup of old entries (call from a background task).
    pub fn cleanup(&self) {
        let mut state = self.state.lock();
        let now = Instant::now();
        let window = self.config.window;

        state.retain(|_, entry| now.duration_since(entry.window_start) < window * 2);
    }
}

fn hash_api_key(key: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

/// Rate limiting middleware function.
pub async fn rate_limit_middleware(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    axum::extract::State(limiter): axum::extract::State<RateLimitLayer>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let key = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|k| ClientKey::ApiKeyHash(hash_api_key(k)))
        .unwrap_or_else(|| ClientKey::Ip(addr.ip()));

    match limiter.check(key) {
        RateLimitResult::Allowed | RateLimitResult::BurstUsed => next.run(request).await,
        RateLimitResult::Exceeded { retry_after } => {
            warn!(
                ip = %addr.ip(),
                retry_after_secs = retry_after.as_secs(),
                "Rate limit exceeded"
            );

            let body = serde_json::json!({
                "error": "rate_limit_exceeded",
                "message": "Too many requests. Please slow down.",
            });

            (
                StatusCode::TOO_MANY_REQUESTS,
                [("Retry-After", retry_after.as_secs().max(1).to_string())],
                axum::Json(body),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip_key() -> ClientKey {
        ClientKey::Ip("127.0.0.1".parse().unwrap())
    }

    #[test]
    fn test_rate_limit_allows_under_limit() {
        let limiter = RateLimitLayer::new(RateLimitConfig {
            max_requests: 10,
            window: Duration::from_secs(60),
            burst: 5,
        });

        for _ in 0..10 {
            match limiter.check(ip_key()) {
                RateLimitResult::Allowed => {}
                _ => panic!("Should be allowed"),
            }
        }
    }

    #[test]
    fn test_rate_limit_burst_then_reject() {
        let limiter = RateLimitLayer::new(RateLimitConfig {
            max_requests: 5,
            window: Duration::from_secs(60),
            burst: 3,
        });

        for _ in 0..5 {
            match limiter.check(ip_key()) {
                RateLimitResult::Allowed => {}
                _ => panic!("Should be allowed"),
            }
        }
        for _ in 0..3 {
            match limiter.check(ip_key()) {
                RateLimitResult::BurstUsed => {}
                _ => panic!("Should be burst"),
            }
        }
        match limiter.check(ip_key()) {
            RateLimitResult::Exceeded { .. } => {}
            _ => panic!("Should be exceeded"),
        }
    }

    #[test]
    fn test_api_key_and_ip_buckets_are_independent() {
        let limiter = RateLimitLayer::new(RateLimitConfig {
            max_requests: 1,
            window: Duration::from_secs(60),
            burst: 0,
        });

        match limiter.check(ip_key()) {
            RateLimitResult::Allowed => {}
            _ => panic!("first ip hit allowed"),
        }
        match limiter.check(ClientKey::ApiKeyHash(hash_api_key("secret"))) {
            RateLimitResult::Allowed => {}
            _ => panic!("api key bucket starts fresh"),
        }
        match limiter.check(ip_key()) {
            RateLimitResult::Exceeded { .. } => {}
            _ => panic!("second ip hit rejected"),
        }
    }
}
