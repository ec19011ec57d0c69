//! Per-client rate limiting middleware.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};

use crate::config::RateLimitConfig;
use crate::http::request::UNKNOWN_CLIENT;

/// Minimum time between sweeps of idle buckets.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// A simple token bucket rate limiter.
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_update: Instant::now(),
        }
    }

    fn try_acquire(&mut self, capacity: f64, refill_rate: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        // Refill tokens
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Whether the bucket would be full at `now`, i.e. indistinguishable
    /// from a fresh one.
    fn is_full_at(&self, now: Instant, capacity: f64, refill_rate: f64) -> bool {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.tokens + elapsed * refill_rate >= capacity
    }
}

struct Buckets {
    by_client: HashMap<String, TokenBucket>,
    last_sweep: Instant,
}

/// Shared limiter state, one bucket per client IP.
pub struct RateLimiterState {
    buckets: Mutex<Buckets>,
    rps: f64,
    burst: f64,
}

impl RateLimiterState {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            buckets: Mutex::new(Buckets {
                by_client: HashMap::new(),
                last_sweep: Instant::now(),
            }),
            rps: f64::from(config.requests_per_second),
            burst: f64::from(config.burst_size),
        }
    }

    /// Take one token for `key`. Returns false when the bucket is empty.
    pub fn check(&self, key: &str) -> bool {
        let mut buckets = self.lock();
        let now = Instant::now();
        if now.saturating_duration_since(buckets.last_sweep) >= SWEEP_INTERVAL {
            self.sweep(&mut buckets, now);
        }

        let bucket = buckets
            .by_client
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(self.burst));

        bucket.try_acquire(self.burst, self.rps)
    }

    /// Drop buckets that have refilled by `now`.
    pub fn evict_idle(&self, now: Instant) {
        let mut buckets = self.lock();
        self.sweep(&mut buckets, now);
    }

    /// Number of clients currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.lock().by_client.len()
    }

    fn sweep(&self, buckets: &mut Buckets, now: Instant) {
        buckets
            .by_client
            .retain(|_, bucket| !bucket.is_full_at(now, self.burst, self.rps));
        buckets.last_sweep = now;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Buckets> {
        match self.buckets.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Middleware function for per-IP rate limiting.
pub async fn rate_limit_middleware(
    State(state): State<Arc<RateLimiterState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let key = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string());

    if state.check(&key) {
        next.run(request).await
    } else {
        tracing::warn!(client = %key, "Rate limit exceeded");
        (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({ "error": "Rate limit exceeded" })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_then_reject() {
        let state = RateLimiterState::new(&RateLimitConfig {
            enabled: true,
            requests_per_second: 1,
            burst_size: 3,
        });

        assert!(state.check("10.0.0.1"));
        assert!(state.check("10.0.0.1"));
        assert!(state.check("10.0.0.1"));
        assert!(!state.check("10.0.0.1"));
    }

    #[test]
    fn test_clients_have_separate_buckets() {
        let state = RateLimiterState::new(&RateLimitConfig {
            enabled: true,
            requests_per_second: 1,
            burst_size: 1,
        });

        assert!(state.check("10.0.0.1"));
        assert!(!state.check("10.0.0.1"));
        assert!(state.check("10.0.0.2"));
    }

    #[test]
    fn test_refilled_buckets_are_evicted() {
        let state = RateLimiterState::new(&RateLimitConfig {
            enabled: true,
            requests_per_second: 1,
            burst_size: 2,
        });

        assert!(state.check("10.0.0.1"));
        assert!(state.check("10.0.0.1"));
        assert!(state.check("10.0.0.2"));
        assert_eq!(state.tracked_clients(), 2);

        // Neither has refilled yet.
        state.evict_idle(Instant::now());
        assert_eq!(state.tracked_clients(), 2);

        // .2 spent one token and is full after a second; .1 needs two.
        state.evict_idle(Instant::now() + Duration::from_millis(1500));
        assert_eq!(state.tracked_clients(), 1);

        state.evict_idle(Instant::now() + Duration::from_secs(3));
        assert_eq!(state.tracked_clients(), 0);

        // An evicted client starts again with a full burst.
        assert!(state.check("10.0.0.1"));
        assert!(state.check("10.0.0.1"));
        assert!(!state.check("10.0.0.1"));
    }

    #[test]
    fn test_tokens_refill_over_time() {
        let mut bucket = TokenBucket::new(1.0);
        assert!(bucket.try_acquire(1.0, 1000.0));
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(bucket.try_acquire(1.0, 1000.0));
    }
}
