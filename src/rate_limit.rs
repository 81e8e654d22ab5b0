use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use axum::{extract::Request, middleware::Next, response::Response};
use tracing::debug;

use crate::errors::ApiError;
use crate::state::AppState;

/// Fixed-window request limiter keyed by caller ip, kept entirely in
/// memory. One window of `window` starts at a caller's first request and
/// admits at most `max` requests until it rolls over.
pub struct RateLimiter {
    window: Duration,
    max: u32,
    hits: Mutex<HashMap<String, (u32, Instant)>>,
}

impl RateLimiter {
    pub fn new(window: Duration, max: u32) -> Self {
        Self {
            window,
            max,
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// Count one request against `ip`; `true` means admitted.
    pub fn check(&self, ip: &str) -> bool {
        let now = Instant::now();
        let mut hits = self.hits.lock().expect("rate limit lock poisoned");

        // opportunistic cleanup so the map tracks only live windows
        if hits.len() > 1024 {
            let window = self.window;
            hits.retain(|_, (_, started)| now.duration_since(*started) < window);
        }

        match hits.get_mut(ip) {
            Some((count, started)) if now.duration_since(*started) < self.window => {
                if *count >= self.max {
                    return false;
                }
                *count += 1;
                true
            }
            _ => {
                hits.insert(ip.to_string(), (1, now));
                true
            }
        }
    }
}

/// Axum middleware enforcing the configured limiter, when enabled.
pub async fn rate_limit_middleware(
    axum::extract::State(state): axum::extract::State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(limiter) = state.rate_limiter.as_deref() {
        let ip = crate::state::client_ip(&request, state.config.trust_proxy);
        if !limiter.check(&ip) {
            debug!(ip = %ip, "rate limit exceeded");
            return Err(ApiError::RateLimit);
        }
    }
    Ok(next.run(request).await)
}
