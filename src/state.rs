use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request};
use axum::http::HeaderMap;

use crate::cache::ResultCache;
use crate::config::Config;
use crate::game_data::GameData;
use crate::queue::InspectQueue;
use crate::rate_limit::RateLimiter;
use crate::steam::BotController;

/// Shared application state for handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub controller: Arc<BotController>,
    pub queue: Arc<InspectQueue>,
    pub cache: Arc<ResultCache>,
    pub game_data: Arc<GameData>,
    pub rate_limiter: Option<Arc<RateLimiter>>,
}

/// Caller ip for accounting and rate limiting. With `trust_proxy` the
/// left-most `X-Forwarded-For` hop wins; otherwise the socket peer address
/// is authoritative.
pub fn ip_from_parts(headers: &HeaderMap, addr: Option<SocketAddr>, trust_proxy: bool) -> String {
    if trust_proxy {
        if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
            if let Some(first) = forwarded.split(',').next() {
                let first = first.trim();
                if !first.is_empty() {
                    return first.to_string();
                }
            }
        }
    }
    addr.map_or_else(|| "unknown".to_string(), |a| a.ip().to_string())
}

pub fn client_ip(request: &Request, trust_proxy: bool) -> String {
    let addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    ip_from_parts(request.headers(), addr, trust_proxy)
}
