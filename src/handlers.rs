use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        ConnectInfo, DefaultBodyLimit, Query, State,
    },
    http::{HeaderMap, HeaderValue, Method},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::debug;

use crate::config::Config;
use crate::errors::ApiError;
use crate::job::Job;
use crate::link::InspectLink;
use crate::queue::{QueueEntry, DEFAULT_PRIORITY, LANES};
use crate::rate_limit::rate_limit_middleware;
use crate::state::{ip_from_parts, AppState};

const MAX_BODY_BYTES: usize = 5 * 1024 * 1024;

pub fn router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/", get(inspect_get))
        .route("/inspect", post(inspect_post))
        .route("/bulk", post(bulk_post))
        .route("/stats", get(stats))
        .route("/relog", get(relog))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES));

    if state.rate_limiter.is_some() {
        router = router.layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ));
    }
    if let Some(cors) = cors_layer(&state.config) {
        router = router.layer(cors);
    }

    router.with_state(state)
}

/// Reflect the request origin when it matches a configured literal or
/// regex; absent configuration means no CORS handling at all.
fn cors_layer(config: &Config) -> Option<CorsLayer> {
    if config.allowed_origins.is_empty() && config.allowed_regex_origins.is_empty() {
        return None;
    }

    let literals: Arc<Vec<String>> = Arc::new(config.allowed_origins.clone());
    let patterns: Arc<Vec<Regex>> = Arc::new(
        config
            .allowed_regex_origins
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect(),
    );

    let predicate = move |origin: &HeaderValue, _parts: &axum::http::request::Parts| {
        let Ok(origin) = origin.to_str() else {
            return false;
        };
        literals.iter().any(|allowed| allowed == origin)
            || patterns.iter().any(|pattern| pattern.is_match(origin))
    };

    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::predicate(predicate))
            .allow_methods([Method::GET]),
    )
}

fn check_api_key(config: &Config, provided: Option<&str>) -> Result<(), ApiError> {
    match config.api_key.as_deref() {
        None => Ok(()),
        Some(expected) if provided == Some(expected) => Ok(()),
        Some(_) => Err(ApiError::BadSecret),
    }
}

/// GET endpoints take the key from the `x-api-key` header or `?key=`.
fn check_get_api_key(
    config: &Config,
    headers: &HeaderMap,
    query_key: Option<&str>,
) -> Result<(), ApiError> {
    let header_key = headers.get("x-api-key").and_then(|v| v.to_str().ok());
    check_api_key(config, header_key.or(query_key))
}

fn coerce_priority(raw: Option<&serde_json::Value>) -> u8 {
    raw.and_then(serde_json::Value::as_u64)
        .and_then(|p| u8::try_from(p).ok())
        .filter(|p| (1..=LANES as u8).contains(p))
        .unwrap_or(DEFAULT_PRIORITY)
}

/// A submitted price only counts when the price key matches and the link
/// is a market listing; otherwise it is dropped silently.
fn accepted_price(
    config: &Config,
    link: &InspectLink,
    price_key: Option<&str>,
    price: Option<u64>,
) -> Option<u64> {
    match (config.price_key.as_deref(), price_key, price) {
        (Some(expected), Some(given), Some(price))
            if expected == given && link.is_market_link() =>
        {
            Some(price)
        }
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct InspectBody {
    #[serde(rename = "apiKey")]
    api_key: Option<String>,
    url: Option<String>,
    a: Option<String>,
    d: Option<String>,
    s: Option<String>,
    m: Option<String>,
    priority: Option<serde_json::Value>,
    #[serde(rename = "priceKey")]
    price_key: Option<String>,
    price: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct InspectQuery {
    #[serde(rename = "apiKey")]
    api_key: Option<String>,
    key: Option<String>,
    url: Option<String>,
    a: Option<String>,
    d: Option<String>,
    s: Option<String>,
    m: Option<String>,
    priority: Option<String>,
    #[serde(rename = "priceKey")]
    price_key: Option<String>,
    price: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct BulkBody {
    #[serde(rename = "apiKey")]
    api_key: Option<String>,
    links: Option<Vec<BulkLink>>,
    priority: Option<serde_json::Value>,
    #[serde(rename = "priceKey")]
    price_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BulkLink {
    link: String,
    price: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct KeyQuery {
    key: Option<String>,
}

fn parse_link(
    url: Option<&str>,
    a: Option<&str>,
    d: Option<&str>,
    s: Option<&str>,
    m: Option<&str>,
) -> Result<InspectLink, ApiError> {
    if let Some(url) = url {
        return InspectLink::parse_url(url);
    }
    match (a, d) {
        (Some(a), Some(d)) => InspectLink::from_parts(a, d, s, m),
        _ => Err(ApiError::InvalidInspect),
    }
}

/// POST /inspect - resolve a single link, JSON body form
async fn inspect_post(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Result<Json<InspectBody>, JsonRejection>,
) -> Response {
    let Ok(Json(body)) = body else {
        return ApiError::BadBody.into_response();
    };
    if let Err(err) = check_api_key(&state.config, body.api_key.as_deref()) {
        return err.into_response();
    }

    let link = match parse_link(
        body.url.as_deref(),
        body.a.as_deref(),
        body.d.as_deref(),
        body.s.as_deref(),
        body.m.as_deref(),
    ) {
        Ok(link) => link,
        Err(err) => return err.into_response(),
    };

    let priority = coerce_priority(body.priority.as_ref());
    let price = accepted_price(&state.config, &link, body.price_key.as_deref(), body.price);
    let ip = ip_from_parts(&headers, connect.map(|c| c.0), state.config.trust_proxy);

    run_job(&state, ip, false, vec![(link, price)], priority).await
}

/// GET / - resolve a single link, query-parameter form
async fn inspect_get(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    query: Result<Query<InspectQuery>, QueryRejection>,
) -> Response {
    let Ok(Query(query)) = query else {
        return ApiError::BadParams.into_response();
    };
    let provided = query.api_key.as_deref().or(query.key.as_deref());
    if let Err(err) = check_api_key(&state.config, provided) {
        return err.into_response();
    }

    let link = match parse_link(
        query.url.as_deref(),
        query.a.as_deref(),
        query.d.as_deref(),
        query.s.as_deref(),
        query.m.as_deref(),
    ) {
        Ok(link) => link,
        Err(err) => return err.into_response(),
    };

    let priority = query
        .priority
        .as_deref()
        .and_then(|p| p.parse::<serde_json::Value>().ok());
    let priority = coerce_priority(priority.as_ref());
    let price = accepted_price(&state.config, &link, query.price_key.as_deref(), query.price);
    let ip = ip_from_parts(&headers, connect.map(|c| c.0), state.config.trust_proxy);

    run_job(&state, ip, false, vec![(link, price)], priority).await
}

/// POST /bulk - resolve a batch of links in one request
async fn bulk_post(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Result<Json<BulkBody>, JsonRejection>,
) -> Response {
    let Ok(Json(body)) = body else {
        return ApiError::BadBody.into_response();
    };
    if let Err(err) = check_api_key(&state.config, body.api_key.as_deref()) {
        return err.into_response();
    }
    let Some(raw_links) = body.links.filter(|l| !l.is_empty()) else {
        return ApiError::BadParams.into_response();
    };

    let mut links = Vec::with_capacity(raw_links.len());
    for raw in &raw_links {
        let link = match InspectLink::parse_url(&raw.link) {
            Ok(link) => link,
            Err(err) => return err.into_response(),
        };
        let price = accepted_price(&state.config, &link, body.price_key.as_deref(), raw.price);
        links.push((link, price));
    }

    let priority = coerce_priority(body.priority.as_ref());
    let ip = ip_from_parts(&headers, connect.map(|c| c.0), state.config.trust_proxy);

    run_job(&state, ip, true, links, priority).await
}

/// Drive one job to its flushed response: serve what the cache already
/// knows, admission-check the rest, enqueue the misses and wait.
async fn run_job(
    state: &AppState,
    ip: String,
    bulk: bool,
    links: Vec<(InspectLink, Option<u64>)>,
    priority: u8,
) -> Response {
    let (job, rx) = Job::new(ip.clone(), bulk);
    for (link, price) in links {
        job.add(link, price);
    }

    let pending = job.remaining_links();
    let asset_ids: Vec<String> = pending.iter().map(|(link, _)| link.a.clone()).collect();
    let hits = state.cache.get_many(&asset_ids);

    for ((link, submitted_price), hit) in pending.iter().zip(hits) {
        let Some(cached) = hit else { continue };
        let mut item = cached.item.clone();
        if let (Some(price), None) = (submitted_price, cached.price) {
            state.cache.update_price(&link.a, *price);
            item.price = Some(*price);
        }
        item.apply_rank(state.cache.get_rank(&link.a));
        debug!(job = %job.id(), asset_id = %link.a, "cache hit");
        job.set_response(&link.a, Ok(item));
    }

    let misses = job.remaining_size();
    if misses > 0 {
        if state.controller.ready_count() == 0 {
            job.set_response_remaining(ApiError::SteamOffline);
        } else if let Err(err) = state.queue.admit(&ip, misses) {
            job.set_response_remaining(err);
        } else {
            for (link, price) in job.remaining_links() {
                state.queue.enqueue(QueueEntry {
                    link,
                    ip: ip.clone(),
                    priority,
                    max_attempts: state.config.max_attempts.max(1),
                    attempts: 0,
                    price,
                    job: Arc::clone(&job),
                });
            }
        }
    }

    match rx.await {
        Ok(flush) => (flush.status, Json(flush.body)).into_response(),
        Err(_) => ApiError::GenericBad.into_response(),
    }
}

/// GET /stats
async fn stats(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<KeyQuery>,
) -> Response {
    if let Err(err) = check_get_api_key(&state.config, &headers, query.key.as_deref()) {
        return err.into_response();
    }

    Json(json!({
        "bots_online": state.controller.ready_count(),
        "bots_total": state.controller.bot_count(),
        "queue_size": state.queue.size(),
        "queue_concurrency": state.queue.concurrency(),
        "currently_processing_size": state.queue.processing_count(),
    }))
    .into_response()
}

/// GET /relog
async fn relog(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<KeyQuery>,
) -> Response {
    if let Err(err) = check_get_api_key(&state.config, &headers, query.key.as_deref()) {
        return err.into_response();
    }

    state.controller.try_relog_all();
    Json(json!({ "issued_relog": true })).into_response()
}

/// GET /health - unauthenticated liveness probe
async fn health() -> Response {
    Json(json!({ "status": "ok" })).into_response()
}
