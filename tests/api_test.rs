mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use common::{credential, fast_settings, item_info, make_ready, wait_until, MockAction, MockConnector};
use cs_inspect_backend::cache::ResultCache;
use cs_inspect_backend::config::Config;
use cs_inspect_backend::dispatch::InspectDispatcher;
use cs_inspect_backend::game_data::{GameData, DEFAULT_SCHEMA_URL};
use cs_inspect_backend::handlers::router;
use cs_inspect_backend::link::InspectLink;
use cs_inspect_backend::models::DecoratedItem;
use cs_inspect_backend::queue::InspectQueue;
use cs_inspect_backend::rate_limit::RateLimiter;
use cs_inspect_backend::state::AppState;
use cs_inspect_backend::steam::gc::{SessionConnector, SessionEvent};
use cs_inspect_backend::steam::BotController;
use serde_json::{json, Value};
use tower::ServiceExt;

const INSPECT_URL: &str =
    "steam://rungame/730/76561202255233023/+csgo_econ_action_preview S76561198084749846A6768147729D12557175561287951743";

fn build_state(config: Config, connector: Arc<dyn SessionConnector>, bots: usize) -> AppState {
    let config = Arc::new(config);
    let game_data = Arc::new(GameData::new(DEFAULT_SCHEMA_URL));
    let controller = Arc::new(BotController::new(connector, Arc::clone(&game_data)));
    for index in 0..bots {
        controller.add_bot(credential(&format!("bot{index}")), fast_settings());
    }
    let cache = Arc::new(ResultCache::new(100, Duration::from_secs(3600)));
    let dispatcher = Arc::new(InspectDispatcher::new(
        Arc::clone(&controller),
        Arc::clone(&cache),
    ));
    let queue = InspectQueue::new(
        dispatcher,
        config.max_simultaneous_requests,
        config.max_queue_size,
    );
    let rate_limiter = config.rate_limit.enable.then(|| {
        Arc::new(RateLimiter::new(
            Duration::from_millis(config.rate_limit.window_ms),
            config.rate_limit.max,
        ))
    });

    AppState {
        config,
        controller,
        queue,
        cache,
        game_data,
        rate_limiter,
    }
}

fn offline_state(config: Config) -> AppState {
    build_state(config, MockConnector::offline(), 0)
}

async fn send_json(app: &axum::Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn send_get(app: &axum::Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn health_is_open() {
    let app = router(offline_state(Config::default()));
    let (status, body) = send_get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn invalid_api_key_is_rejected_with_code_8() {
    let config = Config {
        api_key: Some("secret".into()),
        ..Config::default()
    };
    let app = router(offline_state(config));

    let (status, body) = send_json(
        &app,
        "/inspect",
        json!({ "apiKey": "wrong", "url": INSPECT_URL }),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], 8);

    // stats and relog take the key from header or query on GETs
    let (status, _) = send_get(&app, "/stats").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, body) = send_get(&app, "/stats?key=secret").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["bots_total"].is_u64());
}

#[tokio::test]
async fn malformed_json_body_is_bad_body() {
    let app = router(offline_state(Config::default()));
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/inspect")
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["code"], 7);
}

#[tokio::test]
async fn invalid_link_is_code_2() {
    let app = router(offline_state(Config::default()));
    let (status, body) = send_json(&app, "/inspect", json!({ "url": "https://nope" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 2);
}

#[tokio::test]
async fn fleet_down_returns_steam_offline_and_leaves_no_accounting() {
    let state = offline_state(Config::default());
    let queue = Arc::clone(&state.queue);
    let app = router(state);

    let (status, body) = send_json(&app, "/inspect", json!({ "a": "7", "d": "1", "s": "2" })).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], 5);
    assert_eq!(queue.user_queued("unknown"), 0);
    assert_eq!(queue.size(), 0);
}

#[tokio::test]
async fn cached_asset_needs_no_bot() {
    let state = offline_state(Config::default());
    let link = InspectLink::parse_url(INSPECT_URL).unwrap();
    let cached = DecoratedItem {
        a: link.a.clone(),
        d: link.d.clone(),
        s: link.s.clone(),
        m: link.m.clone(),
        floatvalue: 0.0777,
        paintseed: 3,
        ..Default::default()
    };
    state.cache.insert(cached, None);
    let app = router(state);

    let (status, body) = send_json(&app, "/inspect", json!({ "url": INSPECT_URL })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["a"], link.a);
    assert_eq!(body["floatvalue"], 0.0777);
}

#[tokio::test]
async fn rate_limit_kicks_in_after_max_requests() {
    let config = Config {
        rate_limit: cs_inspect_backend::config::RateLimitSettings {
            enable: true,
            window_ms: 60_000,
            max: 1,
        },
        ..Config::default()
    };
    let app = router(offline_state(config));

    let (status, _) = send_get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = send_get(&app, "/health").await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["code"], 10);
}

#[tokio::test]
async fn cors_reflects_configured_origins() {
    let config = Config {
        allowed_origins: vec!["https://app.example.com".into()],
        allowed_regex_origins: vec!["^https://.*\\.example\\.org$".into()],
        ..Config::default()
    };
    let app = router(offline_state(config));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("origin", "https://app.example.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("https://app.example.com")
    );

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("origin", "https://sub.example.org")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("https://sub.example.org")
    );

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("origin", "https://evil.example.net")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(response
        .headers()
        .get("access-control-allow-origin")
        .is_none());
}

#[tokio::test]
async fn relog_endpoint_reports_issuance() {
    let config = Config {
        api_key: Some("secret".into()),
        ..Config::default()
    };
    let app = router(offline_state(config));

    let (status, body) = send_get(&app, "/relog?key=secret").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["issued_relog"], true);
}

#[tokio::test]
async fn end_to_end_inspect_resolves_and_caches() {
    let (connector, mut handles) = MockConnector::new();
    let state = build_state(Config::default(), connector, 1);
    let handle = handles.remove(0);

    make_ready(&handle).await;
    wait_until(|| state.controller.ready_count() == 1).await;
    state.queue.start(Arc::clone(&state.controller));

    // answer the one inspect the fleet will dispatch
    let events = handle.events.clone();
    let mut actions = handle.actions;
    tokio::spawn(async move {
        loop {
            match actions.recv().await {
                Some(MockAction::Inspect { a, .. }) => {
                    let _ = events.send(SessionEvent::InspectItemInfo(item_info(a))).await;
                }
                Some(_) => continue,
                None => break,
            }
        }
    });

    let cache = Arc::clone(&state.cache);
    let app = router(state);

    let (status, body) = send_json(&app, "/inspect", json!({ "url": INSPECT_URL })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["a"], "6768147729");
    assert_eq!(body["s"], "76561198084749846");
    assert_eq!(body["paintseed"], 121);
    assert!(body["floatvalue"].as_f64().unwrap() > 0.0);
    assert!(body.get("paintwear").is_none());

    // the result is now served from the cache
    let hits = cache.get_many(&["6768147729".to_string()]);
    assert!(hits[0].is_some());

    let (status, body) = send_json(&app, "/inspect", json!({ "url": INSPECT_URL })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["a"], "6768147729");
}

#[tokio::test]
async fn bulk_returns_an_array_in_submission_order() {
    let state = offline_state(Config::default());
    // one of the two links is cached; the fleet is down for the other
    let cached_link = InspectLink::parse_url(INSPECT_URL).unwrap();
    state.cache.insert(
        DecoratedItem {
            a: cached_link.a.clone(),
            floatvalue: 0.11,
            ..Default::default()
        },
        None,
    );
    let app = router(state);

    let other =
        "steam://rungame/730/76561202255233023/+csgo_econ_action_preview%20M625254122282020305A6760346663D30614827701953021";
    let (status, body) = send_json(
        &app,
        "/bulk",
        json!({ "links": [{ "link": INSPECT_URL }, { "link": other }] }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let entries = body.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["a"], cached_link.a);
    assert_eq!(entries[1]["code"], 5, "uncached entry fails SteamOffline");
}
