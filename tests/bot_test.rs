mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    credential, fast_settings, item_info, make_ready, wait_until, MockAction, MockConnector,
};
use cs_inspect_backend::game_data::{GameData, DEFAULT_SCHEMA_URL};
use cs_inspect_backend::link::InspectLink;
use cs_inspect_backend::steam::bot::{Bot, BotError};
use cs_inspect_backend::steam::gc::SessionEvent;

fn game_data() -> Arc<GameData> {
    Arc::new(GameData::new(DEFAULT_SCHEMA_URL))
}

fn owned_link(asset_id: &str) -> InspectLink {
    InspectLink::from_parts(asset_id, "998877", Some("76561198084749846"), None).unwrap()
}

async fn next_inspect(handle: &mut common::SessionHandle) -> (u64, u64, u64, u64) {
    loop {
        match handle.actions.recv().await.expect("actor alive") {
            MockAction::Inspect { s, a, d, m } => return (s, a, d, m),
            _ => continue,
        }
    }
}

#[tokio::test]
async fn resolves_inspect_and_stamps_request_fields() {
    let (connector, mut handles) = MockConnector::new();
    let mut handle = handles.remove(0);
    let bot = Bot::spawn(credential("bot1"), fast_settings(), connector, game_data());

    make_ready(&handle).await;
    wait_until(|| bot.is_ready()).await;

    let worker = {
        let bot = bot.clone();
        tokio::spawn(async move { bot.inspect(owned_link("4242")).await })
    };

    let (s, a, d, m) = next_inspect(&mut handle).await;
    assert_eq!(s, 76_561_198_084_749_846);
    assert_eq!(a, 4242);
    assert_eq!(d, 998_877);
    assert_eq!(m, 0);

    let mut info = item_info(4242);
    info.paintseed = None; // coordinator omitted the seed
    handle
        .events
        .send(SessionEvent::InspectItemInfo(info))
        .await
        .unwrap();

    let outcome = worker.await.unwrap().unwrap();
    assert_eq!(outcome.item.a, "4242");
    assert_eq!(outcome.item.d, "998877");
    assert_eq!(outcome.item.s, "76561198084749846");
    assert_eq!(outcome.item.m, "0");
    assert_eq!(outcome.item.paintseed, 0);
    assert!(outcome.item.floatvalue > 0.0);
    assert!(outcome.item.wear_name.is_some(), "annotation ran");
    assert!(outcome.delay <= Duration::from_millis(20));
}

#[tokio::test]
async fn mismatched_item_info_is_dropped_silently() {
    let (connector, mut handles) = MockConnector::new();
    let mut handle = handles.remove(0);
    let bot = Bot::spawn(credential("bot1"), fast_settings(), connector, game_data());

    make_ready(&handle).await;
    wait_until(|| bot.is_ready()).await;

    let worker = {
        let bot = bot.clone();
        tokio::spawn(async move { bot.inspect(owned_link("10")).await })
    };
    next_inspect(&mut handle).await;

    // wrong asset id first, then the real answer
    handle
        .events
        .send(SessionEvent::InspectItemInfo(item_info(99)))
        .await
        .unwrap();
    handle
        .events
        .send(SessionEvent::InspectItemInfo(item_info(10)))
        .await
        .unwrap();

    let outcome = worker.await.unwrap().unwrap();
    assert_eq!(outcome.item.a, "10");
    assert_eq!(outcome.item.paintseed, 121);
}

#[tokio::test]
async fn in_flight_request_times_out_but_bot_stays_ready() {
    let (connector, mut handles) = MockConnector::new();
    let mut handle = handles.remove(0);
    let bot = Bot::spawn(credential("bot1"), fast_settings(), connector, game_data());

    make_ready(&handle).await;
    wait_until(|| bot.is_ready()).await;

    let result = bot.inspect(owned_link("77")).await;
    assert_eq!(result, Err(BotError::Timeout));
    assert!(bot.is_ready(), "a ttl expiry must not take the bot down");

    // the next request still goes out and resolves
    let worker = {
        let bot = bot.clone();
        tokio::spawn(async move { bot.inspect(owned_link("78")).await })
    };
    next_inspect(&mut handle).await; // the timed-out dispatch for 77
    next_inspect(&mut handle).await;
    handle
        .events
        .send(SessionEvent::InspectItemInfo(item_info(78)))
        .await
        .unwrap();
    assert!(worker.await.unwrap().is_ok());
}

#[tokio::test]
async fn inspect_before_gc_ready_fails_fast() {
    let (connector, _handles) = MockConnector::new();
    let bot = Bot::spawn(credential("bot1"), fast_settings(), connector, game_data());

    let result = bot.inspect(owned_link("1")).await;
    assert_eq!(result, Err(BotError::NotReady));
}

#[tokio::test]
async fn reconnects_after_disconnect() {
    let (connector, mut handles) = MockConnector::with_sessions(2);
    let second = handles.remove(1);
    let first = handles.remove(0);
    let bot = Bot::spawn(credential("bot1"), fast_settings(), connector, game_data());

    make_ready(&first).await;
    wait_until(|| bot.is_ready()).await;

    first
        .events
        .send(SessionEvent::Disconnected {
            eresult: 3,
            message: "connection lost".into(),
        })
        .await
        .unwrap();
    wait_until(|| !bot.is_ready()).await;

    // the login poller picks up the second prepared session
    make_ready(&second).await;
    wait_until(|| bot.is_ready()).await;
}

#[tokio::test]
async fn relog_waits_for_the_in_flight_request() {
    let (connector, mut handles) = MockConnector::with_sessions(2);
    let second = handles.remove(1);
    let mut first = handles.remove(0);
    let bot = Bot::spawn(credential("bot1"), fast_settings(), connector, game_data());

    make_ready(&first).await;
    wait_until(|| bot.is_ready()).await;

    let worker = {
        let bot = bot.clone();
        tokio::spawn(async move { bot.inspect(owned_link("55")).await })
    };
    next_inspect(&mut first).await;

    // relog requested mid-flight: the request must still complete
    bot.request_relog();
    first
        .events
        .send(SessionEvent::InspectItemInfo(item_info(55)))
        .await
        .unwrap();
    assert!(worker.await.unwrap().is_ok());

    // after the deferred relog fires, the bot comes back on the second
    // session
    let logged_off = async {
        loop {
            if let Some(MockAction::LogOff) = first.actions.recv().await {
                return;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(3), logged_off)
        .await
        .expect("bot relogged within the deferral window");

    make_ready(&second).await;
    wait_until(|| bot.is_ready()).await;
}

#[tokio::test]
async fn lost_gc_subchannel_marks_bot_not_ready_until_rejoin() {
    let (connector, mut handles) = MockConnector::new();
    let mut handle = handles.remove(0);
    let bot = Bot::spawn(credential("bot1"), fast_settings(), connector, game_data());

    make_ready(&handle).await;
    wait_until(|| bot.is_ready()).await;

    handle
        .events
        .send(SessionEvent::DisconnectedFromGc {
            reason: "gc went away".into(),
        })
        .await
        .unwrap();
    wait_until(|| !bot.is_ready()).await;

    // after the reconnect delay the bot re-announces the game
    let games_played = async {
        loop {
            if let Some(MockAction::GamesPlayed(_)) = handle.actions.recv().await {
                return;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(1), games_played)
        .await
        .expect("bot re-announced the game");

    handle.events.send(SessionEvent::ConnectedToGc).await.unwrap();
    wait_until(|| bot.is_ready()).await;
}

#[tokio::test]
async fn missing_ownership_triggers_a_free_license_request() {
    let (connector, mut handles) = MockConnector::new();
    let mut handle = handles.remove(0);
    let bot = Bot::spawn(credential("bot1"), fast_settings(), connector, game_data());

    handle
        .events
        .send(SessionEvent::OwnershipCached { owns_app: false })
        .await
        .unwrap();

    let licensed = async {
        loop {
            if let Some(MockAction::FreeLicense(730)) = handle.actions.recv().await {
                return;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(1), licensed)
        .await
        .expect("free license requested");

    handle.events.send(SessionEvent::ConnectedToGc).await.unwrap();
    wait_until(|| bot.is_ready()).await;
}
