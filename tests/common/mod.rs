//! In-process fakes for the game-coordinator session contract, shared by
//! the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cs_inspect_backend::steam::bot::BotSettings;
use cs_inspect_backend::steam::gc::{
    GameSession, ItemInfoBlock, SessionConnector, SessionError, SessionEvent, SteamCredential,
};
use tokio::sync::mpsc;

/// What the session under test was asked to do.
#[derive(Debug)]
pub enum MockAction {
    GamesPlayed(Vec<u32>),
    FreeLicense(u32),
    Inspect { s: u64, a: u64, d: u64, m: u64 },
    LogOff,
}

pub struct MockSession {
    events: mpsc::Receiver<SessionEvent>,
    actions: mpsc::UnboundedSender<MockAction>,
}

#[async_trait]
impl GameSession for MockSession {
    async fn games_played(&mut self, app_ids: &[u32]) -> Result<(), SessionError> {
        let _ = self.actions.send(MockAction::GamesPlayed(app_ids.to_vec()));
        Ok(())
    }

    async fn request_free_license(&mut self, app_id: u32) -> Result<(), SessionError> {
        let _ = self.actions.send(MockAction::FreeLicense(app_id));
        Ok(())
    }

    async fn inspect_item(&mut self, s: u64, a: u64, d: u64, m: u64) -> Result<(), SessionError> {
        let _ = self.actions.send(MockAction::Inspect { s, a, d, m });
        Ok(())
    }

    async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    async fn log_off(&mut self) {
        let _ = self.actions.send(MockAction::LogOff);
    }
}

/// Test-side handles for one prepared session.
pub struct SessionHandle {
    pub events: mpsc::Sender<SessionEvent>,
    pub actions: mpsc::UnboundedReceiver<MockAction>,
}

/// Connector that hands out pre-arranged sessions in order and fails once
/// the supply is exhausted.
pub struct MockConnector {
    sessions: Mutex<VecDeque<MockSession>>,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, Vec<SessionHandle>) {
        Self::with_sessions(1)
    }

    pub fn with_sessions(count: usize) -> (Arc<Self>, Vec<SessionHandle>) {
        let mut sessions = VecDeque::new();
        let mut handles = Vec::new();
        for _ in 0..count {
            let (event_tx, event_rx) = mpsc::channel(64);
            let (action_tx, action_rx) = mpsc::unbounded_channel();
            sessions.push_back(MockSession {
                events: event_rx,
                actions: action_tx,
            });
            handles.push(SessionHandle {
                events: event_tx,
                actions: action_rx,
            });
        }
        (
            Arc::new(Self {
                sessions: Mutex::new(sessions),
            }),
            handles,
        )
    }

    /// A connector with no sessions; every login fails.
    pub fn offline() -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(VecDeque::new()),
        })
    }
}

#[async_trait]
impl SessionConnector for MockConnector {
    async fn connect(
        &self,
        _credential: &SteamCredential,
    ) -> Result<Box<dyn GameSession>, SessionError> {
        self.sessions
            .lock()
            .expect("mock connector lock poisoned")
            .pop_front()
            .map(|session| Box::new(session) as Box<dyn GameSession>)
            .ok_or_else(|| SessionError::Network("no session prepared".into()))
    }
}

pub fn credential(username: &str) -> SteamCredential {
    SteamCredential {
        username: username.to_string(),
        password: "password".to_string(),
        shared_secret: None,
        proxy: None,
        data_dir: None,
    }
}

/// Fast-paced settings so tests do not sit out production delays.
pub fn fast_settings() -> BotSettings {
    BotSettings {
        request_delay: Duration::from_millis(20),
        request_ttl: Duration::from_millis(200),
        connection_timeout: Duration::from_millis(500),
        login_retry_delay: Duration::from_millis(50),
        gc_reconnect_delay: Duration::from_millis(20),
        ..BotSettings::default()
    }
}

/// Bring a mock-backed session to the ready state.
pub async fn make_ready(handle: &SessionHandle) {
    handle
        .events
        .send(SessionEvent::OwnershipCached { owns_app: true })
        .await
        .expect("bot actor is alive");
    handle
        .events
        .send(SessionEvent::ConnectedToGc)
        .await
        .expect("bot actor is alive");
}

/// Poll until `predicate` holds, failing the test after one second.
pub async fn wait_until(mut predicate: impl FnMut() -> bool) {
    for _ in 0..200 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within the deadline");
}

pub fn item_info(itemid: u64) -> ItemInfoBlock {
    ItemInfoBlock {
        itemid,
        defindex: 7,
        paintindex: 44,
        rarity: 6,
        quality: 4,
        paintwear: 0.223_456,
        paintseed: Some(121),
        ..Default::default()
    }
}
