use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, error, info, warn};

use super::gc::{
    GameSession, ItemInfoBlock, SessionConnector, SessionError, SessionEvent, SteamCredential,
    StickerBlock, CSGO_APP_ID, ERESULT_ACCOUNT_LOGON_DENIED, ERESULT_ACCOUNT_LOGON_DENIED_NO_MAIL,
    ERESULT_ILLEGAL_PASSWORD, ERESULT_INVALID_LOGIN_AUTH_CODE, ERESULT_RATE_LIMIT_EXCEEDED,
};
use crate::game_data::GameData;
use crate::link::InspectLink;
use crate::models::{DecoratedItem, Sticker};

const MAX_LOGIN_BACKOFF: Duration = Duration::from_secs(300);
const RELOG_DEFER: Duration = Duration::from_secs(1);

/// Per-bot pacing and session policy.
#[derive(Debug, Clone)]
pub struct BotSettings {
    /// Minimum spacing between successive dispatches from this bot.
    pub request_delay: Duration,
    /// Deadline for a single in-flight inspect response.
    pub request_ttl: Duration,
    /// Accepted for config compatibility; the wire correlation only
    /// supports one in-flight inspect, so values above 1 are clamped.
    pub max_concurrent_requests: u32,
    pub connection_timeout: Duration,
    pub login_retry_delay: Duration,
    pub gc_reconnect_delay: Duration,
    /// Consecutive failed logins before exponential backoff kicks in.
    pub max_login_attempts: u32,
    /// Base interval for the voluntary relogin cycle.
    pub relog_interval: Duration,
    /// Random jitter added on top of `relog_interval` so the fleet does not
    /// reconnect in lockstep.
    pub relog_jitter_max: Duration,
    /// Bound on the bot-local pending queue.
    pub local_queue_limit: usize,
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            request_delay: Duration::from_millis(1000),
            request_ttl: Duration::from_millis(30_000),
            max_concurrent_requests: 1,
            connection_timeout: Duration::from_secs(60),
            login_retry_delay: Duration::from_secs(10),
            gc_reconnect_delay: Duration::from_secs(5),
            max_login_attempts: 3,
            relog_interval: Duration::from_secs(30 * 60),
            relog_jitter_max: Duration::from_secs(4 * 60),
            local_queue_limit: 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotError {
    /// No healthy game-coordinator session right now.
    NotReady,
    /// The coordinator did not answer within `request_ttl`.
    Timeout,
    /// The session dropped or refused while the request was in flight.
    Session(String),
    /// The process is going down.
    Shutdown,
}

impl fmt::Display for BotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotReady => write!(f, "bot is not ready"),
            Self::Timeout => write!(f, "inspect request timed out"),
            Self::Session(msg) => write!(f, "session error: {msg}"),
            Self::Shutdown => write!(f, "bot is shutting down"),
        }
    }
}

impl std::error::Error for BotError {}

/// A resolved inspect plus the pacing delay the scheduler must observe
/// before reusing this bot's slot.
#[derive(Debug)]
pub struct InspectOutcome {
    pub item: DecoratedItem,
    pub delay: Duration,
}

type Reply = oneshot::Sender<Result<InspectOutcome, BotError>>;

enum Command {
    Inspect { link: InspectLink, reply: Reply },
    Relog,
    Shutdown,
}

/// Handle to one bot actor. Cheap to clone; the actor itself owns the
/// session and all mutable state.
#[derive(Clone)]
pub struct Bot {
    username: Arc<str>,
    cmd_tx: mpsc::Sender<Command>,
    ready: Arc<AtomicBool>,
}

impl Bot {
    pub fn spawn(
        credential: SteamCredential,
        mut settings: BotSettings,
        connector: Arc<dyn SessionConnector>,
        game_data: Arc<GameData>,
    ) -> Self {
        if settings.max_concurrent_requests > 1 {
            warn!(
                account = %credential.username,
                configured = settings.max_concurrent_requests,
                "wire correlation supports one in-flight inspect per bot, clamping"
            );
            settings.max_concurrent_requests = 1;
        }

        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let ready = Arc::new(AtomicBool::new(false));
        let username: Arc<str> = credential.username.clone().into();

        let driver = Driver {
            credential,
            settings,
            connector,
            game_data,
            cmd_rx,
            ready: Arc::clone(&ready),
            login_attempts: 0,
            next_wait: Duration::ZERO,
            queue: VecDeque::new(),
            current: None,
            next_dispatch_at: Instant::now(),
            relog_at: far_future(),
            gc_rejoin_at: None,
        };
        tokio::spawn(driver.run());

        Self {
            username,
            cmd_tx,
            ready,
        }
    }

    pub fn name(&self) -> &str {
        &self.username
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Resolve one inspect link through this bot's session.
    pub async fn inspect(&self, link: InspectLink) -> Result<InspectOutcome, BotError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Inspect { link, reply })
            .await
            .map_err(|_| BotError::Shutdown)?;
        rx.await.map_err(|_| BotError::Shutdown)?
    }

    /// Ask for a graceful relog at the next idle moment.
    pub fn request_relog(&self) {
        let _ = self.cmd_tx.try_send(Command::Relog);
    }

    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown).await;
    }
}

enum DriveExit {
    Shutdown,
    Relog,
    Disconnected,
}

struct PendingInspect {
    link: InspectLink,
    reply: Reply,
}

struct CurrentRequest {
    link: InspectLink,
    reply: Reply,
    dispatched_at: Instant,
    deadline: Instant,
}

struct Driver {
    credential: SteamCredential,
    settings: BotSettings,
    connector: Arc<dyn SessionConnector>,
    game_data: Arc<GameData>,
    cmd_rx: mpsc::Receiver<Command>,
    ready: Arc<AtomicBool>,
    login_attempts: u32,
    /// How long to sit in the disconnected state before the next login.
    next_wait: Duration,
    queue: VecDeque<PendingInspect>,
    current: Option<CurrentRequest>,
    /// Earliest moment the next inspect may go on the wire.
    next_dispatch_at: Instant,
    relog_at: Instant,
    gc_rejoin_at: Option<Instant>,
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86_400)
}

impl Driver {
    async fn run(mut self) {
        loop {
            if !self.idle_disconnected().await {
                break;
            }
            let Some(session) = self.login().await else {
                continue;
            };
            match self.drive(session).await {
                DriveExit::Shutdown => break,
                DriveExit::Relog => self.next_wait = Duration::ZERO,
                DriveExit::Disconnected => self.next_wait = self.settings.login_retry_delay,
            }
        }
        self.set_ready(false);
        self.fail_all(&BotError::Shutdown);
        info!(account = %self.credential.username, "bot stopped");
    }

    /// Wait out the login delay while still answering callers.
    async fn idle_disconnected(&mut self) -> bool {
        let deadline = Instant::now() + self.next_wait;
        loop {
            tokio::select! {
                () = sleep_until(deadline) => return true,
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Inspect { reply, .. }) => {
                        let _ = reply.send(Err(BotError::NotReady));
                    }
                    Some(Command::Relog) => {}
                    Some(Command::Shutdown) | None => return false,
                },
            }
        }
    }

    async fn login(&mut self) -> Option<Box<dyn GameSession>> {
        self.login_attempts += 1;
        info!(
            account = %self.credential.username,
            attempt = self.login_attempts,
            "logging in"
        );

        let attempt = self.connector.connect(&self.credential);
        match timeout(self.settings.connection_timeout, attempt).await {
            Ok(Ok(session)) => {
                info!(account = %self.credential.username, "logged on");
                self.login_attempts = 0;
                Some(session)
            }
            Ok(Err(err)) => {
                self.handle_login_error(&err);
                None
            }
            Err(_) => {
                warn!(account = %self.credential.username, "login timed out");
                self.next_wait = self.failure_backoff();
                None
            }
        }
    }

    fn failure_backoff(&self) -> Duration {
        if self.login_attempts <= self.settings.max_login_attempts {
            self.settings.login_retry_delay
        } else {
            let exp = (self.login_attempts - self.settings.max_login_attempts).min(10);
            Duration::from_secs(5u64 << exp).min(MAX_LOGIN_BACKOFF)
        }
    }

    fn handle_login_error(&mut self, err: &SessionError) {
        match err.eresult() {
            Some(ERESULT_RATE_LIMIT_EXCEEDED) => {
                warn!(
                    account = %self.credential.username,
                    "login rate limited, backing off to the maximum"
                );
                self.next_wait = MAX_LOGIN_BACKOFF;
            }
            Some(
                eresult @ (ERESULT_ILLEGAL_PASSWORD
                | ERESULT_ACCOUNT_LOGON_DENIED
                | ERESULT_INVALID_LOGIN_AUTH_CODE
                | ERESULT_ACCOUNT_LOGON_DENIED_NO_MAIL),
            ) => {
                error!(
                    account = %self.credential.username,
                    eresult,
                    "login denied, credential needs operator attention: {err}"
                );
                self.next_wait = self.failure_backoff();
            }
            _ => {
                warn!(account = %self.credential.username, "login failed: {err}");
                self.next_wait = self.failure_backoff();
            }
        }
    }

    async fn drive(&mut self, mut session: Box<dyn GameSession>) -> DriveExit {
        self.schedule_relog();
        self.gc_rejoin_at = None;

        let exit = loop {
            let ttl_at = self
                .current
                .as_ref()
                .map_or_else(far_future, |c| c.deadline);
            let dispatch_wanted =
                self.is_ready() && self.current.is_none() && !self.queue.is_empty();
            let rejoin_at = self.gc_rejoin_at.unwrap_or_else(far_future);

            tokio::select! {
                event = session.next_event() => {
                    let Some(event) = event else {
                        self.on_disconnect(0, "event stream closed");
                        break DriveExit::Disconnected;
                    };
                    if let Some(exit) = self.on_event(&mut session, event).await {
                        break exit;
                    }
                }
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Inspect { link, reply }) => {
                        self.accept_inspect(link, reply);
                        self.maybe_dispatch(&mut session).await;
                    }
                    Some(Command::Relog) => {
                        // handled by the relog timer logic at the next tick
                        self.relog_at = Instant::now();
                    }
                    Some(Command::Shutdown) | None => {
                        session.log_off().await;
                        break DriveExit::Shutdown;
                    }
                },
                () = sleep_until(ttl_at), if self.current.is_some() => {
                    self.on_request_timeout();
                }
                () = sleep_until(self.next_dispatch_at), if dispatch_wanted => {
                    self.maybe_dispatch(&mut session).await;
                }
                () = sleep_until(rejoin_at), if self.gc_rejoin_at.is_some() => {
                    self.gc_rejoin_at = None;
                    if let Err(e) = session.games_played(&[CSGO_APP_ID]).await {
                        warn!(account = %self.credential.username, "gc rejoin failed: {e}");
                        self.on_disconnect(0, "gc rejoin failed");
                        break DriveExit::Disconnected;
                    }
                }
                () = sleep_until(self.relog_at) => {
                    if self.relog_now(&mut session).await {
                        break DriveExit::Relog;
                    }
                }
            }
        };

        self.set_ready(false);
        exit
    }

    async fn on_event(
        &mut self,
        session: &mut Box<dyn GameSession>,
        event: SessionEvent,
    ) -> Option<DriveExit> {
        match event {
            SessionEvent::OwnershipCached { owns_app } => {
                if !owns_app {
                    info!(
                        account = %self.credential.username,
                        "account is missing the game, requesting free license"
                    );
                    if let Err(e) = session.request_free_license(CSGO_APP_ID).await {
                        warn!("free license request failed: {e}");
                    }
                }
                if let Err(e) = session.games_played(&[CSGO_APP_ID]).await {
                    warn!(account = %self.credential.username, "games_played failed: {e}");
                    self.on_disconnect(0, "games_played failed");
                    return Some(DriveExit::Disconnected);
                }
                None
            }
            SessionEvent::ConnectedToGc => {
                info!(account = %self.credential.username, "game coordinator ready");
                self.set_ready(true);
                None
            }
            SessionEvent::DisconnectedFromGc { reason } => {
                warn!(account = %self.credential.username, %reason, "lost game coordinator");
                self.set_ready(false);
                self.gc_rejoin_at = Some(Instant::now() + self.settings.gc_reconnect_delay);
                // queued work goes back to the scheduler instead of waiting
                // out a rejoin that may never come
                for pending in self.queue.drain(..) {
                    let _ = pending.reply.send(Err(BotError::NotReady));
                }
                None
            }
            SessionEvent::InspectItemInfo(block) => {
                self.on_item_info(block);
                None
            }
            SessionEvent::Disconnected { eresult, message } => {
                self.on_disconnect(eresult, &message);
                Some(DriveExit::Disconnected)
            }
            SessionEvent::SessionError(message) => {
                self.on_disconnect(0, &message);
                Some(DriveExit::Disconnected)
            }
        }
    }

    fn accept_inspect(&mut self, link: InspectLink, reply: Reply) {
        if !self.is_ready() {
            let _ = reply.send(Err(BotError::NotReady));
            return;
        }
        if self.queue.len() >= self.settings.local_queue_limit {
            let _ = reply.send(Err(BotError::NotReady));
            return;
        }
        self.queue.push_back(PendingInspect { link, reply });
    }

    async fn maybe_dispatch(&mut self, session: &mut Box<dyn GameSession>) {
        if !self.is_ready()
            || self.current.is_some()
            || Instant::now() < self.next_dispatch_at
        {
            return;
        }
        let Some(pending) = self.queue.pop_front() else {
            return;
        };

        let s = pending.link.s.parse().unwrap_or_default();
        let a = pending.link.a.parse().unwrap_or_default();
        let d = pending.link.d.parse().unwrap_or_default();
        let m = pending.link.m.parse().unwrap_or_default();

        match session.inspect_item(s, a, d, m).await {
            Ok(()) => {
                let now = Instant::now();
                debug!(account = %self.credential.username, asset_id = %pending.link.a, "inspect dispatched");
                self.current = Some(CurrentRequest {
                    link: pending.link,
                    reply: pending.reply,
                    dispatched_at: now,
                    deadline: now + self.settings.request_ttl,
                });
            }
            Err(e) => {
                warn!(account = %self.credential.username, "inspect send failed: {e}");
                let _ = pending.reply.send(Err(BotError::Session(e.to_string())));
            }
        }
    }

    fn on_item_info(&mut self, block: ItemInfoBlock) {
        let Some(current) = self.current.as_ref() else {
            debug!(itemid = block.itemid, "unsolicited iteminfo, dropping");
            return;
        };
        if block.itemid.to_string() != current.link.a {
            debug!(
                expected = %current.link.a,
                got = block.itemid,
                "iteminfo does not match the in-flight request, dropping"
            );
            return;
        }

        let current = self.current.take().expect("checked above");
        let delay = self
            .settings
            .request_delay
            .saturating_sub(current.dispatched_at.elapsed());
        self.next_dispatch_at = Instant::now() + delay;

        let mut item = build_item(&current.link, block);
        self.game_data.annotate(&mut item);
        let _ = current.reply.send(Ok(InspectOutcome { item, delay }));
    }

    fn on_request_timeout(&mut self) {
        let Some(current) = self.current.take() else {
            return;
        };
        warn!(
            account = %self.credential.username,
            asset_id = %current.link.a,
            "inspect request exceeded its ttl"
        );
        let delay = self
            .settings
            .request_delay
            .saturating_sub(current.dispatched_at.elapsed());
        self.next_dispatch_at = Instant::now() + delay;
        let _ = current.reply.send(Err(BotError::Timeout));
        // the bot itself stays ready; only this request is failed
    }

    async fn relog_now(&mut self, session: &mut Box<dyn GameSession>) -> bool {
        if self.is_ready() && self.current.is_none() {
            info!(account = %self.credential.username, "relogging");
            session.log_off().await;
            self.set_ready(false);
            true
        } else {
            self.relog_at = Instant::now() + RELOG_DEFER;
            false
        }
    }

    fn schedule_relog(&mut self) {
        let jitter_ms = u64::try_from(self.settings.relog_jitter_max.as_millis())
            .map_or(0, |max| rand::thread_rng().gen_range(0..=max));
        self.relog_at =
            Instant::now() + self.settings.relog_interval + Duration::from_millis(jitter_ms);
    }

    fn on_disconnect(&mut self, eresult: i32, message: &str) {
        warn!(
            account = %self.credential.username,
            eresult,
            message,
            "session disconnected"
        );
        self.set_ready(false);
        self.gc_rejoin_at = None;
        if let Some(current) = self.current.take() {
            let _ = current
                .reply
                .send(Err(BotError::Session(message.to_string())));
        }
        // queued entries never hit the wire; let the scheduler reroute them
        for pending in self.queue.drain(..) {
            let _ = pending.reply.send(Err(BotError::NotReady));
        }
    }

    fn fail_all(&mut self, err: &BotError) {
        if let Some(current) = self.current.take() {
            let _ = current.reply.send(Err(err.clone()));
        }
        for pending in self.queue.drain(..) {
            let _ = pending.reply.send(Err(err.clone()));
        }
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }
}

/// Apply the post-response shape contract: the raw paintwear becomes
/// `floatvalue`, `paintseed` is coerced to 0, and the identifying tuple is
/// stamped from the original request.
fn build_item(link: &InspectLink, block: ItemInfoBlock) -> DecoratedItem {
    DecoratedItem {
        s: link.s.clone(),
        a: link.a.clone(),
        d: link.d.clone(),
        m: link.m.clone(),
        floatvalue: block.paintwear,
        paintseed: block.paintseed.unwrap_or(0),
        paintindex: block.paintindex,
        defindex: block.defindex,
        rarity: block.rarity,
        quality: block.quality,
        accountid: block.accountid,
        itemid: Some(block.itemid.to_string()),
        killeaterscoretype: block.killeaterscoretype,
        killeatervalue: block.killeatervalue,
        customname: block.customname,
        inventory: block.inventory,
        origin: block.origin,
        questid: block.questid,
        dropreason: block.dropreason,
        musicindex: block.musicindex,
        entindex: block.entindex,
        petindex: block.petindex,
        stickers: block.stickers.into_iter().map(to_sticker).collect(),
        keychains: block.keychains.into_iter().map(to_sticker).collect(),
        ..Default::default()
    }
}

fn to_sticker(block: StickerBlock) -> Sticker {
    Sticker {
        slot: block.slot,
        sticker_id: block.sticker_id,
        wear: block.wear,
        scale: block.scale,
        rotation: block.rotation,
        tint_id: block.tint_id,
        offset_x: block.offset_x,
        offset_y: block.offset_y,
        offset_z: block.offset_z,
        pattern: block.pattern,
        name: None,
    }
}
