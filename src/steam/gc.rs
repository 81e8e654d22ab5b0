//! The session contract consumed by the bot fleet.
//!
//! Everything below the authenticated Steam connection and its
//! game-coordinator subchannel lives behind these traits; the production
//! implementation is the steam-vent adapter in [`super::vent`], and tests
//! drive the fleet with in-process fakes.

use std::path::PathBuf;

use async_trait::async_trait;
use url::Url;

pub const CSGO_APP_ID: u32 = 730;

// Login EResult values the fleet treats specially.
pub const ERESULT_ILLEGAL_PASSWORD: i32 = 61;
pub const ERESULT_ACCOUNT_LOGON_DENIED: i32 = 63;
pub const ERESULT_INVALID_LOGIN_AUTH_CODE: i32 = 65;
pub const ERESULT_ACCOUNT_LOGON_DENIED_NO_MAIL: i32 = 66;
pub const ERESULT_RATE_LIMIT_EXCEEDED: i32 = 84;

/// One bot's credentials, plus the proxy assigned to it (round-robin over
/// the configured proxy pool).
#[derive(Debug, Clone)]
pub struct SteamCredential {
    pub username: String,
    pub password: String,
    pub shared_secret: Option<String>,
    pub proxy: Option<Url>,
    pub data_dir: Option<PathBuf>,
}

/// A sticker or keychain slot as decoded from the preview data block.
#[derive(Debug, Clone, Default)]
pub struct StickerBlock {
    pub slot: Option<u32>,
    pub sticker_id: Option<u32>,
    pub wear: Option<f64>,
    pub scale: Option<f64>,
    pub rotation: Option<f64>,
    pub tint_id: Option<u32>,
    pub offset_x: Option<f64>,
    pub offset_y: Option<f64>,
    pub offset_z: Option<f64>,
    pub pattern: Option<u32>,
}

/// The raw item preview block the coordinator returns for an inspect
/// request. `paintwear` arrives here already converted from its u32 bit
/// pattern to a float.
#[derive(Debug, Clone, Default)]
pub struct ItemInfoBlock {
    pub itemid: u64,
    pub accountid: Option<u32>,
    pub defindex: u32,
    pub paintindex: u32,
    pub rarity: u32,
    pub quality: u32,
    pub paintwear: f64,
    pub paintseed: Option<u32>,
    pub killeaterscoretype: Option<u32>,
    pub killeatervalue: Option<u32>,
    pub customname: Option<String>,
    pub inventory: Option<u64>,
    pub origin: Option<u32>,
    pub questid: Option<u32>,
    pub dropreason: Option<u32>,
    pub musicindex: Option<u32>,
    pub entindex: Option<i32>,
    pub petindex: Option<u32>,
    pub stickers: Vec<StickerBlock>,
    pub keychains: Vec<StickerBlock>,
}

/// Events surfaced by an established session.
#[derive(Debug)]
pub enum SessionEvent {
    /// Ownership of the app catalogue is known; `owns_app` reflects the
    /// inspected game.
    OwnershipCached { owns_app: bool },
    /// The game-coordinator subchannel is up; inspects may be dispatched.
    ConnectedToGc,
    /// The subchannel dropped; the Steam session itself is still alive.
    DisconnectedFromGc { reason: String },
    /// An inspect response, correlated by the echoed `itemid`.
    InspectItemInfo(ItemInfoBlock),
    /// The Steam session dropped.
    Disconnected { eresult: i32, message: String },
    /// A session-level error; treated like a disconnect.
    SessionError(String),
}

#[derive(Debug)]
pub enum SessionError {
    /// Logon was denied by the backend with the given EResult.
    LogonDenied { eresult: i32, message: String },
    /// Transport-level failure.
    Network(String),
    /// The connection attempt outlived its deadline.
    Timeout,
}

impl SessionError {
    pub const fn eresult(&self) -> Option<i32> {
        match self {
            Self::LogonDenied { eresult, .. } => Some(*eresult),
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LogonDenied { eresult, message } => {
                write!(f, "logon denied (eresult {eresult}): {message}")
            }
            Self::Network(msg) => write!(f, "network error: {msg}"),
            Self::Timeout => write!(f, "connection timed out"),
        }
    }
}

impl std::error::Error for SessionError {}

/// An authenticated Steam session with its game-coordinator subchannel.
///
/// Returned by [`SessionConnector::connect`] after logon succeeds; all
/// subsequent state changes arrive through [`GameSession::next_event`].
#[async_trait]
pub trait GameSession: Send {
    /// Announce the played app so the coordinator opens its subchannel.
    async fn games_played(&mut self, app_ids: &[u32]) -> Result<(), SessionError>;

    /// Claim a free license for the app; used when ownership is missing.
    async fn request_free_license(&mut self, app_id: u32) -> Result<(), SessionError>;

    /// Fire an inspect request with the canonical link tuple; the unused
    /// owner side is 0. The response arrives asynchronously as
    /// [`SessionEvent::InspectItemInfo`] with the echoed asset id.
    async fn inspect_item(&mut self, s: u64, a: u64, d: u64, m: u64)
        -> Result<(), SessionError>;

    /// Next session event; `None` means the session is gone for good.
    async fn next_event(&mut self) -> Option<SessionEvent>;

    /// Graceful logoff. Infallible by contract; failures are logged.
    async fn log_off(&mut self);
}

/// Factory for [`GameSession`]s. One connector is shared by the whole
/// fleet; each call performs a fresh logon.
#[async_trait]
pub trait SessionConnector: Send + Sync + 'static {
    async fn connect(
        &self,
        credential: &SteamCredential,
    ) -> Result<Box<dyn GameSession>, SessionError>;
}
