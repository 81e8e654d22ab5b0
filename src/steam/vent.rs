//! Production [`SessionConnector`] built on `steam-vent`.
//!
//! This is the only module that touches the Steam wire protocol; everything
//! above it speaks the [`super::gc`] contract. The adapter keeps no fleet
//! logic of its own: it logs on, opens the CS game-coordinator subchannel,
//! and forwards coordinator traffic as [`SessionEvent`]s.

use another_steam_totp::generate_auth_code;
use async_trait::async_trait;
use futures::StreamExt;
use steam_vent::auth::{
    AuthCodeConfirmationHandler, AuthConfirmationHandler, ConsoleAuthConfirmationHandler,
    DeviceConfirmationHandler, FileGuardDataStore,
};
use steam_vent::gc::GameCoordinator;
use steam_vent::{Connection, ConnectionTrait, ServerList};
use steam_vent_proto_csgo::cstrike15_gcmessages::{
    cecon_item_preview_data_block, CMsgGCCStrike15_v2_Client2GCEconPreviewDataBlockRequest,
    CMsgGCCStrike15_v2_Client2GCEconPreviewDataBlockResponse,
};
use steam_vent_proto_csgo::gcsdk_gcmessages::{CMsgClientHello, CMsgClientWelcome};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::gc::{
    GameSession, ItemInfoBlock, SessionConnector, SessionError, SessionEvent, SteamCredential,
    StickerBlock, CSGO_APP_ID,
};

pub struct VentConnector;

impl VentConnector {
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SessionConnector for VentConnector {
    async fn connect(
        &self,
        credential: &SteamCredential,
    ) -> Result<Box<dyn GameSession>, SessionError> {
        if credential.proxy.is_some() {
            // TODO: thread socks5 proxies into steam-vent once Connection
            // exposes a transport hook; until then bots share the host's
            // egress address.
            warn!(
                account = %credential.username,
                "per-bot proxies are not applied by the steam-vent transport"
            );
        }

        let server_list = ServerList::discover()
            .await
            .map_err(|e| SessionError::Network(e.to_string()))?;

        let guard_store = match credential.data_dir.as_deref() {
            Some(dir) => FileGuardDataStore::new(dir.join("guard.json")),
            None => FileGuardDataStore::user_cache(),
        };

        let connection = match credential.shared_secret.as_deref() {
            Some(secret) => {
                let code = generate_auth_code(secret.to_string(), None)
                    .map_err(|e| SessionError::Network(format!("totp generation failed: {e}")))?;
                Connection::login(
                    &server_list,
                    &credential.username,
                    &credential.password,
                    guard_store,
                    AuthCodeConfirmationHandler::device_code(code),
                )
                .await
            }
            None => {
                Connection::login(
                    &server_list,
                    &credential.username,
                    &credential.password,
                    guard_store,
                    ConsoleAuthConfirmationHandler::default().or(DeviceConfirmationHandler),
                )
                .await
            }
        }
        .map_err(map_login_error)?;

        let gc = GameCoordinator::new(&connection, CSGO_APP_ID)
            .await
            .map_err(|e| SessionError::Network(e.to_string()))?;

        let (event_tx, event_rx) = mpsc::channel(64);
        spawn_event_pump(&gc, event_tx);

        Ok(Box::new(VentSession {
            connection,
            gc,
            events: event_rx,
        }))
    }
}

fn map_login_error(err: steam_vent::ConnectionError) -> SessionError {
    match err {
        steam_vent::ConnectionError::LoginError(login) => SessionError::LogonDenied {
            eresult: login.eresult(),
            message: login.to_string(),
        },
        other => SessionError::Network(other.to_string()),
    }
}

/// Forward coordinator traffic into the session event channel. Each stream
/// ending means the underlying connection is gone, which surfaces as a
/// `Disconnected` event.
fn spawn_event_pump(gc: &GameCoordinator, tx: mpsc::Sender<SessionEvent>) {
    let mut welcomes = gc.on::<CMsgClientWelcome>();
    let mut previews = gc.on::<CMsgGCCStrike15_v2_Client2GCEconPreviewDataBlockResponse>();

    tokio::spawn(async move {
        // CS is free to play: every account that reaches logon owns the app,
        // so ownership resolves immediately rather than from a license scan.
        let _ = tx
            .send(SessionEvent::OwnershipCached { owns_app: true })
            .await;

        loop {
            tokio::select! {
                welcome = welcomes.next() => {
                    match welcome {
                        Some(Ok(_)) => {
                            if tx.send(SessionEvent::ConnectedToGc).await.is_err() {
                                return;
                            }
                        }
                        Some(Err(e)) => {
                            debug!("malformed gc welcome: {e}");
                        }
                        None => break,
                    }
                }
                preview = previews.next() => {
                    match preview {
                        Some(Ok(response)) => {
                            let Some(block) = decode_preview(&response) else {
                                debug!("preview response without iteminfo");
                                continue;
                            };
                            if tx.send(SessionEvent::InspectItemInfo(block)).await.is_err() {
                                return;
                            }
                        }
                        Some(Err(e)) => {
                            debug!("malformed preview response: {e}");
                        }
                        None => break,
                    }
                }
            }
        }

        let _ = tx
            .send(SessionEvent::Disconnected {
                eresult: 0,
                message: "connection closed".into(),
            })
            .await;
    });
}

fn decode_preview(
    response: &CMsgGCCStrike15_v2_Client2GCEconPreviewDataBlockResponse,
) -> Option<ItemInfoBlock> {
    let info = response.iteminfo.as_ref()?;

    Some(ItemInfoBlock {
        itemid: info.itemid(),
        accountid: info.accountid,
        defindex: info.defindex(),
        paintindex: info.paintindex(),
        rarity: info.rarity(),
        quality: info.quality(),
        // the wire carries the float's raw bit pattern in a uint32
        paintwear: f64::from(f32::from_bits(info.paintwear())),
        paintseed: info.paintseed,
        killeaterscoretype: info.killeaterscoretype,
        killeatervalue: info.killeatervalue,
        customname: info.customname.clone(),
        inventory: info.inventory.map(u64::from),
        origin: info.origin,
        questid: info.questid,
        dropreason: info.dropreason,
        musicindex: info.musicindex,
        entindex: info.entindex,
        petindex: info.petindex,
        stickers: info.stickers.iter().map(decode_sticker).collect(),
        keychains: info.keychains.iter().map(decode_sticker).collect(),
    })
}

fn decode_sticker(sticker: &cecon_item_preview_data_block::Sticker) -> StickerBlock {
    StickerBlock {
        slot: sticker.slot,
        sticker_id: sticker.sticker_id,
        wear: sticker.wear.map(f64::from),
        scale: sticker.scale.map(f64::from),
        rotation: sticker.rotation.map(f64::from),
        tint_id: sticker.tint_id,
        offset_x: sticker.offset_x.map(f64::from),
        offset_y: sticker.offset_y.map(f64::from),
        offset_z: sticker.offset_z.map(f64::from),
        pattern: sticker.pattern,
    }
}

struct VentSession {
    connection: Connection,
    gc: GameCoordinator,
    events: mpsc::Receiver<SessionEvent>,
}

#[async_trait]
impl GameSession for VentSession {
    async fn games_played(&mut self, app_ids: &[u32]) -> Result<(), SessionError> {
        self.connection
            .games_played(app_ids)
            .await
            .map_err(|e| SessionError::Network(e.to_string()))?;

        // announce ourselves to the coordinator; the welcome comes back as
        // an event
        let hello = CMsgClientHello::new();
        self.gc
            .send(hello)
            .await
            .map_err(|e| SessionError::Network(e.to_string()))
    }

    async fn request_free_license(&mut self, app_id: u32) -> Result<(), SessionError> {
        self.connection
            .request_free_license(&[app_id])
            .await
            .map_err(|e| SessionError::Network(e.to_string()))
    }

    async fn inspect_item(
        &mut self,
        s: u64,
        a: u64,
        d: u64,
        m: u64,
    ) -> Result<(), SessionError> {
        let mut request = CMsgGCCStrike15_v2_Client2GCEconPreviewDataBlockRequest::new();
        request.set_param_s(s);
        request.set_param_a(a);
        request.set_param_d(d);
        request.set_param_m(m);

        self.gc
            .send(request)
            .await
            .map_err(|e| SessionError::Network(e.to_string()))
    }

    async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    async fn log_off(&mut self) {
        if let Err(e) = self.connection.log_off().await {
            debug!("logoff failed: {e}");
        }
    }
}
