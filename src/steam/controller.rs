use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use super::bot::{Bot, BotError, BotSettings, InspectOutcome};
use super::gc::{SessionConnector, SteamCredential};
use crate::game_data::GameData;
use crate::link::InspectLink;

/// Owns the bot fleet and routes inspect requests to ready bots.
pub struct BotController {
    bots: RwLock<Vec<Bot>>,
    cursor: AtomicUsize,
    connector: Arc<dyn SessionConnector>,
    game_data: Arc<GameData>,
}

impl BotController {
    pub fn new(connector: Arc<dyn SessionConnector>, game_data: Arc<GameData>) -> Self {
        Self {
            bots: RwLock::new(Vec::new()),
            cursor: AtomicUsize::new(0),
            connector,
            game_data,
        }
    }

    pub fn add_bot(&self, credential: SteamCredential, settings: BotSettings) {
        info!(account = %credential.username, "starting bot");
        let bot = Bot::spawn(
            credential,
            settings,
            Arc::clone(&self.connector),
            Arc::clone(&self.game_data),
        );
        self.bots.write().expect("bot list lock poisoned").push(bot);
    }

    pub fn has_any(&self) -> bool {
        !self.bots.read().expect("bot list lock poisoned").is_empty()
    }

    pub fn bot_count(&self) -> usize {
        self.bots.read().expect("bot list lock poisoned").len()
    }

    pub fn ready_count(&self) -> usize {
        self.bots
            .read()
            .expect("bot list lock poisoned")
            .iter()
            .filter(|bot| bot.is_ready())
            .count()
    }

    /// Resolve a link through some ready bot, round-robin across the fleet.
    pub async fn lookup_float(&self, link: InspectLink) -> Result<InspectOutcome, BotError> {
        let Some(bot) = self.pick_ready() else {
            return Err(BotError::NotReady);
        };
        debug!(bot = bot.name(), asset_id = %link.a, "routing inspect");
        bot.inspect(link).await
    }

    fn pick_ready(&self) -> Option<Bot> {
        let bots = self.bots.read().expect("bot list lock poisoned");
        let ready: Vec<&Bot> = bots.iter().filter(|bot| bot.is_ready()).collect();
        if ready.is_empty() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % ready.len();
        Some(ready[index].clone())
    }

    /// Ask every bot for a graceful relog at its next idle moment.
    pub fn try_relog_all(&self) {
        let bots = self.bots.read().expect("bot list lock poisoned");
        info!(bots = bots.len(), "issuing fleet-wide relog");
        for bot in bots.iter() {
            bot.request_relog();
        }
    }

    pub async fn shutdown_all(&self) {
        let bots: Vec<Bot> = self
            .bots
            .read()
            .expect("bot list lock poisoned")
            .iter()
            .cloned()
            .collect();
        info!(bots = bots.len(), "logging off fleet");
        for bot in bots {
            bot.shutdown().await;
        }
    }
}
