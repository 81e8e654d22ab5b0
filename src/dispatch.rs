use std::sync::Arc;

use async_trait::async_trait;

use crate::cache::ResultCache;
use crate::queue::{EntryHandler, HandlerError, HandlerSuccess, QueueEntry};
use crate::steam::{BotController, BotError, InspectOutcome};

/// Bridges the scheduler to the bot fleet: resolves one entry through a
/// ready bot, finishes the decoration (rank, price), caches the result and
/// records it on the owning job.
pub struct InspectDispatcher {
    controller: Arc<BotController>,
    cache: Arc<ResultCache>,
}

impl InspectDispatcher {
    pub fn new(controller: Arc<BotController>, cache: Arc<ResultCache>) -> Self {
        Self { controller, cache }
    }
}

#[async_trait]
impl EntryHandler for InspectDispatcher {
    async fn handle(&self, entry: &QueueEntry) -> Result<HandlerSuccess, HandlerError> {
        match self.controller.lookup_float(entry.link.clone()).await {
            Ok(InspectOutcome { mut item, delay }) => {
                item.apply_rank(self.cache.get_rank(&entry.link.a));
                if let Some(price) = entry.price {
                    item.price = Some(price);
                }
                self.cache.insert(item.clone(), entry.price);
                entry.job.set_response(&entry.link.a, Ok(item));
                Ok(HandlerSuccess { delay })
            }
            Err(BotError::NotReady) => Err(HandlerError::NoBotsAvailable),
            Err(err) => Err(HandlerError::Failed(err.to_string())),
        }
    }
}
