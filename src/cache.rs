use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::time::interval;
use tracing::{debug, info};

use crate::models::{DecoratedItem, RankInfo};

pub const DEFAULT_MAX_ENTRIES: usize = 2_000;
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// A cached resolution for one asset id.
#[derive(Debug, Clone)]
pub struct CachedItem {
    pub item: DecoratedItem,
    pub price: Option<u64>,
    inserted_at: Instant,
}

impl CachedItem {
    fn expired(&self, ttl: Duration) -> bool {
        self.inserted_at.elapsed() >= ttl
    }
}

struct CacheInner {
    entries: HashMap<String, CachedItem>,
    /// Insertion order; the front is the next eviction victim.
    order: VecDeque<String>,
}

/// Bounded, TTL'd store of resolved items keyed by asset id, plus the rank
/// side-table.
///
/// Eviction is insertion-order FIFO and happens before an overflowing write.
/// Expired entries are only removed by the periodic sweep; lookups do not
/// check the TTL inline. The rank table is unbounded, has no TTL, and is
/// written by the external game-data pipeline.
pub struct ResultCache {
    inner: Mutex<CacheInner>,
    ranks: DashMap<String, RankInfo>,
    max_entries: usize,
    ttl: Duration,
}

impl ResultCache {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
            ranks: DashMap::new(),
            max_entries: max_entries.max(1),
            ttl,
        }
    }

    /// Look up a batch of asset ids, preserving request order.
    pub fn get_many(&self, asset_ids: &[String]) -> Vec<Option<CachedItem>> {
        let inner = self.inner.lock().expect("cache lock poisoned");
        asset_ids
            .iter()
            .map(|id| inner.entries.get(id).cloned())
            .collect()
    }

    /// Insert a resolved item, overwriting any previous entry for the same
    /// asset and resetting its age. Evicts the oldest entry first when full.
    pub fn insert(&self, item: DecoratedItem, price: Option<u64>) {
        let asset_id = item.a.clone();
        let mut inner = self.inner.lock().expect("cache lock poisoned");

        if inner.entries.contains_key(&asset_id) {
            inner.order.retain(|k| *k != asset_id);
        } else if inner.entries.len() >= self.max_entries {
            if let Some(victim) = inner.order.pop_front() {
                inner.entries.remove(&victim);
                debug!(asset_id = %victim, "cache full, evicted oldest entry");
            }
        }

        inner.order.push_back(asset_id.clone());
        inner.entries.insert(
            asset_id,
            CachedItem {
                item,
                price,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Attach a price to an already-cached asset. No-op when absent.
    pub fn update_price(&self, asset_id: &str, price: u64) -> bool {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        match inner.entries.get_mut(asset_id) {
            Some(entry) => {
                entry.price = Some(price);
                entry.item.price = Some(price);
                true
            }
            None => false,
        }
    }

    pub fn get_rank(&self, asset_id: &str) -> RankInfo {
        self.ranks
            .get(asset_id)
            .map(|r| *r.value())
            .unwrap_or_default()
    }

    pub fn set_rank(&self, asset_id: String, rank: RankInfo) {
        self.ranks.insert(asset_id, rank);
    }

    /// Drop entries older than the TTL. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        let ttl = self.ttl;
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| !entry.expired(ttl));
        let removed = before - inner.entries.len();
        if removed > 0 {
            let entries = &inner.entries;
            // keep the order queue consistent with the surviving keys
            let survivors: Vec<String> = inner
                .order
                .iter()
                .filter(|k| entries.contains_key(*k))
                .cloned()
                .collect();
            inner.order = survivors.into();
            info!(removed, "cache sweep removed expired entries");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawn the periodic TTL sweep.
    pub fn spawn_cleanup_task(self: Arc<Self>, period: Duration) {
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.tick().await; // immediate first tick is not a sweep
            loop {
                ticker.tick().await;
                self.cleanup_expired();
            }
        });
    }
}
