use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use tokio::time::interval;
use tracing::{info, warn};

use crate::models::DecoratedItem;

pub const DEFAULT_SCHEMA_URL: &str = "https://csfloat.com/api/v1/schema";

const STATTRAK_QUALITY: u32 = 9;

/// Static game metadata fetched from the schema endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct Schema {
    #[serde(default)]
    pub weapons: HashMap<String, WeaponDef>,
    #[serde(default)]
    pub stickers: HashMap<String, String>,
    #[serde(default)]
    pub keychains: HashMap<String, String>,
    #[serde(default)]
    pub rarities: HashMap<String, String>,
    #[serde(default)]
    pub qualities: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WeaponDef {
    pub name: String,
    #[serde(default)]
    pub paints: HashMap<String, PaintDef>,
}

#[derive(Debug, Deserialize)]
pub struct PaintDef {
    pub name: String,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// Wear bucket for a float value, per the standard exterior ranges.
pub fn wear_name(floatvalue: f64) -> &'static str {
    if floatvalue < 0.07 {
        "Factory New"
    } else if floatvalue < 0.15 {
        "Minimal Wear"
    } else if floatvalue < 0.38 {
        "Field-Tested"
    } else if floatvalue < 0.45 {
        "Well-Worn"
    } else {
        "Battle-Scarred"
    }
}

/// Periodically refreshed snapshot of static item metadata.
///
/// A failed refresh keeps serving the previous snapshot; annotation against
/// an empty snapshot simply leaves the enrichment fields unset.
pub struct GameData {
    client: Client,
    url: String,
    schema: RwLock<Arc<Schema>>,
}

impl GameData {
    pub fn new(url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            url: url.into(),
            schema: RwLock::new(Arc::new(Schema::default())),
        }
    }

    #[cfg(test)]
    pub fn with_schema(schema: Schema) -> Self {
        let data = Self::new(DEFAULT_SCHEMA_URL);
        data.install(schema);
        data
    }

    fn install(&self, schema: Schema) {
        *self.schema.write().expect("schema lock poisoned") = Arc::new(schema);
    }

    fn snapshot(&self) -> Arc<Schema> {
        Arc::clone(&self.schema.read().expect("schema lock poisoned"))
    }

    pub async fn refresh(&self) -> Result<()> {
        let schema: Schema = self
            .client
            .get(&self.url)
            .send()
            .await
            .context("failed to fetch game data schema")?
            .error_for_status()
            .context("schema endpoint returned an error status")?
            .json()
            .await
            .context("failed to decode game data schema")?;

        info!(
            weapons = schema.weapons.len(),
            stickers = schema.stickers.len(),
            "game data refreshed"
        );
        self.install(schema);
        Ok(())
    }

    /// Spawn the periodic refresh loop.
    pub fn spawn_refresh_task(self: Arc<Self>, period: Duration) {
        tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                ticker.tick().await;
                if let Err(e) = self.refresh().await {
                    warn!("game data refresh failed, keeping previous snapshot: {e:#}");
                }
            }
        });
    }

    /// Merge static names and wear metadata into a resolved item.
    pub fn annotate(&self, item: &mut DecoratedItem) {
        let schema = self.snapshot();

        item.wear_name = Some(wear_name(item.floatvalue).to_string());

        if let Some(rarity) = schema.rarities.get(&item.rarity.to_string()) {
            item.rarity_name = Some(rarity.clone());
        }
        if let Some(quality) = schema.qualities.get(&item.quality.to_string()) {
            item.quality_name = Some(quality.clone());
        }

        if let Some(weapon) = schema.weapons.get(&item.defindex.to_string()) {
            item.weapon_type = Some(weapon.name.clone());

            if let Some(paint) = weapon.paints.get(&item.paintindex.to_string()) {
                item.item_name = Some(paint.name.clone());
                item.min = paint.min;
                item.max = paint.max;
            }

            item.full_item_name = Some(Self::full_name(item));
        }

        for sticker in &mut item.stickers {
            if let Some(id) = sticker.sticker_id {
                if let Some(name) = schema.stickers.get(&id.to_string()) {
                    sticker.name = Some(name.clone());
                }
            }
        }
        for keychain in &mut item.keychains {
            if let Some(id) = keychain.sticker_id {
                if let Some(name) = schema.keychains.get(&id.to_string()) {
                    keychain.name = Some(name.clone());
                }
            }
        }
    }

    fn full_name(item: &DecoratedItem) -> String {
        let weapon = item.weapon_type.as_deref().unwrap_or_default();
        let mut name = String::new();
        if item.quality == STATTRAK_QUALITY {
            name.push_str("StatTrak\u{2122} ");
        }
        name.push_str(weapon);
        if let Some(paint) = item.item_name.as_deref() {
            name.push_str(" | ");
            name.push_str(paint);
            if let Some(wear) = item.wear_name.as_deref() {
                name.push_str(&format!(" ({wear})"));
            }
        }
        name
    }
}
