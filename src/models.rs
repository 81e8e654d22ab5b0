use serde::{Deserialize, Serialize};

/// One applied sticker or keychain slot, as echoed by the game coordinator
/// plus the name merged in from the static schema.
///
/// `None` fields are stripped from the serialized response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sticker {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot: Option<u32>,
    #[serde(rename = "stickerId", skip_serializing_if = "Option::is_none")]
    pub sticker_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wear: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tint_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset_x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset_y: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset_z: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Rank metadata for an asset, maintained externally and merged into
/// responses when present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low_rank: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high_rank: Option<u32>,
}

/// The fully decorated item record returned to HTTP callers.
///
/// `a`, `d`, `s` and `m` are always stamped from the originating request,
/// never from what the coordinator echoes. `paintseed` is coerced to 0 when
/// the coordinator omits it, and the raw `paintwear` never appears here; it
/// arrives already converted to `floatvalue`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecoratedItem {
    pub s: String,
    pub a: String,
    pub d: String,
    pub m: String,

    pub floatvalue: f64,
    pub paintseed: u32,
    pub paintindex: u32,
    pub defindex: u32,
    pub rarity: u32,
    pub quality: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub accountid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub itemid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub killeaterscoretype: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub killeatervalue: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inventory: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub questid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dropreason: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub musicindex: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entindex: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub petindex: Option<u32>,

    pub stickers: Vec<Sticker>,
    pub keychains: Vec<Sticker>,

    // Static-schema enrichment, absent until the game data snapshot knows
    // the (defindex, paintindex) pair.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weapon_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_item_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rarity_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wear_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub low_rank: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high_rank: Option<u32>,
}

impl DecoratedItem {
    pub fn apply_rank(&mut self, rank: RankInfo) {
        if rank.low_rank.is_some() {
            self.low_rank = rank.low_rank;
        }
        if rank.high_rank.is_some() {
            self.high_rank = rank.high_rank;
        }
    }
}
