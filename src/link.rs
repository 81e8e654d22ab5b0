use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::ApiError;

/// Canonical form of an inspect link.
///
/// Exactly one of `s` (owner steamid) or `m` (market listing id) is non-"0";
/// `a` is the asset id and `d` an opaque decimal token. All four fields are
/// decimal strings and equality is by tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InspectLink {
    pub s: String,
    pub a: String,
    pub d: String,
    pub m: String,
}

fn link_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^steam://rungame/730/\d+/\+csgo_econ_action_preview ([SM])(\d+)A(\d+)D(\d+)$")
            .expect("inspect link regex is valid")
    })
}

fn is_decimal(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}

impl InspectLink {
    /// Parse the `steam://` URL form. The `%20` between the action and the
    /// parameter block may be literal or percent-encoded.
    pub fn parse_url(url: &str) -> Result<Self, ApiError> {
        let decoded = urlencoding::decode(url).map_err(|_| ApiError::InvalidInspect)?;
        let caps = link_regex()
            .captures(decoded.trim())
            .ok_or(ApiError::InvalidInspect)?;

        let owner = caps[2].to_string();
        let (s, m) = match &caps[1] {
            "S" => (owner, "0".to_string()),
            _ => ("0".to_string(), owner),
        };

        Self::build(s, caps[3].to_string(), caps[4].to_string(), m)
    }

    /// Build a link from the structured `{a, d, s?|m?}` request form.
    pub fn from_parts(
        a: &str,
        d: &str,
        s: Option<&str>,
        m: Option<&str>,
    ) -> Result<Self, ApiError> {
        let s = s.filter(|v| *v != "0");
        let m = m.filter(|v| *v != "0");
        match (s, m) {
            (Some(s), None) => Self::build(s.to_string(), a.to_string(), d.to_string(), "0".into()),
            (None, Some(m)) => Self::build("0".into(), a.to_string(), d.to_string(), m.to_string()),
            _ => Err(ApiError::InvalidInspect),
        }
    }

    fn build(s: String, a: String, d: String, m: String) -> Result<Self, ApiError> {
        let link = Self { s, a, d, m };
        if !is_decimal(&link.a) || !is_decimal(&link.d) {
            return Err(ApiError::InvalidInspect);
        }
        if !is_decimal(&link.s) || !is_decimal(&link.m) {
            return Err(ApiError::InvalidInspect);
        }
        // exactly one side carries an id
        if (link.s == "0") == (link.m == "0") {
            return Err(ApiError::InvalidInspect);
        }
        Ok(link)
    }

    pub fn is_market_link(&self) -> bool {
        self.s == "0"
    }

    /// The wire `param_s`/`param_m` value: whichever side is non-"0".
    pub fn owner(&self) -> &str {
        if self.is_market_link() {
            &self.m
        } else {
            &self.s
        }
    }
}

impl fmt::Display for InspectLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (tag, owner) = if self.is_market_link() {
            ('M', &self.m)
        } else {
            ('S', &self.s)
        };
        write!(
            f,
            "steam://rungame/730/76561202255233023/+csgo_econ_action_preview {tag}{owner}A{}D{}",
            self.a, self.d
        )
    }
}
