use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use url::Url;

use crate::game_data::DEFAULT_SCHEMA_URL;
use crate::steam::bot::BotSettings;
use crate::steam::gc::SteamCredential;

/// Resolves inspect links through a fleet of game-coordinator bots.
#[derive(Debug, Parser)]
#[command(name = "cs-inspect-backend", version, about)]
pub struct Cli {
    /// Path to the TOML configuration file
    #[arg(short = 'c', long, default_value = "./config.toml")]
    pub config: PathBuf,

    /// Directory for per-account Steam guard data; overrides
    /// `bot_settings.steam_data_dir`
    #[arg(short = 's', long = "steam-data", alias = "steam_data")]
    pub steam_data: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginConfig {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub shared_secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BotSettingsConfig {
    pub request_delay_ms: u64,
    pub request_ttl_ms: u64,
    pub max_concurrent_requests: u32,
    pub connection_timeout_ms: u64,
    pub login_retry_delay_ms: u64,
    pub gc_reconnect_delay_ms: u64,
    pub max_login_attempts: u32,
    pub relog_interval_mins: u64,
    pub local_queue_limit: usize,
    pub steam_data_dir: Option<PathBuf>,
}

impl Default for BotSettingsConfig {
    fn default() -> Self {
        let defaults = BotSettings::default();
        Self {
            request_delay_ms: defaults.request_delay.as_millis() as u64,
            request_ttl_ms: defaults.request_ttl.as_millis() as u64,
            max_concurrent_requests: defaults.max_concurrent_requests,
            connection_timeout_ms: defaults.connection_timeout.as_millis() as u64,
            login_retry_delay_ms: defaults.login_retry_delay.as_millis() as u64,
            gc_reconnect_delay_ms: defaults.gc_reconnect_delay.as_millis() as u64,
            max_login_attempts: defaults.max_login_attempts,
            relog_interval_mins: defaults.relog_interval.as_secs() / 60,
            local_queue_limit: defaults.local_queue_limit,
            steam_data_dir: None,
        }
    }
}

impl BotSettingsConfig {
    pub fn to_settings(&self) -> BotSettings {
        BotSettings {
            request_delay: Duration::from_millis(self.request_delay_ms),
            request_ttl: Duration::from_millis(self.request_ttl_ms),
            max_concurrent_requests: self.max_concurrent_requests,
            connection_timeout: Duration::from_millis(self.connection_timeout_ms),
            login_retry_delay: Duration::from_millis(self.login_retry_delay_ms),
            gc_reconnect_delay: Duration::from_millis(self.gc_reconnect_delay_ms),
            max_login_attempts: self.max_login_attempts,
            relog_interval: Duration::from_secs(self.relog_interval_mins * 60),
            relog_jitter_max: BotSettings::default().relog_jitter_max,
            local_queue_limit: self.local_queue_limit,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub enable: bool,
    pub window_ms: u64,
    pub max: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enable: false,
            window_ms: 60_000,
            max: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub max_entries: usize,
    pub ttl_secs: u64,
    pub cleanup_interval_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_entries: 2_000,
            ttl_secs: 60 * 60,
            cleanup_interval_secs: 15 * 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logins: Vec<LoginConfig>,
    /// Prefixed `http://` or `socks5://`; assigned round-robin to logins.
    pub proxies: Vec<String>,
    pub bot_settings: BotSettingsConfig,
    pub api_key: Option<String>,
    pub price_key: Option<String>,
    pub max_simultaneous_requests: usize,
    pub max_queue_size: usize,
    /// Dispatch attempts per queue entry before it fails terminally.
    pub max_attempts: u32,
    pub allowed_origins: Vec<String>,
    pub allowed_regex_origins: Vec<String>,
    pub trust_proxy: bool,
    pub rate_limit: RateLimitSettings,
    pub http: HttpConfig,
    pub log_level: String,
    pub enable_game_file_updates: bool,
    pub game_files_update_interval_secs: u64,
    pub game_files_url: String,
    pub cache: CacheSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logins: Vec::new(),
            proxies: Vec::new(),
            bot_settings: BotSettingsConfig::default(),
            api_key: None,
            price_key: None,
            max_simultaneous_requests: 1,
            max_queue_size: 500,
            max_attempts: 3,
            allowed_origins: Vec::new(),
            allowed_regex_origins: Vec::new(),
            trust_proxy: false,
            rate_limit: RateLimitSettings::default(),
            http: HttpConfig::default(),
            log_level: "info".to_string(),
            enable_game_file_updates: true,
            game_files_update_interval_secs: 60 * 60,
            game_files_url: DEFAULT_SCHEMA_URL.to_string(),
            cache: CacheSettings::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Validate the parts the process cannot run without. Errors are
    /// accumulated so the operator sees everything at once.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.logins.is_empty() {
            errors.push("no logins configured".to_string());
        }
        for (index, login) in self.logins.iter().enumerate() {
            if login.username.is_empty() || login.password.is_empty() {
                errors.push(format!("login #{index} is missing username or password"));
            }
        }
        for proxy in &self.proxies {
            match Url::parse(proxy) {
                Ok(url) if matches!(url.scheme(), "http" | "socks5") => {}
                Ok(url) => errors.push(format!(
                    "proxy '{proxy}' must use http:// or socks5://, got {}://",
                    url.scheme()
                )),
                Err(e) => errors.push(format!("malformed proxy '{proxy}': {e}")),
            }
        }
        for pattern in &self.allowed_regex_origins {
            if let Err(e) = regex::Regex::new(pattern) {
                errors.push(format!("invalid origin regex '{pattern}': {e}"));
            }
        }
        if self.rate_limit.enable && self.rate_limit.max == 0 {
            errors.push("rate_limit.max must be positive when enabled".to_string());
        }
        if self.max_simultaneous_requests == 0 {
            errors.push("max_simultaneous_requests must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("configuration errors:\n  - {}", errors.join("\n  - "))
        }
    }

    /// Build one credential per login, with proxies assigned round-robin
    /// and the optional CLI override for the guard-data directory applied.
    pub fn credentials(&self, steam_data_override: Option<&Path>) -> Result<Vec<SteamCredential>> {
        let proxies: Vec<Url> = self
            .proxies
            .iter()
            .map(|p| Url::parse(p).with_context(|| format!("malformed proxy '{p}'")))
            .collect::<Result<_>>()?;
        let data_dir = steam_data_override
            .map(Path::to_path_buf)
            .or_else(|| self.bot_settings.steam_data_dir.clone());

        Ok(self
            .logins
            .iter()
            .enumerate()
            .map(|(index, login)| SteamCredential {
                username: login.username.clone(),
                password: login.password.clone(),
                shared_secret: login.shared_secret.clone(),
                proxy: (!proxies.is_empty()).then(|| proxies[index % proxies.len()].clone()),
                data_dir: data_dir.clone(),
            })
            .collect())
    }
}
