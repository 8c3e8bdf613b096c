// ============================
// crates/backend-lib/src/config.rs
// ============================
//! Configuration management.
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "chatwire.toml";
/// Environment variable prefix; nested keys are split on `__`
pub const ENV_PREFIX: &str = "CHATWIRE_";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Server bind address
    pub bind_addr: SocketAddr,
    /// Data directory path
    pub data_dir: PathBuf,
    /// Log level
    pub log_level: String,
    /// Reserved user id answered by the built-in bot
    pub bot_user_id: Option<String>,
    pub realtime: RealtimeSettings,
    pub auth: AuthSettings,
}

/// Socket timing and sizing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RealtimeSettings {
    /// Per-session outbound backlog, in frames
    pub outbound_queue_capacity: usize,
    /// Largest inbound frame accepted
    pub max_frame_bytes: usize,
    /// Read deadline, refreshed on every pong
    pub pong_wait_ms: u64,
    /// Keep-alive ping period; must be shorter than `pong_wait_ms`
    pub ping_period_ms: u64,
    /// Deadline for each outbound write
    pub write_wait_ms: u64,
    /// Characters of content carried in offline push previews
    pub preview_chars: usize,
}

/// Bearer token settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuthSettings {
    /// Pre-provisioned tokens, keyed by token value
    pub static_tokens: HashMap<String, TokenGrant>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenGrant {
    pub user_id: String,
    pub username: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 3000)),
            data_dir: PathBuf::from("data"),
            log_level: "info".to_string(),
            bot_user_id: None,
            realtime: RealtimeSettings::default(),
            auth: AuthSettings::default(),
        }
    }
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: 256,
            max_frame_bytes: 64 * 1024,
            pong_wait_ms: 60_000,
            ping_period_ms: 54_000,
            write_wait_ms: 10_000,
            preview_chars: 100,
        }
    }
}

impl RealtimeSettings {
    pub fn pong_wait(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms)
    }

    pub fn ping_period(&self) -> Duration {
        Duration::from_millis(self.ping_period_ms)
    }

    pub fn write_wait(&self) -> Duration {
        Duration::from_millis(self.write_wait_ms)
    }
}

impl Settings {
    /// Load settings from `chatwire.toml` (if present) and the environment
    pub fn load() -> Result<Self, AppError> {
        Self::from_figment(Self::figment(Path::new(DEFAULT_CONFIG_FILE)))
    }

    /// Load settings from an explicit file, still honouring the environment
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, AppError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(AppError::Config(format!(
                "config file {} does not exist",
                path.display()
            )));
        }
        Self::from_figment(Self::figment(path))
    }

    /// Defaults, then the TOML file, then `CHATWIRE_*` variables
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    fn from_figment(figment: Figment) -> Result<Self, AppError> {
        let settings: Settings = figment.extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings the server cannot run with
    pub fn validate(&self) -> Result<(), AppError> {
        if !LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(AppError::Config(format!(
                "unknown log level `{}`",
                self.log_level
            )));
        }

        let rt = &self.realtime;
        if rt.outbound_queue_capacity == 0 {
            return Err(AppError::Config(
                "realtime.outbound_queue_capacity must be positive".to_string(),
            ));
        }
        if rt.max_frame_bytes == 0 {
            return Err(AppError::Config(
                "realtime.max_frame_bytes must be positive".to_string(),
            ));
        }
        if rt.write_wait_ms == 0 || rt.ping_period_ms == 0 {
            return Err(AppError::Config(
                "realtime timings must be positive".to_string(),
            ));
        }
        if rt.ping_period_ms >= rt.pong_wait_ms {
            return Err(AppError::Config(
                "realtime.ping_period_ms must be shorter than realtime.pong_wait_ms".to_string(),
            ));
        }

        if self.bot_user_id.as_deref() == Some("") {
            return Err(AppError::Config("bot_user_id must not be empty".to_string()));
        }

        if let Some((token, _)) = self
            .auth
            .static_tokens
            .iter()
            .find(|(token, grant)| token.is_empty() || grant.user_id.is_empty())
        {
            return Err(AppError::Config(format!(
                "static token `{token}` needs a token value and a user_id"
            )));
        }

        Ok(())
    }
}
