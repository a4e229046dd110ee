use crate::collab::ConnectOptions;
use crate::error::{EngineError, Result};
use botview_protocol::DEFAULT_VIEWER_PORT;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Everything the core needs, loaded from `~/.botview/config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub bot: BotConfig,
    pub viewer: ViewerConfig,
    pub client: ClientConfig,
}

impl EngineConfig {
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".botview")
            .join("config.yaml")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw).map_err(|source| EngineError::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load the default config file; a missing file means defaults.
    pub fn load_or_default() -> Result<Self> {
        let path = Self::default_path();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        Self::load(&path)
    }

    pub fn from_yaml(raw: &str) -> std::result::Result<Self, serde_yaml::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    Microsoft,
    Offline,
}

impl Default for AuthMode {
    fn default() -> Self {
        Self::Microsoft
    }
}

impl AuthMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Microsoft => "microsoft",
            Self::Offline => "offline",
        }
    }
}

/// Protocol-level parameters every new connection is opened with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub version: String,
    pub check_timeout_ms: u64,
    pub auth: AuthMode,
    pub hide_errors: bool,
    pub default_port: u16,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            version: "1.21.8".to_string(),
            check_timeout_ms: 60_000,
            auth: AuthMode::Microsoft,
            hide_errors: false,
            default_port: 25565,
        }
    }
}

impl BotConfig {
    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            version: self.version.clone(),
            check_timeout: Duration::from_millis(self.check_timeout_ms),
            auth: self.auth,
            hide_errors: self.hide_errors,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub port: u16,
    pub first_person: bool,
    pub view_distance: u32,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_VIEWER_PORT,
            first_person: false,
            view_distance: 6,
        }
    }
}

/// External game client driven over stdio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            program: "node".to_string(),
            args: vec!["bot.js".to_string()],
        }
    }
}

/// A game server target parsed from user input (`host`, `host:port`, `[v6]:port`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
}

impl ServerAddress {
    pub fn parse(input: &str, default_port: u16) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(EngineError::InvalidRequest(
                "host must not be empty".to_string(),
            ));
        }

        let (host, port) = if let Some(rest) = input.strip_prefix('[') {
            let Some((host, after)) = rest.split_once(']') else {
                return Err(EngineError::InvalidRequest(format!(
                    "unterminated IPv6 address: {input}"
                )));
            };
            match after.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None if after.is_empty() => (host, None),
                None => {
                    return Err(EngineError::InvalidRequest(format!(
                        "unexpected text after address: {input}"
                    )))
                }
            }
        } else {
            match input.split_once(':') {
                // A bare IPv6 address has several colons and no port.
                Some((host, port)) if !port.contains(':') => (host, Some(port)),
                _ => (input, None),
            }
        };

        if host.is_empty() {
            return Err(EngineError::InvalidRequest(format!("missing host in {input}")));
        }
        let port = match port {
            Some(p) => p
                .parse::<u16>()
                .map_err(|_| EngineError::InvalidRequest(format!("invalid port: {p}")))?,
            None => default_port,
        };
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
