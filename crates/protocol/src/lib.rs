use serde::{Deserialize, Serialize};

mod view;

pub use view::{ConnectionView, FrameAction, SubmitError};

pub const DEFAULT_VIEWER_PORT: u16 = 3000;

/// URL the embedded viewer is reachable on.
pub fn viewer_url(port: u16) -> String {
    format!("http://localhost:{port}")
}

/// Inbound UI command: spawn a bot for `username` on `host`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartBot {
    pub username: String,
    pub host: String,
}

impl StartBot {
    pub fn new(username: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            host: host.into(),
        }
    }

    pub fn validate(&self) -> Result<(), SubmitError> {
        if self.username.trim().is_empty() || self.host.trim().is_empty() {
            return Err(SubmitError::MissingFields);
        }
        Ok(())
    }
}

/// Outbound notification. These two are the whole core -> UI surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "channel", content = "payload", rename_all = "kebab-case")]
pub enum UiNotification {
    ViewerReady { url: String },
    BotError { message: String },
}

impl UiNotification {
    pub fn viewer_ready(url: impl Into<String>) -> Self {
        Self::ViewerReady { url: url.into() }
    }

    pub fn bot_error(message: impl Into<String>) -> Self {
        Self::BotError {
            message: message.into(),
        }
    }

    pub fn channel(&self) -> &'static str {
        match self {
            Self::ViewerReady { .. } => channels::VIEWER_READY,
            Self::BotError { .. } => channels::BOT_ERROR,
        }
    }

    /// The string carried on the channel (URL or error message).
    pub fn payload(&self) -> &str {
        match self {
            Self::ViewerReady { url } => url,
            Self::BotError { message } => message,
        }
    }
}

pub mod channels {
    pub const START_BOT: &str = "start_bot";
    pub const VIEWER_READY: &str = "viewer-ready";
    pub const BOT_ERROR: &str = "bot-error";
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.1}, {:.1}, {:.1})", self.x, self.y, self.z)
    }
}

/// What the viewer knows about the bot's world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default)]
    pub spawned: bool,
}

impl WorldSnapshot {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            position: None,
            spawned: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_wire_shape() {
        let n = UiNotification::viewer_ready(viewer_url(3000));
        let v = serde_json::to_value(&n).unwrap();
        assert_eq!(v["channel"], "viewer-ready");
        assert_eq!(v["payload"]["url"], "http://localhost:3000");
        assert_eq!(n.payload(), "http://localhost:3000");

        let e = UiNotification::bot_error("boom");
        assert_eq!(e.channel(), channels::BOT_ERROR);
    }

    #[test]
    fn start_bot_rejects_blank_fields() {
        assert!(StartBot::new("Bob", "example.com").validate().is_ok());
        assert_eq!(
            StartBot::new("  ", "example.com").validate(),
            Err(SubmitError::MissingFields)
        );
        assert!(StartBot::new("Bob", "").validate().is_err());
    }
}
