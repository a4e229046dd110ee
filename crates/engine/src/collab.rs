//! Seams to the external game-protocol and rendering collaborators.

use crate::config::{AuthMode, ServerAddress, ViewerConfig};
use crate::error::Result;
use crate::event::SessionSink;
use botview_protocol::WorldSnapshot;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub version: String,
    pub check_timeout: Duration,
    pub auth: AuthMode,
    pub hide_errors: bool,
}

/// A live game-client connection.
///
/// Events (`login`, `spawn`, `error`, `kicked`, `end`) are reported through
/// the [`SessionSink`] given to [`Connector::open`].
pub trait BotConnection: Send {
    /// Graceful close. Fire-and-forget: the remote end is not awaited.
    fn end(&mut self, reason: &str);

    /// Live view of the bot's world for the viewer.
    fn world(&self) -> watch::Receiver<WorldSnapshot>;
}

pub trait Connector: Send + Sync {
    /// Start connecting. Must not block on network completion.
    fn open(
        &self,
        target: &ServerAddress,
        username: &str,
        options: &ConnectOptions,
        events: SessionSink,
    ) -> Result<Box<dyn BotConnection>>;
}

pub type OnClosed = Box<dyn FnOnce() + Send>;

/// Handle to a running viewer server.
///
/// `listening`, `error` and `client` are reported through the sink given to
/// [`ViewerLauncher::start`].
pub trait ViewerServer: Send {
    /// Stop serving; `on_closed` runs once the socket is released.
    fn close(self: Box<Self>, on_closed: OnClosed);
}

pub trait ViewerLauncher: Send + Sync {
    fn start(
        &self,
        bot: &dyn BotConnection,
        options: &ViewerConfig,
        events: SessionSink,
    ) -> Result<Box<dyn ViewerServer>>;
}
