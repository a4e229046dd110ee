//! In-memory collaborators for driving the lifecycle without a game server
//! or a socket.

use crate::bridge::Notifier;
use crate::collab::{
    BotConnection, ConnectOptions, Connector, OnClosed, ViewerLauncher, ViewerServer,
};
use crate::config::{ServerAddress, ViewerConfig};
use crate::error::{EngineError, Result};
use crate::event::{SessionId, SessionSink};
use botview_protocol::{UiNotification, WorldSnapshot};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Clone)]
pub struct OpenRecord {
    pub session: SessionId,
    pub target: ServerAddress,
    pub username: String,
    pub options: ConnectOptions,
    pub sink: SessionSink,
}

#[derive(Debug, Default)]
struct ConnectorState {
    opened: Vec<OpenRecord>,
    ended: Vec<(SessionId, String)>,
    live: usize,
    fail_with: Option<String>,
    panic_with: Option<String>,
}

/// Records every `open` and counts connection handles still alive.
#[derive(Debug, Clone, Default)]
pub struct FakeConnector {
    state: Arc<Mutex<ConnectorState>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, message: impl Into<String>) {
        lock(&self.state).fail_with = Some(message.into());
    }

    pub fn panic_next(&self, message: impl Into<String>) {
        lock(&self.state).panic_with = Some(message.into());
    }

    pub fn opened(&self) -> Vec<OpenRecord> {
        lock(&self.state).opened.clone()
    }

    pub fn last_session(&self) -> Option<SessionId> {
        lock(&self.state).opened.last().map(|r| r.session)
    }

    /// `end(reason)` calls made on handles, in order.
    pub fn ended(&self) -> Vec<(SessionId, String)> {
        lock(&self.state).ended.clone()
    }

    pub fn live(&self) -> usize {
        lock(&self.state).live
    }
}

impl Connector for FakeConnector {
    fn open(
        &self,
        target: &ServerAddress,
        username: &str,
        options: &ConnectOptions,
        events: SessionSink,
    ) -> Result<Box<dyn BotConnection>> {
        let mut state = lock(&self.state);
        if let Some(message) = state.panic_with.take() {
            drop(state);
            panic!("{message}");
        }
        if let Some(message) = state.fail_with.take() {
            return Err(EngineError::Connect(message));
        }
        let session = events.session();
        state.opened.push(OpenRecord {
            session,
            target: target.clone(),
            username: username.to_string(),
            options: options.clone(),
            sink: events,
        });
        state.live += 1;
        let (world, _) = watch::channel(WorldSnapshot::new(username));
        Ok(Box::new(FakeConnection {
            session,
            state: self.state.clone(),
            world,
        }))
    }
}

pub struct FakeConnection {
    session: SessionId,
    state: Arc<Mutex<ConnectorState>>,
    world: watch::Sender<WorldSnapshot>,
}

impl BotConnection for FakeConnection {
    fn end(&mut self, reason: &str) {
        lock(&self.state).ended.push((self.session, reason.to_string()));
    }

    fn world(&self) -> watch::Receiver<WorldSnapshot> {
        self.world.subscribe()
    }
}

impl Drop for FakeConnection {
    fn drop(&mut self) {
        lock(&self.state).live -= 1;
    }
}

#[derive(Default)]
struct LauncherState {
    starts: Vec<SessionId>,
    live: usize,
    hold_close: bool,
    pending: Vec<(SessionId, OnClosed)>,
    fail_with: Option<String>,
}

/// Viewer launcher whose servers close immediately unless told to hold.
#[derive(Clone, Default)]
pub struct FakeLauncher {
    state: Arc<Mutex<LauncherState>>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep close callbacks pending until [`FakeLauncher::finish_closes`].
    pub fn hold_closes(&self) {
        lock(&self.state).hold_close = true;
    }

    pub fn finish_closes(&self) {
        let pending = std::mem::take(&mut lock(&self.state).pending);
        for (_, on_closed) in pending {
            lock(&self.state).live -= 1;
            on_closed();
        }
    }

    pub fn fail_next(&self, message: impl Into<String>) {
        lock(&self.state).fail_with = Some(message.into());
    }

    pub fn starts(&self) -> Vec<SessionId> {
        lock(&self.state).starts.clone()
    }

    pub fn live(&self) -> usize {
        lock(&self.state).live
    }
}

impl ViewerLauncher for FakeLauncher {
    fn start(
        &self,
        _bot: &dyn BotConnection,
        _options: &ViewerConfig,
        events: SessionSink,
    ) -> Result<Box<dyn ViewerServer>> {
        let mut state = lock(&self.state);
        state.starts.push(events.session());
        if let Some(message) = state.fail_with.take() {
            return Err(EngineError::ViewerStart(message));
        }
        state.live += 1;
        Ok(Box::new(FakeViewerServer {
            session: events.session(),
            state: self.state.clone(),
        }))
    }
}

struct FakeViewerServer {
    session: SessionId,
    state: Arc<Mutex<LauncherState>>,
}

impl ViewerServer for FakeViewerServer {
    fn close(self: Box<Self>, on_closed: OnClosed) {
        let mut state = lock(&self.state);
        if state.hold_close {
            state.pending.push((self.session, on_closed));
            return;
        }
        state.live -= 1;
        drop(state);
        on_closed();
    }
}

/// Collects every notification sent to the UI.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    seen: Arc<Mutex<Vec<UiNotification>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<UiNotification> {
        std::mem::take(&mut *lock(&self.seen))
    }

    pub fn seen(&self) -> Vec<UiNotification> {
        lock(&self.seen).clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: UiNotification) {
        lock(&self.seen).push(notification);
    }
}
