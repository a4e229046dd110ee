use crate::collab::{BotConnection, Connector};
use crate::config::{BotConfig, ServerAddress};
use crate::error::{EngineError, Result};
use crate::event::{
    ConnectionEvent, DomainEvent, EventSink, SessionEvent, SessionEventKind, SessionId,
    ViewerSignal,
};
use crate::relay::Relay;
use crate::viewer::{ViewerEndpoint, ViewerLifecycleAdapter};
use botview_protocol::Position;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Connecting,
    LoggedIn,
    Spawned,
    ViewerStarting,
    ViewerReady,
    Error,
    Ended,
}

struct BotSession {
    id: SessionId,
    username: String,
    target: ServerAddress,
    phase: Phase,
    connection: Option<Box<dyn BotConnection>>,
    endpoint: Option<ViewerEndpoint>,
    /// Set once the launcher was asked for a viewer, whatever the outcome.
    viewer_attempted: bool,
    kicked: Option<String>,
}

/// Owns at most one bot session and, through the viewer adapter, at most
/// one viewer bound to the configured port.
pub struct BotLifecycleManager {
    config: BotConfig,
    connector: Arc<dyn Connector>,
    viewer: ViewerLifecycleAdapter,
    sink: EventSink,
    events: Relay<DomainEvent>,
    session: Option<BotSession>,
    /// Viewers this manager released whose close is still unconfirmed.
    closing: HashSet<SessionId>,
    /// Session whose viewer start waits for the port to be released.
    deferred_viewer: Option<SessionId>,
}

impl BotLifecycleManager {
    pub fn new(
        config: BotConfig,
        connector: Arc<dyn Connector>,
        viewer: ViewerLifecycleAdapter,
        sink: EventSink,
    ) -> Self {
        Self {
            config,
            connector,
            viewer,
            sink,
            events: Relay::new(),
            session: None,
            closing: HashSet::new(),
            deferred_viewer: None,
        }
    }

    pub fn events_mut(&mut self) -> &mut Relay<DomainEvent> {
        &mut self.events
    }

    pub fn phase(&self) -> Phase {
        self.session.as_ref().map_or(Phase::Idle, |s| s.phase)
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(|s| s.id)
    }

    pub fn has_viewer(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.endpoint.is_some())
    }

    pub fn viewer_url(&self) -> String {
        self.viewer.url()
    }

    pub fn has_pending_closes(&self) -> bool {
        self.viewer.has_pending_closes()
    }

    /// Hand back the viewer adapter so a successor manager keeps track of
    /// closes still in flight on the port.
    pub fn into_viewer_adapter(self) -> ViewerLifecycleAdapter {
        self.viewer
    }

    /// Tear down whatever session exists, then open a new connection.
    ///
    /// Returns as soon as the connector accepted the request; login, spawn
    /// and failures arrive later as events.
    pub fn create_bot(&mut self, username: &str, host: &str) -> Result<SessionId> {
        self.end_session("Recreate bot");
        self.session = None;

        let username = username.trim();
        if username.is_empty() {
            return Err(EngineError::InvalidRequest(
                "username must not be empty".to_string(),
            ));
        }
        let target = ServerAddress::parse(host, self.config.default_port)?;

        let id = SessionId::next();
        tracing::info!(session = %id, %username, %target, "creating bot");
        let connection = self.connector.open(
            &target,
            username,
            &self.config.connect_options(),
            self.sink.for_session(id),
        )?;

        self.session = Some(BotSession {
            id,
            username: username.to_string(),
            target,
            phase: Phase::Connecting,
            connection: Some(connection),
            endpoint: None,
            viewer_attempted: false,
            kicked: None,
        });
        Ok(id)
    }

    /// Manual teardown. Safe to call any number of times.
    pub fn destroy(&mut self) {
        self.end_session("Manual destroy");
    }

    pub fn handle(&mut self, event: SessionEvent) {
        let SessionEvent { session, kind } = event;
        match kind {
            SessionEventKind::ViewerClosed => self.on_viewer_closed(session),
            _ if self.session_id() != Some(session) => {
                tracing::debug!(%session, "dropping event from superseded session");
            }
            SessionEventKind::Connection(event) => self.on_connection(event),
            SessionEventKind::Viewer(signal) => self.on_viewer_signal(signal),
        }
    }

    fn on_connection(&mut self, event: ConnectionEvent) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.phase == Phase::Ended {
            tracing::debug!(session = %session.id, ?event, "ignoring event after end");
            return;
        }

        match event {
            ConnectionEvent::Login => {
                tracing::info!(
                    session = %session.id,
                    username = %session.username,
                    "bot logged in"
                );
                session.phase = Phase::LoggedIn;
                let username = session.username.clone();
                self.events.emit(&DomainEvent::BotLogin { username });
            }
            ConnectionEvent::Spawn { position } => {
                log_spawn(session.id, position);
                if session.viewer_attempted || self.deferred_viewer == Some(session.id) {
                    tracing::debug!(session = %session.id, "respawn, viewer already started");
                    return;
                }
                session.phase = Phase::Spawned;
                self.start_viewer();
            }
            ConnectionEvent::Error { message } => {
                tracing::error!(session = %session.id, "bot error: {message}");
                session.phase = Phase::Error;
                self.events.emit(&DomainEvent::BotError {
                    message: format!("Bot error: {message}"),
                });
            }
            ConnectionEvent::Kicked { reason } => {
                tracing::warn!(session = %session.id, "bot kicked: {reason}");
                session.kicked = Some(reason.clone());
                self.events.emit(&DomainEvent::BotKicked {
                    reason: format!("Kicked from server: {reason}"),
                });
            }
            ConnectionEvent::End { reason } => {
                // The remote side is gone; there is nothing to end().
                session.connection = None;
                let reason = match session.kicked.as_deref() {
                    Some(kick) if !reason.contains(kick) => format!("{reason} ({kick})"),
                    _ => reason,
                };
                self.end_session(&reason);
            }
        }
    }

    fn start_viewer(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !self.viewer.port_available() {
            tracing::info!(session = %session.id, "viewer port still closing, deferring start");
            self.deferred_viewer = Some(session.id);
            return;
        }
        self.deferred_viewer = None;
        let Some(connection) = session.connection.as_deref() else {
            return;
        };

        session.phase = Phase::ViewerStarting;
        session.viewer_attempted = true;
        match self.viewer.start(connection, self.sink.for_session(session.id)) {
            Ok(endpoint) => session.endpoint = Some(endpoint),
            Err(e) => {
                let message = e.to_string();
                tracing::error!(session = %session.id, "{message}");
                session.phase = Phase::Error;
                self.events.emit(&DomainEvent::ViewerError { message });
            }
        }
    }

    fn on_viewer_signal(&mut self, signal: ViewerSignal) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let Some(endpoint) = session.endpoint.as_mut() else {
            tracing::debug!(session = %session.id, ?signal, "viewer signal without endpoint");
            return;
        };

        for event in self.viewer.observe(endpoint, signal) {
            match event {
                DomainEvent::RenderReady { .. } => session.phase = Phase::ViewerReady,
                DomainEvent::ViewerError { .. } => session.phase = Phase::Error,
                _ => {}
            }
            self.events.emit(&event);
        }
    }

    fn on_viewer_closed(&mut self, session: SessionId) {
        let was_closing = self.viewer.confirm_closed(session);
        if self.closing.remove(&session) {
            tracing::info!(%session, "viewer server closed");
            self.events.emit(&DomainEvent::ViewerClosed);
        } else if !was_closing {
            tracing::debug!(%session, "unexpected viewer close confirmation");
        }

        if self.viewer.port_available() && self.deferred_viewer.is_some() {
            let current = self.session.as_ref().map(|s| (s.id, s.phase));
            match current {
                Some((id, phase)) if Some(id) == self.deferred_viewer && phase != Phase::Ended => {
                    self.start_viewer();
                }
                _ => self.deferred_viewer = None,
            }
        }
    }

    /// End the live session: close the connection when it is still ours,
    /// release the viewer and report `bot-end` once.
    fn end_session(&mut self, reason: &str) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.phase == Phase::Ended {
            return;
        }

        tracing::info!(
            session = %session.id,
            target = %session.target,
            "bot disconnected: {reason}"
        );
        if let Some(mut connection) = session.connection.take() {
            connection.end(reason);
        }
        if let Some(endpoint) = session.endpoint.take() {
            self.closing.insert(session.id);
            self.viewer.release(endpoint, self.sink.for_session(session.id));
        }
        if self.deferred_viewer == Some(session.id) {
            self.deferred_viewer = None;
        }
        session.phase = Phase::Ended;
        self.events.emit(&DomainEvent::BotEnd {
            reason: format!("Disconnected: {reason}"),
        });
    }
}

fn log_spawn(session: SessionId, position: Option<Position>) {
    match position {
        Some(position) => tracing::info!(%session, %position, "bot spawned in the world"),
        None => tracing::info!(%session, "bot spawned in the world"),
    }
}

impl std::fmt::Debug for BotLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotLifecycleManager")
            .field("session", &self.session_id())
            .field("phase", &self.phase())
            .field("viewer", &self.viewer)
            .finish()
    }
}
