use botview_protocol::Position;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Process-unique id of one bot session. Every collaborator event carries the
/// id of the session that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub fn next() -> Self {
        Self(SESSION_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Signals produced by the connection collaborator.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Login,
    Spawn { position: Option<Position> },
    Error { message: String },
    Kicked { reason: String },
    End { reason: String },
}

/// Signals produced by a viewer server handle.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewerSignal {
    Listening,
    Error { kind: io::ErrorKind, message: String },
    Client,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEventKind {
    Connection(ConnectionEvent),
    Viewer(ViewerSignal),
    /// The viewer's server confirmed its socket is released.
    ViewerClosed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub session: SessionId,
    pub kind: SessionEventKind,
}

impl SessionEvent {
    pub fn connection(session: SessionId, event: ConnectionEvent) -> Self {
        Self {
            session,
            kind: SessionEventKind::Connection(event),
        }
    }

    pub fn viewer(session: SessionId, signal: ViewerSignal) -> Self {
        Self {
            session,
            kind: SessionEventKind::Viewer(signal),
        }
    }

    pub fn viewer_closed(session: SessionId) -> Self {
        Self {
            session,
            kind: SessionEventKind::ViewerClosed,
        }
    }
}

/// Lifecycle signals re-emitted by the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    BotLogin { username: String },
    BotError { message: String },
    BotKicked { reason: String },
    BotEnd { reason: String },
    ServerReady { url: String },
    RenderReady { url: String },
    ViewerError { message: String },
    ViewerClosed,
}

impl DomainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::BotLogin { .. } => "bot-login",
            Self::BotError { .. } => "bot-error",
            Self::BotKicked { .. } => "bot-kicked",
            Self::BotEnd { .. } => "bot-end",
            Self::ServerReady { .. } => "server-ready",
            Self::RenderReady { .. } => "render-ready",
            Self::ViewerError { .. } => "viewer-error",
            Self::ViewerClosed => "viewer-closed",
        }
    }
}

/// Shared inbox of the single control flow.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn for_session(&self, session: SessionId) -> SessionSink {
        SessionSink {
            session,
            tx: self.tx.clone(),
        }
    }
}

/// Handed to collaborators; tags everything it sends with its session.
#[derive(Debug, Clone)]
pub struct SessionSink {
    session: SessionId,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionSink {
    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn connection(&self, event: ConnectionEvent) {
        self.send(SessionEvent::connection(self.session, event));
    }

    pub fn viewer(&self, signal: ViewerSignal) {
        self.send(SessionEvent::viewer(self.session, signal));
    }

    pub fn viewer_closed(&self) {
        self.send(SessionEvent::viewer_closed(self.session));
    }

    fn send(&self, event: SessionEvent) {
        // The receiver only goes away once the orchestrator has stopped.
        if self.tx.send(event).is_err() {
            tracing::trace!(session = %self.session, "event dropped after shutdown");
        }
    }
}
