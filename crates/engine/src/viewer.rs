use crate::collab::{BotConnection, ViewerLauncher, ViewerServer};
use crate::config::ViewerConfig;
use crate::error::{EngineError, Result};
use crate::event::{DomainEvent, SessionId, SessionSink, ViewerSignal};
use botview_protocol::viewer_url;
use std::collections::HashSet;
use std::io;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    NotStarted,
    Listening,
    Rendering,
    Failed,
}

/// A started viewer server owned by one session.
pub struct ViewerEndpoint {
    session: SessionId,
    url: String,
    readiness: Readiness,
    server: Box<dyn ViewerServer>,
}

impl ViewerEndpoint {
    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn readiness(&self) -> Readiness {
        self.readiness
    }
}

impl std::fmt::Debug for ViewerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewerEndpoint")
            .field("session", &self.session)
            .field("url", &self.url)
            .field("readiness", &self.readiness)
            .finish()
    }
}

/// Starts viewers on the configured port and turns their raw signals into
/// `server-ready` / `render-ready` / `viewer-error`.
///
/// The adapter also remembers which released servers have not yet confirmed
/// their close, so a new viewer is never bound while the port is still held.
pub struct ViewerLifecycleAdapter {
    options: ViewerConfig,
    launcher: Arc<dyn ViewerLauncher>,
    closing: HashSet<SessionId>,
}

impl ViewerLifecycleAdapter {
    pub fn new(options: ViewerConfig, launcher: Arc<dyn ViewerLauncher>) -> Self {
        Self {
            options,
            launcher,
            closing: HashSet::new(),
        }
    }

    pub fn port(&self) -> u16 {
        self.options.port
    }

    pub fn url(&self) -> String {
        viewer_url(self.options.port)
    }

    pub fn port_available(&self) -> bool {
        self.closing.is_empty()
    }

    pub fn has_pending_closes(&self) -> bool {
        !self.closing.is_empty()
    }

    pub fn start(&self, bot: &dyn BotConnection, events: SessionSink) -> Result<ViewerEndpoint> {
        let session = events.session();
        tracing::info!(%session, port = self.options.port, "starting viewer");
        let server = self
            .launcher
            .start(bot, &self.options, events)
            .map_err(|e| EngineError::ViewerStart(format!("Viewer initialization failed: {e}")))?;
        Ok(ViewerEndpoint {
            session,
            url: self.url(),
            readiness: Readiness::NotStarted,
            server,
        })
    }

    /// Translate one server signal. `server-ready` always precedes
    /// `render-ready`, and only the first client of an endpoint counts.
    pub fn observe(&self, endpoint: &mut ViewerEndpoint, signal: ViewerSignal) -> Vec<DomainEvent> {
        let url = endpoint.url.clone();
        match (signal, endpoint.readiness) {
            (_, Readiness::Failed) => Vec::new(),
            (ViewerSignal::Listening, Readiness::NotStarted) => {
                tracing::info!(session = %endpoint.session, %url, "viewer server listening");
                endpoint.readiness = Readiness::Listening;
                vec![DomainEvent::ServerReady { url }]
            }
            (ViewerSignal::Listening, _) => Vec::new(),
            (ViewerSignal::Client, Readiness::NotStarted) => {
                endpoint.readiness = Readiness::Rendering;
                vec![
                    DomainEvent::ServerReady { url: url.clone() },
                    DomainEvent::RenderReady { url },
                ]
            }
            (ViewerSignal::Client, Readiness::Listening) => {
                tracing::info!(session = %endpoint.session, "viewer client connected");
                endpoint.readiness = Readiness::Rendering;
                vec![DomainEvent::RenderReady { url }]
            }
            (ViewerSignal::Client, Readiness::Rendering) => Vec::new(),
            (ViewerSignal::Error { kind, message }, _) => {
                endpoint.readiness = Readiness::Failed;
                let message = self.describe_error(kind, &message);
                tracing::error!(session = %endpoint.session, "{message}");
                vec![DomainEvent::ViewerError { message }]
            }
        }
    }

    pub fn describe_error(&self, kind: io::ErrorKind, message: &str) -> String {
        if kind == io::ErrorKind::AddrInUse {
            format!(
                "Viewer port {} is already in use; close the process using it or change the port",
                self.options.port
            )
        } else {
            format!("Viewer failed to start: {message}")
        }
    }

    /// Close the endpoint's server; the sink gets `ViewerClosed` once the
    /// server has released the socket.
    pub fn release(&mut self, endpoint: ViewerEndpoint, events: SessionSink) {
        let session = endpoint.session;
        tracing::debug!(%session, "releasing viewer");
        self.closing.insert(session);
        endpoint.server.close(Box::new(move || events.viewer_closed()));
    }

    /// Returns whether `session` had a close in flight.
    pub fn confirm_closed(&mut self, session: SessionId) -> bool {
        self.closing.remove(&session)
    }
}

impl std::fmt::Debug for ViewerLifecycleAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewerLifecycleAdapter")
            .field("options", &self.options)
            .field("closing", &self.closing)
            .finish()
    }
}
