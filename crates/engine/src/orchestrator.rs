use crate::bridge::{Notifier, OrchestrationBridge};
use crate::collab::{Connector, ViewerLauncher};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::event::{EventSink, SessionEvent};
use botview_protocol::StartBot;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

enum Command {
    Start(StartBot),
    Shutdown(oneshot::Sender<()>),
}

/// Cheap handle for sending commands into the orchestrator task.
#[derive(Debug, Clone)]
pub struct OrchestratorHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start(req) => f.debug_tuple("Start").field(req).finish(),
            Self::Shutdown(_) => f.write_str("Shutdown"),
        }
    }
}

impl OrchestratorHandle {
    pub fn start(&self, request: StartBot) -> Result<()> {
        self.tx
            .send(Command::Start(request))
            .map_err(|_| EngineError::OrchestratorGone)
    }

    /// Tear down the current session and wait until the orchestrator stopped.
    pub async fn shutdown(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Shutdown(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

/// The single control flow: commands and collaborator events are handled
/// one at a time, in arrival order.
pub struct Orchestrator {
    bridge: OrchestrationBridge,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
}

impl Orchestrator {
    pub fn new(
        config: EngineConfig,
        connector: Arc<dyn Connector>,
        launcher: Arc<dyn ViewerLauncher>,
        notifier: Arc<dyn Notifier>,
    ) -> (OrchestratorHandle, Self) {
        let (sink, events) = EventSink::channel();
        let (tx, commands) = mpsc::unbounded_channel();
        let bridge = OrchestrationBridge::new(config, connector, launcher, notifier, sink);
        (
            OrchestratorHandle { tx },
            Self {
                bridge,
                commands,
                events,
            },
        )
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(Command::Start(request)) => self.bridge.start(request),
                    Some(Command::Shutdown(done)) => {
                        self.stop().await;
                        let _ = done.send(());
                        return;
                    }
                    None => {
                        self.stop().await;
                        return;
                    }
                },
                Some(event) = self.events.recv() => self.bridge.dispatch(event),
            }
        }
    }

    async fn stop(&mut self) {
        tracing::info!("shutting down orchestrator");
        self.bridge.shutdown();

        let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
        while self.bridge.has_pending_closes() {
            match tokio::time::timeout_at(deadline, self.events.recv()).await {
                Ok(Some(event)) => self.bridge.dispatch(event),
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!("viewer did not confirm close before shutdown");
                    break;
                }
            }
        }
    }
}
