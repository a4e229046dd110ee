use crate::collab::{Connector, ViewerLauncher};
use crate::config::EngineConfig;
use crate::event::{DomainEvent, EventSink, SessionEvent};
use crate::manager::BotLifecycleManager;
use crate::viewer::ViewerLifecycleAdapter;
use botview_protocol::{StartBot, UiNotification};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Delivers notifications to the presentation layer. At most once, no ack.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: UiNotification);
}

/// Relays UI start requests to a fresh [`BotLifecycleManager`] and its
/// domain events back to the UI as `viewer-ready` / `bot-error`.
pub struct OrchestrationBridge {
    config: EngineConfig,
    connector: Arc<dyn Connector>,
    launcher: Arc<dyn ViewerLauncher>,
    notifier: Arc<dyn Notifier>,
    sink: EventSink,
    current: Option<BotLifecycleManager>,
}

impl OrchestrationBridge {
    pub fn new(
        config: EngineConfig,
        connector: Arc<dyn Connector>,
        launcher: Arc<dyn ViewerLauncher>,
        notifier: Arc<dyn Notifier>,
        sink: EventSink,
    ) -> Self {
        Self {
            config,
            connector,
            launcher,
            notifier,
            sink,
            current: None,
        }
    }

    pub fn manager(&self) -> Option<&BotLifecycleManager> {
        self.current.as_ref()
    }

    pub fn start(&mut self, request: StartBot) {
        tracing::info!(
            username = %request.username,
            host = %request.host,
            "received start request"
        );

        let viewer = self.take_down().unwrap_or_else(|| {
            ViewerLifecycleAdapter::new(self.config.viewer.clone(), self.launcher.clone())
        });
        let mut manager = BotLifecycleManager::new(
            self.config.bot.clone(),
            self.connector.clone(),
            viewer,
            self.sink.clone(),
        );
        attach_relays(&mut manager, self.notifier.clone());

        let created = panic::catch_unwind(AssertUnwindSafe(|| {
            manager.create_bot(&request.username, &request.host)
        }));
        match created {
            Ok(Ok(session)) => {
                tracing::info!(%session, "bot create request sent, waiting for ready events");
            }
            Ok(Err(e)) => self.report(format!("Failed to create bot: {e}")),
            Err(payload) => self.report(format!(
                "Failed to create bot: {}",
                panic_message(payload.as_ref())
            )),
        }
        self.current = Some(manager);
    }

    pub fn dispatch(&mut self, event: SessionEvent) {
        match self.current.as_mut() {
            Some(manager) => manager.handle(event),
            None => tracing::debug!(session = %event.session, "no manager for event"),
        }
    }

    pub fn shutdown(&mut self) {
        if let Some(manager) = self.current.as_mut() {
            manager.destroy();
        }
    }

    pub fn has_pending_closes(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(BotLifecycleManager::has_pending_closes)
    }

    /// Destroy and detach the previous manager in one step, keeping its
    /// viewer adapter for the successor.
    fn take_down(&mut self) -> Option<ViewerLifecycleAdapter> {
        let mut previous = self.current.take()?;
        previous.destroy();
        previous.events_mut().clear();
        Some(previous.into_viewer_adapter())
    }

    fn report(&self, message: String) {
        tracing::error!("{message}");
        self.notifier.notify(UiNotification::bot_error(message));
    }
}

fn attach_relays(manager: &mut BotLifecycleManager, notifier: Arc<dyn Notifier>) {
    manager.events_mut().subscribe(move |event| match event {
        DomainEvent::RenderReady { url } => {
            tracing::info!(%url, "viewer rendering, notifying UI");
            notifier.notify(UiNotification::viewer_ready(url.clone()));
        }
        // Not forwarded: the frame would load before the renderer is attached.
        DomainEvent::ServerReady { url } => tracing::info!(%url, "viewer server ready"),
        DomainEvent::ViewerError { message } | DomainEvent::BotError { message } => {
            notifier.notify(UiNotification::bot_error(message.clone()));
        }
        other => tracing::debug!(event = other.name(), "not relayed"),
    });
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unexpected panic".to_string()
    }
}
