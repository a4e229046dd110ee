use botview_engine::{EngineConfig, Notifier, Orchestrator, OrchestratorHandle};
use botview_protocol::UiNotification;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

pub mod process;
pub mod viewer;

pub use process::ProcessConnector;
pub use viewer::HttpViewerLauncher;


/// Wire the orchestrator to the real collaborators: the external game client
/// process and the embedded HTTP viewer. The caller spawns `Orchestrator::run`.
pub fn orchestrator(
    config: EngineConfig,
    notifier: Arc<dyn Notifier>,
) -> (OrchestratorHandle, Orchestrator) {
    let connector = Arc::new(ProcessConnector::new(config.client.clone()));
    let launcher = Arc::new(HttpViewerLauncher::default());
    Orchestrator::new(config, connector, launcher, notifier)
}

/// Notifier for the headless binary: notifications go to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: UiNotification) {
        match &notification {
            UiNotification::ViewerReady { url } => {
                tracing::info!(channel = notification.channel(), "viewer ready at {url}")
            }
            UiNotification::BotError { message } => {
                tracing::error!(channel = notification.channel(), "{message}")
            }
        }
    }
}

/// `RUST_LOG` wins; otherwise `info`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
