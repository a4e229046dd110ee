//! Lifecycle orchestration for a single bot session and its embedded viewer.
//!
//! Commands flow UI -> [`OrchestrationBridge`] -> [`BotLifecycleManager`] ->
//! [`Connector`]; events flow back from the collaborators as tagged
//! [`SessionEvent`]s, are turned into [`DomainEvent`]s and relayed to the UI
//! as [`botview_protocol::UiNotification`]s.

mod bridge;
mod collab;
mod config;
mod error;
mod event;
mod manager;
mod orchestrator;
mod relay;
mod viewer;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

#[cfg(test)]
mod tests;

pub use bridge::{Notifier, OrchestrationBridge};
pub use collab::{
    BotConnection, ConnectOptions, Connector, OnClosed, ViewerLauncher, ViewerServer,
};
pub use config::{AuthMode, BotConfig, ClientConfig, EngineConfig, ServerAddress, ViewerConfig};
pub use error::{EngineError, Result};
pub use event::{
    ConnectionEvent, DomainEvent, EventSink, SessionEvent, SessionEventKind, SessionId,
    SessionSink, ViewerSignal,
};
pub use manager::{BotLifecycleManager, Phase};
pub use orchestrator::{Orchestrator, OrchestratorHandle};
pub use relay::{ObserverId, Relay};
pub use viewer::{Readiness, ViewerEndpoint, ViewerLifecycleAdapter};
