//! UI-side connection state.
//!
//! `ConnectionView` is derived state: it is fully determined by the last
//! submit and the last notification applied to it.

use crate::{StartBot, UiNotification};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("Please enter the server address and username")]
    MissingFields,
}

/// Instruction for the embedded content frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameAction {
    /// Point the frame at the URL and reload it, even if the URL is unchanged.
    Reload(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionView {
    pub username: String,
    pub host: String,
    pub viewer_url: Option<String>,
    pub connecting: bool,
    pub error: Option<String>,
}

impl ConnectionView {
    /// Validate the inputs and enter the connecting state.
    ///
    /// On a validation error the view is left untouched and no command should
    /// be sent.
    pub fn submit(&mut self) -> Result<StartBot, SubmitError> {
        let request = StartBot::new(self.username.trim(), self.host.trim());
        request.validate()?;
        self.connecting = true;
        self.error = None;
        self.viewer_url = None;
        Ok(request)
    }

    pub fn apply(&mut self, notification: &UiNotification) -> Option<FrameAction> {
        match notification {
            UiNotification::ViewerReady { url } => {
                self.viewer_url = Some(url.clone());
                self.connecting = false;
                self.error = None;
                Some(FrameAction::Reload(url.clone()))
            }
            UiNotification::BotError { message } => {
                self.error = Some(message.clone());
                self.connecting = false;
                self.viewer_url = None;
                None
            }
        }
    }

    /// URL for the "open in external browser" action.
    pub fn external_url(&self) -> Option<&str> {
        self.viewer_url.as_deref()
    }
}
