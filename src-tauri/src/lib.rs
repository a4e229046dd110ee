use botview::engine::{EngineConfig, Notifier, OrchestratorHandle};
use botview::protocol::{viewer_url, ConnectionView, FrameAction, UiNotification};
use std::sync::{Arc, Mutex};
use tauri::{AppHandle, Emitter, Manager, State};
use tauri_plugin_opener::OpenerExt;

struct DesktopState {
    orchestrator: OrchestratorHandle,
    view: Arc<Mutex<ConnectionView>>,
    viewer_url: String,
}

/// Emits the two UI channels and mirrors them into the shell's view state.
struct WindowNotifier {
    app: AppHandle,
    view: Arc<Mutex<ConnectionView>>,
}

impl Notifier for WindowNotifier {
    fn notify(&self, notification: UiNotification) {
        if let Ok(mut view) = self.view.lock() {
            if let Some(FrameAction::Reload(url)) = view.apply(&notification) {
                tracing::debug!(%url, "frame reload requested");
            }
        }
        let Some(window) = self.app.get_webview_window("main") else {
            tracing::warn!(channel = notification.channel(), "no window to notify");
            return;
        };
        if let Err(e) = window.emit(notification.channel(), notification.payload()) {
            tracing::warn!(channel = notification.channel(), "emit failed: {e}");
        }
    }
}

#[tauri::command]
fn start_bot(username: String, host: String, state: State<'_, DesktopState>) -> Result<(), String> {
    let request = {
        let mut view = state.view.lock().map_err(|e| e.to_string())?;
        view.username = username;
        view.host = host;
        view.submit().map_err(|e| e.to_string())?
    };
    state.orchestrator.start(request).map_err(|e| e.to_string())
}

#[tauri::command]
fn viewer_base_url(state: State<'_, DesktopState>) -> String {
    state.viewer_url.clone()
}

#[tauri::command]
fn open_viewer(app: AppHandle, state: State<'_, DesktopState>) -> Result<(), String> {
    let url = {
        let view = state.view.lock().map_err(|e| e.to_string())?;
        view.external_url().map(str::to_string)
    };
    let Some(url) = url else {
        return Err("viewer is not ready".to_string());
    };
    app.opener()
        .open_url(url, None::<&str>)
        .map_err(|e| e.to_string())
}

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    botview_server::init_tracing();
    let config = EngineConfig::load_or_default().unwrap_or_else(|e| {
        tracing::error!("{e}; using default config");
        EngineConfig::default()
    });

    let app = tauri::Builder::default()
        .plugin(tauri_plugin_opener::init())
        .setup(move |app| {
            let view = Arc::new(Mutex::new(ConnectionView::default()));
            let notifier = Arc::new(WindowNotifier {
                app: app.handle().clone(),
                view: view.clone(),
            });
            let viewer_url = viewer_url(config.viewer.port);
            // The orchestrator runs inside the desktop process on Tauri's runtime.
            let (orchestrator, task) = botview_server::orchestrator(config, notifier);
            tauri::async_runtime::spawn(task.run());
            app.manage(DesktopState {
                orchestrator,
                view,
                viewer_url,
            });
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![start_bot, viewer_base_url, open_viewer])
        .build(tauri::generate_context!())
        .expect("error while building tauri application");

    app.run(|handle, event| {
        if let tauri::RunEvent::Exit = event {
            let state = handle.state::<DesktopState>();
            tauri::async_runtime::block_on(state.orchestrator.shutdown());
        }
    });
}
