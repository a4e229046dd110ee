use axum::{
    extract::State,
    middleware,
    response::{Html, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use botview_engine::{
    BotConnection, EngineError, OnClosed, SessionSink, ViewerConfig, ViewerLauncher, ViewerServer,
    ViewerSignal,
};
use botview_protocol::WorldSnapshot;
use serde::Serialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tower_http::cors::{AllowOrigin, CorsLayer};

/// Serves the bot's world view over HTTP on the configured port.
#[derive(Debug, Clone)]
pub struct HttpViewerLauncher {
    bind_ip: IpAddr,
}

impl Default for HttpViewerLauncher {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
        }
    }
}

impl ViewerLauncher for HttpViewerLauncher {
    fn start(
        &self,
        bot: &dyn BotConnection,
        options: &ViewerConfig,
        events: SessionSink,
    ) -> botview_engine::Result<Box<dyn ViewerServer>> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| EngineError::ViewerStart(e.to_string()))?;
        let addr = SocketAddr::new(self.bind_ip, options.port);
        let state = ViewerState {
            world: bot.world(),
            options: options.clone(),
            events: events.clone(),
            clients: AtomicUsize::new(0),
        };
        let (close_tx, close_rx) = oneshot::channel();
        runtime.spawn(run_viewer(addr, state, close_rx, events));
        Ok(Box::new(HttpViewerServer {
            close: Some(close_tx),
        }))
    }
}

/// Dropping the handle without `close` also stops the server.
struct HttpViewerServer {
    close: Option<oneshot::Sender<OnClosed>>,
}

impl ViewerServer for HttpViewerServer {
    fn close(mut self: Box<Self>, on_closed: OnClosed) {
        if let Some(tx) = self.close.take() {
            // Err means the server task is already gone, so the port is free.
            if let Err(on_closed) = tx.send(on_closed) {
                on_closed();
            }
        }
    }
}

async fn run_viewer(
    addr: SocketAddr,
    state: ViewerState,
    close_rx: oneshot::Receiver<OnClosed>,
    events: SessionSink,
) {
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            events.viewer(ViewerSignal::Error {
                kind: e.kind(),
                message: e.to_string(),
            });
            if let Ok(on_closed) = close_rx.await {
                on_closed();
            }
            return;
        }
    };
    events.viewer(ViewerSignal::Listening);

    let (closed_tx, closed_rx) = oneshot::channel::<OnClosed>();
    let shutdown = async move {
        if let Ok(on_closed) = close_rx.await {
            let _ = closed_tx.send(on_closed);
        }
    };
    let app = viewer_router(state);
    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await;
    if let Err(e) = served {
        events.viewer(ViewerSignal::Error {
            kind: e.kind(),
            message: e.to_string(),
        });
    }
    tracing::debug!(session = %events.session(), %addr, "viewer socket released");
    if let Ok(on_closed) = closed_rx.await {
        on_closed();
    }
}

pub struct ViewerState {
    pub world: watch::Receiver<WorldSnapshot>,
    pub options: ViewerConfig,
    pub events: SessionSink,
    pub clients: AtomicUsize,
}

pub fn viewer_router(state: ViewerState) -> Router {
    Router::new()
        .route("/", get(viewer_page))
        .route("/health", get(health))
        .route("/api/view", get(api_view))
        .route("/api/client", post(api_client))
        .with_state(Arc::new(state))
        // The viewer exposes the bot's surroundings; keep it on this machine.
        .layer(middleware::from_fn(loopback_only))
        .layer(local_only_cors())
}

async fn health() -> &'static str {
    "ok"
}

async fn viewer_page() -> Html<&'static str> {
    Html(VIEWER_HTML)
}

#[derive(Debug, Serialize)]
pub struct ViewResponse {
    #[serde(flatten)]
    pub world: WorldSnapshot,
    pub first_person: bool,
    pub view_distance: u32,
    /// Renderers attached to this server. Zero tells a page it has to attach.
    pub clients: usize,
}

pub(crate) async fn api_view(State(state): State<Arc<ViewerState>>) -> Json<ViewResponse> {
    let world = state.world.borrow().clone();
    Json(ViewResponse {
        world,
        first_person: state.options.first_person,
        view_distance: state.options.view_distance,
        clients: state.clients.load(Ordering::Relaxed),
    })
}

#[derive(Debug, Serialize)]
pub struct ClientAttached {
    pub clients: usize,
}

/// A renderer attached to the page; this is the "render ready" signal.
pub(crate) async fn api_client(State(state): State<Arc<ViewerState>>) -> Json<ClientAttached> {
    let clients = state.clients.fetch_add(1, Ordering::Relaxed) + 1;
    state.events.viewer(ViewerSignal::Client);
    Json(ClientAttached { clients })
}

async fn loopback_only(
    axum::extract::ConnectInfo(peer): axum::extract::ConnectInfo<SocketAddr>,
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    if peer.ip().is_loopback() {
        return next.run(req).await;
    }
    (axum::http::StatusCode::FORBIDDEN, "forbidden").into_response()
}

fn local_only_cors() -> CorsLayer {
    use axum::http::header;
    use axum::http::HeaderValue;
    use axum::http::Method;

    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .allow_origin(AllowOrigin::predicate(|origin: &HeaderValue, _req| {
            is_allowed_local_origin(origin)
        }))
}

pub(crate) fn is_allowed_local_origin(origin: &axum::http::HeaderValue) -> bool {
    let Ok(s) = origin.to_str() else {
        return false;
    };
    // Desktop shell webview origins.
    if s == "tauri://localhost" || s == "http://tauri.localhost" {
        return true;
    }
    ["localhost", "127.0.0.1"].iter().any(|host| {
        ["http://", "https://"].iter().any(|scheme| {
            s.strip_prefix(scheme)
                .and_then(|rest| rest.strip_prefix(host))
                .is_some_and(|after| after.is_empty() || after.starts_with(':'))
        })
    })
}

const VIEWER_HTML: &str = r###"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1" />
  <title>Botview</title>
  <style>
    *{box-sizing:border-box;margin:0;padding:0}
    html,body{width:100%;height:100%;overflow:hidden;background:#000;color:#e6fbff;font-family:system-ui,sans-serif}
    #view{width:100%;height:100%;display:block}
    .hud{position:absolute;left:12px;top:12px;padding:8px 10px;border-radius:8px;background:#0008;font-size:12px}
  </style>
</head>
<body>
  <canvas id="view"></canvas>
  <div class="hud"><div id="who">waiting for bot</div><div id="pos">-</div></div>
  <script>
  (function(){
    const canvas = document.getElementById("view");
    const ctx = canvas.getContext("2d");
    const who = document.getElementById("who");
    const pos = document.getElementById("pos");
    const trail = [];
    let view = null;
    let attaching = false;

    // A page can outlive its server: attach again whenever the server it
    // polls has no renderer.
    async function attach(){
      if (attaching) return;
      attaching = true;
      try{
        const r = await fetch("/api/client", { method: "POST" });
        if (!r.ok) throw new Error(r.status);
      }catch(_e){
      }finally{
        attaching = false;
      }
    }

    function resize(){
      canvas.width = canvas.clientWidth * (window.devicePixelRatio || 1);
      canvas.height = canvas.clientHeight * (window.devicePixelRatio || 1);
    }

    function draw(){
      ctx.fillStyle = "#050913";
      ctx.fillRect(0, 0, canvas.width, canvas.height);
      if (!view || !view.position){ requestAnimationFrame(draw); return; }
      const cell = Math.max(6, Math.min(canvas.width, canvas.height) / (view.view_distance * 32));
      const cx = canvas.width / 2, cy = canvas.height / 2;
      const p = view.position;
      ctx.strokeStyle = "rgba(127,203,255,0.15)";
      for (let i = -view.view_distance * 16; i <= view.view_distance * 16; i += 16){
        const off = (i - (p.x % 16)) * cell;
        ctx.beginPath(); ctx.moveTo(cx + off, 0); ctx.lineTo(cx + off, canvas.height); ctx.stroke();
        const offz = (i - (p.z % 16)) * cell;
        ctx.beginPath(); ctx.moveTo(0, cy + offz); ctx.lineTo(canvas.width, cy + offz); ctx.stroke();
      }
      ctx.fillStyle = "rgba(111,248,255,0.35)";
      for (const t of trail){
        ctx.fillRect(cx + (t.x - p.x) * cell - 2, cy + (t.z - p.z) * cell - 2, 4, 4);
      }
      ctx.fillStyle = "#4df5bf";
      ctx.fillRect(cx - cell / 2, cy - cell / 2, cell, cell);
      requestAnimationFrame(draw);
    }

    async function poll(){
      for(;;){
        try{
          const r = await fetch("/api/view", { cache: "no-store" });
          view = await r.json();
          if (view.clients === 0) attach();
          who.textContent = view.username + (view.spawned ? "" : " (not spawned)");
          if (view.position){
            const p = view.position;
            pos.textContent = `${p.x.toFixed(1)}, ${p.y.toFixed(1)}, ${p.z.toFixed(1)}`;
            const last = trail[trail.length - 1];
            if (!last || last.x !== p.x || last.z !== p.z){
              trail.push({ x: p.x, z: p.z });
              if (trail.length > 256) trail.shift();
            }
          }
        }catch(_e){
          who.textContent = "viewer offline";
        }
        await new Promise(res => setTimeout(res, 500));
      }
    }

    window.addEventListener("resize", resize);
    resize();
    attach();
    requestAnimationFrame(draw);
    poll();
  })();
  </script>
</body>
</html>
"###;
