use super::*;
use crate::testing::{FakeConnector, FakeLauncher, RecordingNotifier};
use botview_protocol::{Position, StartBot, UiNotification};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

struct Bench {
    manager: BotLifecycleManager,
    rx: UnboundedReceiver<SessionEvent>,
    seen: Arc<Mutex<Vec<DomainEvent>>>,
    connector: FakeConnector,
    launcher: FakeLauncher,
}

fn bench() -> Bench {
    let connector = FakeConnector::new();
    let launcher = FakeLauncher::new();
    let (sink, rx) = EventSink::channel();
    let viewer = ViewerLifecycleAdapter::new(ViewerConfig::default(), Arc::new(launcher.clone()));
    let mut manager =
        BotLifecycleManager::new(BotConfig::default(), Arc::new(connector.clone()), viewer, sink);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    manager
        .events_mut()
        .subscribe(move |e: &DomainEvent| log.lock().unwrap().push(e.clone()));
    Bench {
        manager,
        rx,
        seen,
        connector,
        launcher,
    }
}

impl Bench {
    fn current(&self) -> SessionId {
        self.manager.session_id().expect("session")
    }

    fn conn(&mut self, event: ConnectionEvent) {
        let id = self.current();
        self.manager.handle(SessionEvent::connection(id, event));
    }

    fn viewer(&mut self, signal: ViewerSignal) {
        let id = self.current();
        self.manager.handle(SessionEvent::viewer(id, signal));
    }

    fn settle(&mut self) {
        while let Ok(event) = self.rx.try_recv() {
            self.manager.handle(event);
        }
    }

    fn names(&self) -> Vec<&'static str> {
        self.seen.lock().unwrap().iter().map(DomainEvent::name).collect()
    }

    fn count(&self, name: &str) -> usize {
        self.names().into_iter().filter(|n| *n == name).count()
    }
}

fn spawn_at_origin() -> ConnectionEvent {
    ConnectionEvent::Spawn {
        position: Some(Position {
            x: 0.5,
            y: 64.0,
            z: -3.5,
        }),
    }
}

#[test]
fn create_opens_with_configured_protocol_parameters() {
    let mut b = bench();
    b.manager.create_bot("Bob", "example.com").unwrap();

    let opened = b.connector.opened();
    assert_eq!(opened.len(), 1);
    assert_eq!(opened[0].username, "Bob");
    assert_eq!(opened[0].target.port, 25565);
    assert_eq!(opened[0].options.version, "1.21.8");
    assert_eq!(opened[0].options.check_timeout, Duration::from_secs(60));
    assert_eq!(opened[0].options.auth, AuthMode::Microsoft);
    assert_eq!(b.manager.phase(), Phase::Connecting);
    assert_eq!(b.manager.viewer_url(), "http://localhost:3000");
}

#[test]
fn login_and_spawn_start_one_viewer() {
    let mut b = bench();
    b.manager.create_bot("Bob", "example.com").unwrap();

    b.conn(ConnectionEvent::Login);
    assert_eq!(b.manager.phase(), Phase::LoggedIn);
    assert_eq!(
        b.seen.lock().unwrap()[0],
        DomainEvent::BotLogin { username: "Bob".to_string() }
    );

    b.conn(spawn_at_origin());
    assert_eq!(b.manager.phase(), Phase::ViewerStarting);
    // Respawn after death must not bind the port again.
    b.conn(spawn_at_origin());
    assert_eq!(b.launcher.starts(), vec![b.current()]);

    b.viewer(ViewerSignal::Listening);
    b.viewer(ViewerSignal::Client);
    b.viewer(ViewerSignal::Client);
    assert_eq!(b.manager.phase(), Phase::ViewerReady);
    assert_eq!(b.names(), vec!["bot-login", "server-ready", "render-ready"]);
}

#[test]
fn client_before_listening_still_reports_server_first() {
    let mut b = bench();
    b.manager.create_bot("Bob", "example.com").unwrap();
    b.conn(spawn_at_origin());

    b.viewer(ViewerSignal::Client);
    b.viewer(ViewerSignal::Listening);
    assert_eq!(b.names(), vec!["server-ready", "render-ready"]);
}

#[test]
fn connection_error_keeps_session() {
    let mut b = bench();
    b.manager.create_bot("Bob", "example.com").unwrap();
    b.conn(ConnectionEvent::Error { message: "ECONNRESET".to_string() });

    assert_eq!(
        *b.seen.lock().unwrap(),
        vec![DomainEvent::BotError { message: "Bot error: ECONNRESET".to_string() }]
    );
    assert_eq!(b.manager.phase(), Phase::Error);
    assert_eq!(b.connector.live(), 1);
    assert!(b.connector.ended().is_empty());
}

#[test]
fn failed_viewer_start_is_not_retried_on_respawn() {
    let mut b = bench();
    b.manager.create_bot("Bob", "example.com").unwrap();
    b.launcher.fail_next("no runtime");

    b.conn(spawn_at_origin());
    assert_eq!(b.names(), vec!["viewer-error"]);
    assert_eq!(b.manager.phase(), Phase::Error);

    b.conn(spawn_at_origin());
    assert_eq!(b.launcher.starts(), vec![b.current()]);
    assert_eq!(b.names(), vec!["viewer-error"]);
    assert_eq!(b.manager.phase(), Phase::Error);
}

#[test]
fn kick_then_end_tears_down_viewer() {
    let mut b = bench();
    b.manager.create_bot("Bob", "example.com").unwrap();
    b.conn(ConnectionEvent::Login);
    b.conn(spawn_at_origin());
    b.viewer(ViewerSignal::Listening);

    b.conn(ConnectionEvent::Kicked { reason: "banned".to_string() });
    b.conn(ConnectionEvent::End { reason: "socketClosed".to_string() });
    b.settle();

    assert_eq!(
        b.names(),
        vec!["bot-login", "server-ready", "bot-kicked", "bot-end", "viewer-closed"]
    );
    let seen = b.seen.lock().unwrap().clone();
    assert_eq!(
        seen[2],
        DomainEvent::BotKicked { reason: "Kicked from server: banned".to_string() }
    );
    match &seen[3] {
        DomainEvent::BotEnd { reason } => assert!(reason.contains("banned"), "{reason}"),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(b.manager.phase(), Phase::Ended);
    assert_eq!(b.launcher.live(), 0);
    assert_eq!(b.connector.live(), 0);
    // The remote side ended the connection; we never call end() on it.
    assert!(b.connector.ended().is_empty());
}

#[test]
fn end_reason_is_reported() {
    let mut b = bench();
    b.manager.create_bot("Bob", "example.com").unwrap();
    b.conn(ConnectionEvent::End { reason: "socketClosed".to_string() });
    b.conn(ConnectionEvent::End { reason: "again".to_string() });

    assert_eq!(
        *b.seen.lock().unwrap(),
        vec![DomainEvent::BotEnd { reason: "Disconnected: socketClosed".to_string() }]
    );
}

#[test]
fn destroy_twice_emits_once() {
    let mut b = bench();
    let id = b.manager.create_bot("Bob", "example.com").unwrap();
    b.conn(spawn_at_origin());

    b.manager.destroy();
    b.manager.destroy();
    b.settle();
    b.manager.destroy();

    assert_eq!(b.count("bot-end"), 1);
    assert_eq!(b.count("viewer-closed"), 1);
    assert_eq!(b.connector.ended(), vec![(id, "Manual destroy".to_string())]);
    assert_eq!(b.connector.live(), 0);
    assert_eq!(b.launcher.live(), 0);
    assert!(!b.manager.has_viewer());
}

#[test]
fn destroy_without_viewer_emits_no_viewer_closed() {
    let mut b = bench();
    b.manager.destroy();
    assert!(b.names().is_empty());

    b.manager.create_bot("Bob", "example.com").unwrap();
    b.manager.destroy();
    b.manager.destroy();
    b.settle();

    assert_eq!(b.names(), vec!["bot-end"]);
}

#[test]
fn repeated_create_keeps_one_connection_and_one_viewer() {
    let mut b = bench();
    for i in 0..5 {
        b.manager.create_bot(&format!("bot{i}"), "example.com").unwrap();
        b.conn(ConnectionEvent::Login);
        b.conn(spawn_at_origin());
        b.settle();
        assert!(b.connector.live() <= 1);
        assert!(b.launcher.live() <= 1);
    }
    assert_eq!(b.connector.live(), 1);
    assert_eq!(b.launcher.live(), 1);
    assert_eq!(b.launcher.starts().len(), 5);
    assert_eq!(b.connector.ended().len(), 4);
}

#[test]
fn viewer_start_waits_for_previous_close() {
    let mut b = bench();
    b.launcher.hold_closes();

    b.manager.create_bot("first", "example.com").unwrap();
    b.conn(spawn_at_origin());
    let second = b.manager.create_bot("second", "example.com").unwrap();
    b.conn(spawn_at_origin());

    assert_eq!(b.launcher.starts().len(), 1);
    assert_eq!(b.launcher.live(), 1);
    assert_eq!(b.manager.phase(), Phase::Spawned);

    b.launcher.finish_closes();
    b.settle();
    assert_eq!(b.launcher.starts().last(), Some(&second));
    assert_eq!(b.launcher.live(), 1);
    assert_eq!(b.manager.phase(), Phase::ViewerStarting);
    assert_eq!(b.count("viewer-closed"), 1);
}

#[test]
fn stale_session_events_are_dropped() {
    let mut b = bench();
    let old = b.manager.create_bot("first", "example.com").unwrap();
    b.manager.create_bot("second", "example.com").unwrap();
    b.seen.lock().unwrap().clear();

    b.manager.handle(SessionEvent::connection(old, ConnectionEvent::Login));
    b.manager.handle(SessionEvent::connection(
        old,
        ConnectionEvent::End { reason: "late".to_string() },
    ));
    assert!(b.names().is_empty());
    assert_eq!(b.manager.phase(), Phase::Connecting);
}

#[test]
fn invalid_input_is_rejected_after_teardown() {
    let mut b = bench();
    b.manager.create_bot("Bob", "example.com").unwrap();

    assert!(matches!(
        b.manager.create_bot("Bob", "example.com:notaport"),
        Err(EngineError::InvalidRequest(_))
    ));
    assert!(matches!(
        b.manager.create_bot(" ", "example.com"),
        Err(EngineError::InvalidRequest(_))
    ));
    assert_eq!(b.manager.phase(), Phase::Idle);
    assert_eq!(b.connector.live(), 0);
}

// Bridge level: what actually reaches the UI.

struct Wired {
    bridge: OrchestrationBridge,
    rx: UnboundedReceiver<SessionEvent>,
    connector: FakeConnector,
    launcher: FakeLauncher,
    notifier: RecordingNotifier,
}

fn wired() -> Wired {
    let connector = FakeConnector::new();
    let launcher = FakeLauncher::new();
    let notifier = RecordingNotifier::new();
    let (sink, rx) = EventSink::channel();
    let bridge = OrchestrationBridge::new(
        EngineConfig::default(),
        Arc::new(connector.clone()),
        Arc::new(launcher.clone()),
        Arc::new(notifier.clone()),
        sink,
    );
    Wired {
        bridge,
        rx,
        connector,
        launcher,
        notifier,
    }
}

impl Wired {
    fn send(&mut self, kind: SessionEventKind) {
        let session = self.connector.last_session().expect("opened");
        self.bridge.dispatch(SessionEvent { session, kind });
    }

    fn settle(&mut self) {
        while let Ok(event) = self.rx.try_recv() {
            self.bridge.dispatch(event);
        }
    }
}

#[test]
fn start_to_render_sends_one_viewer_ready() {
    let mut w = wired();
    w.bridge.start(StartBot::new("Bob", "example.com"));
    w.send(SessionEventKind::Connection(ConnectionEvent::Login));
    w.send(SessionEventKind::Connection(spawn_at_origin()));
    w.send(SessionEventKind::Viewer(ViewerSignal::Listening));
    w.send(SessionEventKind::Viewer(ViewerSignal::Client));

    assert_eq!(
        w.notifier.seen(),
        vec![UiNotification::viewer_ready("http://localhost:3000")]
    );
}

#[test]
fn connection_error_reaches_ui_without_teardown() {
    let mut w = wired();
    w.bridge.start(StartBot::new("Bob", "example.com"));
    w.send(SessionEventKind::Connection(ConnectionEvent::Error {
        message: "ECONNRESET".to_string(),
    }));

    let seen = w.notifier.seen();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].payload().contains("ECONNRESET"));
    assert_ne!(w.bridge.manager().map(|m| m.phase()), Some(Phase::Ended));
    assert_eq!(w.connector.live(), 1);
}

#[test]
fn port_in_use_names_the_port() {
    let mut w = wired();
    w.bridge.start(StartBot::new("Bob", "example.com"));
    w.send(SessionEventKind::Connection(spawn_at_origin()));
    w.send(SessionEventKind::Viewer(ViewerSignal::Error {
        kind: io::ErrorKind::AddrInUse,
        message: "address in use".to_string(),
    }));
    w.send(SessionEventKind::Viewer(ViewerSignal::Client));

    let seen = w.notifier.take();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].channel(), "bot-error");
    assert!(seen[0].payload().contains("3000"));
    // Bot stays connected without a working viewer.
    assert_eq!(w.connector.live(), 1);
}

#[test]
fn other_viewer_failures_carry_the_cause() {
    let mut w = wired();
    w.bridge.start(StartBot::new("Bob", "example.com"));
    w.send(SessionEventKind::Connection(spawn_at_origin()));
    w.send(SessionEventKind::Viewer(ViewerSignal::Error {
        kind: io::ErrorKind::PermissionDenied,
        message: "denied".to_string(),
    }));
    assert_eq!(
        w.notifier.take(),
        vec![UiNotification::bot_error("Viewer failed to start: denied")]
    );

    w.launcher.fail_next("no runtime");
    w.bridge.start(StartBot::new("Bob", "example.com"));
    // Let the previous viewer confirm its close so the port is free again.
    w.settle();
    w.send(SessionEventKind::Connection(spawn_at_origin()));
    assert_eq!(
        w.notifier.take(),
        vec![UiNotification::bot_error("Viewer initialization failed: no runtime")]
    );
}

#[test]
fn construction_failures_become_bot_errors() {
    let mut w = wired();

    w.bridge.start(StartBot::new("Bob", ""));
    w.connector.fail_next("spawn failed");
    w.bridge.start(StartBot::new("Bob", "example.com"));
    w.connector.panic_next("collaborator exploded");
    w.bridge.start(StartBot::new("Bob", "example.com"));

    let seen = w.notifier.take();
    assert_eq!(seen.len(), 3);
    assert!(seen.iter().all(|n| n.payload().starts_with("Failed to create bot")));
    assert!(seen[1].payload().contains("spawn failed"));
    assert!(seen[2].payload().contains("collaborator exploded"));

    // Still usable afterwards.
    w.bridge.start(StartBot::new("Bob", "example.com"));
    assert_eq!(w.connector.live(), 1);
}

#[test]
fn restart_detaches_previous_manager() {
    let mut w = wired();
    w.bridge.start(StartBot::new("first", "example.com"));
    let first = w.connector.last_session().unwrap();
    w.send(SessionEventKind::Connection(spawn_at_origin()));

    w.bridge.start(StartBot::new("second", "example.com"));
    w.settle();
    // Late events of the first session reach nobody.
    w.bridge
        .dispatch(SessionEvent::viewer(first, ViewerSignal::Client));
    w.bridge.dispatch(SessionEvent::connection(
        first,
        ConnectionEvent::Error { message: "late".to_string() },
    ));

    assert!(w.notifier.seen().is_empty());
    assert_eq!(w.connector.live(), 1);
    assert_eq!(w.launcher.live(), 0);
    assert_eq!(w.connector.ended(), vec![(first, "Manual destroy".to_string())]);
}

#[tokio::test]
async fn orchestrator_runs_commands_and_events_on_one_task() {
    let connector = FakeConnector::new();
    let launcher = FakeLauncher::new();
    let notifier = RecordingNotifier::new();
    let (handle, orchestrator) = Orchestrator::new(
        EngineConfig::default(),
        Arc::new(connector.clone()),
        Arc::new(launcher.clone()),
        Arc::new(notifier.clone()),
    );
    let task = tokio::spawn(orchestrator.run());

    handle.start(StartBot::new("Bob", "example.com")).unwrap();
    let record = wait_for(|| connector.opened().pop()).await;
    record.sink.connection(ConnectionEvent::Login);
    record.sink.connection(spawn_at_origin());
    record.sink.viewer(ViewerSignal::Listening);
    record.sink.viewer(ViewerSignal::Client);

    let seen = wait_for(|| Some(notifier.seen()).filter(|s| !s.is_empty())).await;
    assert_eq!(seen, vec![UiNotification::viewer_ready("http://localhost:3000")]);

    handle.shutdown().await;
    task.await.unwrap();
    assert_eq!(connector.live(), 0);
    assert_eq!(launcher.live(), 0);
    assert!(matches!(
        handle.start(StartBot::new("Bob", "example.com")),
        Err(EngineError::OrchestratorGone)
    ));
}

async fn wait_for<T>(mut probe: impl FnMut() -> Option<T>) -> T {
    for _ in 0..200 {
        if let Some(v) = probe() {
            return v;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}
