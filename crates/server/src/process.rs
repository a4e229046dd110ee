//! Connection collaborator backed by an external game-client process.
//!
//! The child gets the target and protocol options as flags and reports
//! lifecycle events as JSON lines on stdout:
//!
//! ```text
//! {"event":"login"}
//! {"event":"spawn","position":{"x":0.5,"y":64,"z":-3.5}}
//! {"event":"move","position":{"x":1.5,"y":64,"z":-3.5}}
//! {"event":"error","message":"ECONNRESET"}
//! {"event":"kicked","reason":"banned"}
//! {"event":"end","reason":"socketClosed"}
//! ```
//!
//! `end` is requested with `{"cmd":"end","reason":"..."}` on stdin.

use botview_engine::{
    BotConnection, ClientConfig, ConnectOptions, ConnectionEvent, Connector, EngineError,
    ServerAddress, SessionSink,
};
use botview_protocol::{Position, WorldSnapshot};
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, watch};

const END_GRACE: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum WireEvent {
    Login,
    Spawn {
        #[serde(default)]
        position: Option<Position>,
    },
    Move {
        position: Position,
    },
    Error {
        message: String,
    },
    Kicked {
        #[serde(default)]
        reason: serde_json::Value,
    },
    End {
        #[serde(default)]
        reason: serde_json::Value,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "cmd", rename_all = "lowercase")]
pub enum WireCommand {
    End { reason: String },
}

/// Reasons may arrive as chat components rather than plain strings.
fn reason_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub fn parse_line(line: &str) -> Option<WireEvent> {
    let line = line.trim();
    if !line.starts_with('{') {
        return None;
    }
    serde_json::from_str(line).ok()
}

/// Update the world view and forward lifecycle events. Returns true on `end`.
pub fn apply_event(
    event: WireEvent,
    world: &watch::Sender<WorldSnapshot>,
    events: &SessionSink,
) -> bool {
    match event {
        WireEvent::Login => events.connection(ConnectionEvent::Login),
        WireEvent::Spawn { position } => {
            world.send_modify(|w| {
                w.spawned = true;
                if position.is_some() {
                    w.position = position;
                }
            });
            events.connection(ConnectionEvent::Spawn { position });
        }
        WireEvent::Move { position } => world.send_modify(|w| w.position = Some(position)),
        WireEvent::Error { message } => events.connection(ConnectionEvent::Error { message }),
        WireEvent::Kicked { reason } => events.connection(ConnectionEvent::Kicked {
            reason: reason_text(&reason),
        }),
        WireEvent::End { reason } => {
            events.connection(ConnectionEvent::End {
                reason: reason_text(&reason),
            });
            return true;
        }
    }
    false
}

#[derive(Debug, Clone)]
pub struct ProcessConnector {
    client: ClientConfig,
}

impl ProcessConnector {
    pub fn new(client: ClientConfig) -> Self {
        Self { client }
    }

    fn command(&self, target: &ServerAddress, username: &str, options: &ConnectOptions) -> Command {
        let mut cmd = Command::new(&self.client.program);
        cmd.args(&self.client.args)
            .arg("--host")
            .arg(&target.host)
            .arg("--port")
            .arg(target.port.to_string())
            .arg("--username")
            .arg(username)
            .arg("--version")
            .arg(&options.version)
            .arg("--auth")
            .arg(options.auth.as_str())
            .arg("--check-timeout-ms")
            .arg(options.check_timeout.as_millis().to_string());
        if options.hide_errors {
            cmd.arg("--hide-errors");
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl Connector for ProcessConnector {
    fn open(
        &self,
        target: &ServerAddress,
        username: &str,
        options: &ConnectOptions,
        events: SessionSink,
    ) -> botview_engine::Result<Box<dyn BotConnection>> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| EngineError::Connect(e.to_string()))?;
        let _guard = runtime.enter();

        let mut child = self.command(target, username, options).spawn().map_err(|e| {
            EngineError::Connect(format!("spawn {}: {e}", self.client.program))
        })?;
        tracing::info!(
            session = %events.session(),
            pid = ?child.id(),
            %target,
            "game client started"
        );

        let (world_tx, world_rx) = watch::channel(WorldSnapshot::new(username));
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let stdin = child.stdin.take();
        runtime.spawn(supervise(child, stdin, commands_rx, world_tx, events));

        Ok(Box::new(ProcessConnection {
            commands: commands_tx,
            world: world_rx,
        }))
    }
}

struct ProcessConnection {
    commands: mpsc::UnboundedSender<WireCommand>,
    world: watch::Receiver<WorldSnapshot>,
}

impl BotConnection for ProcessConnection {
    fn end(&mut self, reason: &str) {
        let _ = self.commands.send(WireCommand::End {
            reason: reason.to_string(),
        });
    }

    fn world(&self) -> watch::Receiver<WorldSnapshot> {
        self.world.clone()
    }
}

async fn supervise(
    mut child: Child,
    mut stdin: Option<ChildStdin>,
    mut commands: mpsc::UnboundedReceiver<WireCommand>,
    world: watch::Sender<WorldSnapshot>,
    events: SessionSink,
) {
    let session = events.session();
    let Some(stdout) = child.stdout.take() else {
        events.connection(ConnectionEvent::End {
            reason: "client has no stdout".to_string(),
        });
        return;
    };
    let mut stdout = BufReader::new(stdout).lines();
    let mut stderr = child.stderr.take().map(|s| BufReader::new(s).lines());

    let mut ended = false;
    let mut commands_open = true;
    let mut kill_at: Option<tokio::time::Instant> = None;

    loop {
        tokio::select! {
            line = stdout.next_line() => match line {
                Ok(Some(line)) => match parse_line(&line) {
                    Some(event) => ended |= apply_event(event, &world, &events),
                    None => tracing::debug!(%session, "client: {line}"),
                },
                Ok(None) => break,
                Err(e) => {
                    events.connection(ConnectionEvent::Error { message: e.to_string() });
                    break;
                }
            },
            line = next_stderr(&mut stderr) => match line {
                Some(line) => tracing::debug!(%session, "client stderr: {line}"),
                None => stderr = None,
            },
            command = commands.recv(), if commands_open => match command {
                Some(command) => {
                    write_command(&mut stdin, &command).await;
                    kill_at.get_or_insert(tokio::time::Instant::now() + END_GRACE);
                }
                None => {
                    commands_open = false;
                    // Dropped after end(): the grace deadline still applies.
                    if kill_at.is_none() {
                        let _ = child.start_kill();
                    }
                }
            },
            _ = sleep_until(kill_at) => {
                tracing::warn!(%session, "client ignored end request, killing");
                kill_at = None;
                let _ = child.start_kill();
            }
        }
    }

    let status = child.wait().await;
    if !ended {
        let reason = match status {
            Ok(status) => format!("client exited: {status}"),
            Err(e) => format!("client exited: {e}"),
        };
        events.connection(ConnectionEvent::End { reason });
    }
}

async fn next_stderr(
    stderr: &mut Option<tokio::io::Lines<BufReader<tokio::process::ChildStderr>>>,
) -> Option<String> {
    match stderr {
        Some(lines) => lines.next_line().await.ok().flatten(),
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn write_command(stdin: &mut Option<ChildStdin>, command: &WireCommand) {
    let Some(pipe) = stdin.as_mut() else {
        return;
    };
    let mut line = match serde_json::to_string(command) {
        Ok(line) => line,
        Err(e) => {
            tracing::error!("encode client command: {e}");
            return;
        }
    };
    line.push('\n');
    if let Err(e) = pipe.write_all(line.as_bytes()).await {
        tracing::debug!("client stdin closed: {e}");
        *stdin = None;
    }
}
