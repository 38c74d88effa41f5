//! TCP bridge to a game-client sidecar.
//!
//! The sidecar speaks newline-delimited JSON. We write commands tagged by
//! `op` and read events tagged by `event`. One I/O task per session owns the
//! socket. The [`BridgeSession`] handle only touches a shared world view and
//! a command queue, so every handle method returns without awaiting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use warden_core::{
    Direction, Identity, MovementIntent, PeerSample, Position, SessionConnection,
    SessionConnector, SessionError, SessionEvent, SessionHandle,
};

use crate::error::EngineError;

const EVENT_QUEUE: usize = 256;

#[derive(Clone, Debug)]
pub struct BridgeConfig {
    pub host: String,
    pub port: u16,
    pub protocol_version: String,
    pub command_queue: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 25570,
            protocol_version: "1.12.2".to_string(),
            command_queue: 64,
        }
    }
}

impl BridgeConfig {
    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Outbound command line.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BridgeCommand {
    Login { username: String, version: String },
    Move { direction: Direction, jump: bool },
    Clear,
    Quit,
}

/// Inbound event line.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BridgeMessage {
    Login,
    Spawn,
    Position { x: f64, y: f64, z: f64 },
    Peers { peers: Vec<PeerSample> },
    Chat { username: String, message: String },
    Kicked { reason: String },
    End,
    Error { message: String },
}

/// What the sidecar has told us about the world so far.
#[derive(Debug, Default)]
struct WorldView {
    spawned: bool,
    position: Option<Position>,
    peers: Vec<PeerSample>,
}

/// Fold one inbound line into the view, returning the session event it maps
/// to. Peer updates only refresh the view.
fn apply_line(view: &RwLock<WorldView>, line: &str) -> Result<Option<SessionEvent>, EngineError> {
    let msg: BridgeMessage = serde_json::from_str(line)?;
    let event = match msg {
        BridgeMessage::Login => Some(SessionEvent::LoggedIn),
        BridgeMessage::Spawn => {
            view.write().spawned = true;
            Some(SessionEvent::Spawned)
        }
        BridgeMessage::Position { x, y, z } => {
            view.write().position = Some(Position::new(x, y, z));
            Some(SessionEvent::PositionTick)
        }
        BridgeMessage::Peers { peers } => {
            view.write().peers = peers;
            None
        }
        BridgeMessage::Chat { username, message } => Some(SessionEvent::Chat {
            who: username,
            text: message,
        }),
        BridgeMessage::Kicked { reason } => Some(SessionEvent::Kicked { reason }),
        BridgeMessage::End => Some(SessionEvent::Ended),
        BridgeMessage::Error { message } => Some(SessionEvent::Errored { message }),
    };
    Ok(event)
}

async fn write_command<W>(writer: &mut W, command: &BridgeCommand) -> Result<(), EngineError>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(command)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Connector that opens one sidecar connection per session.
pub struct BridgeConnector {
    config: BridgeConfig,
}

impl BridgeConnector {
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }
}

impl SessionConnector for BridgeConnector {
    fn connect(&self, identity: &Identity) -> Result<SessionConnection, SessionError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SessionError::ConnectFailed(e.to_string()))?;

        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE);
        let (command_tx, command_rx) = mpsc::channel(self.config.command_queue.max(1));
        let session = Arc::new(BridgeSession {
            identity: identity.clone(),
            view: Arc::new(RwLock::new(WorldView::default())),
            commands: command_tx,
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        });

        let login = BridgeCommand::Login {
            username: identity.to_string(),
            version: self.config.protocol_version.clone(),
        };
        runtime.spawn(run_bridge(
            self.config.addr(),
            login,
            Arc::clone(&session.view),
            command_rx,
            event_tx,
            session.cancel.clone(),
        ));

        Ok(SessionConnection {
            handle: session,
            events: event_rx,
        })
    }
}

/// Socket owner for one session. Ends on the first terminal event, on EOF,
/// on an I/O error, or when the handle disconnects.
async fn run_bridge(
    addr: String,
    login: BridgeCommand,
    view: Arc<RwLock<WorldView>>,
    mut commands: mpsc::Receiver<BridgeCommand>,
    events: mpsc::Sender<SessionEvent>,
    cancel: CancellationToken,
) {
    let stream = tokio::select! {
        _ = cancel.cancelled() => return,
        stream = TcpStream::connect(&addr) => stream,
    };
    let stream = match stream {
        Ok(s) => s,
        Err(e) => {
            let _ = events
                .send(SessionEvent::Errored {
                    message: format!("connect to {addr}: {e}"),
                })
                .await;
            return;
        }
    };
    debug!(%addr, "bridge connected");

    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    if let Err(e) = write_command(&mut writer, &login).await {
        let _ = events.send(SessionEvent::Errored { message: e.to_string() }).await;
        return;
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                if let Err(e) = write_command(&mut writer, &BridgeCommand::Quit).await {
                    debug!(error = %e, "quit not delivered");
                }
                let _ = writer.shutdown().await;
                break;
            }
            command = commands.recv() => {
                let Some(command) = command else { break };
                if let Err(e) = write_command(&mut writer, &command).await {
                    let _ = events.send(SessionEvent::Errored { message: e.to_string() }).await;
                    break;
                }
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => match apply_line(&view, &line) {
                    Ok(Some(event)) => {
                        let terminal = event.is_terminal();
                        if events.send(event).await.is_err() || terminal {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "malformed bridge line skipped"),
                },
                Ok(None) => {
                    let _ = events.send(SessionEvent::Ended).await;
                    break;
                }
                Err(e) => {
                    let _ = events.send(SessionEvent::Errored { message: e.to_string() }).await;
                    break;
                }
            },
        }
    }
    info!(%addr, "bridge closed");
}

pub struct BridgeSession {
    identity: Identity,
    view: Arc<RwLock<WorldView>>,
    commands: mpsc::Sender<BridgeCommand>,
    closed: AtomicBool,
    cancel: CancellationToken,
}

impl BridgeSession {
    fn enqueue(&self, command: BridgeCommand) -> Result<(), SessionError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SessionError::Closed);
        }
        self.commands.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                SessionError::Transport("bridge command queue full".into())
            }
            mpsc::error::TrySendError::Closed(_) => SessionError::Closed,
        })
    }
}

impl SessionHandle for BridgeSession {
    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn set_movement(&self, intent: MovementIntent) -> Result<(), SessionError> {
        self.enqueue(BridgeCommand::Move {
            direction: intent.direction,
            jump: intent.jump,
        })
    }

    fn clear_movement(&self) -> Result<(), SessionError> {
        self.enqueue(BridgeCommand::Clear)
    }

    fn self_position(&self) -> Option<Position> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        let view = self.view.read();
        if !view.spawned {
            return None;
        }
        view.position
    }

    fn peers(&self) -> Vec<PeerSample> {
        self.view.read().peers.clone()
    }

    fn disconnect(&self) -> Result<(), SessionError> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.cancel.cancel();
        }
        Ok(())
    }
}
