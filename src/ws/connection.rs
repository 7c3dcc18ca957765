#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt as _, StreamExt as _};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::sleep;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tokio_util::sync::{CancellationToken, DropGuard};

use super::config::Config;
use super::error::WsError;
use super::machine::{Effect, Input, Machine, SocketId, Status, TimerId};
use crate::registry::SubscriberRegistry;
use crate::{Result, error::Error};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum Command {
    Connect {
        endpoint: Option<String>,
    },
    Disconnect,
    SetEndpoint {
        endpoint: String,
    },
    Send {
        command: String,
        reply: oneshot::Sender<bool>,
    },
    Status {
        reply: oneshot::Sender<Status>,
    },
}

/// Handle to the engine connection supervisor.
///
/// The supervisor is a background task that exclusively owns the connection
/// state. It handles:
/// - Opening the socket and running the engine handshake
/// - Classifying inbound lines and broadcasting them through the [`SubscriberRegistry`]
/// - Scheduling reconnects after an unexpected close
///
/// Handles are cheap to clone. The supervisor stops, closing its socket, once
/// every handle has been dropped.
///
/// # Example
///
/// ```ignore
/// let connection = Connection::new(Config::default(), registry);
/// connection.connect(Some("ws://localhost:8080/ws".to_owned()))?;
///
/// let mut status = connection.status_receiver();
/// status.wait_for(|status| status.ready).await?;
/// assert!(connection.send("go depth 20").await?);
/// ```
#[derive(Clone)]
pub struct Connection {
    /// Commands for the supervisor task
    commands: mpsc::UnboundedSender<Command>,
    /// Latest status published by the supervisor
    status_rx: watch::Receiver<Status>,
}

impl Connection {
    /// Start the supervisor task. Must be called from within a Tokio runtime.
    ///
    /// Nothing is opened until [`Connection::connect`] is called.
    #[must_use]
    pub fn new(config: Config, registry: Arc<SubscriberRegistry>) -> Self {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (supervisor, events_rx) = Supervisor::new(&config, registry);
        let status_rx = supervisor.status_tx.subscribe();

        tokio::spawn(supervisor.run(commands_rx, events_rx));

        Self {
            commands,
            status_rx,
        }
    }

    /// Open the connection, optionally switching endpoint first.
    ///
    /// Does nothing if a socket is already connecting or connected.
    pub fn connect(&self, endpoint: Option<String>) -> Result<()> {
        self.command(Command::Connect { endpoint })
    }

    /// Close the connection and stop reconnecting until the next connect.
    pub fn disconnect(&self) -> Result<()> {
        self.command(Command::Disconnect)
    }

    /// Record the endpoint used by the next connect.
    pub fn set_endpoint<S: Into<String>>(&self, endpoint: S) -> Result<()> {
        self.command(Command::SetEndpoint {
            endpoint: endpoint.into(),
        })
    }

    /// Write a command to the engine.
    ///
    /// Resolves to `false` when not connected; commands are never queued.
    pub async fn send<S: Into<String>>(&self, command: S) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Send {
            command: command.into(),
            reply,
        })?;
        rx.await.map_err(|_e| Error::from(WsError::SupervisorStopped))
    }

    /// Query the supervisor for its current status.
    ///
    /// Ordered after every command issued before it from this handle.
    pub async fn status(&self) -> Result<Status> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Status { reply })?;
        rx.await.map_err(|_e| Error::from(WsError::SupervisorStopped))
    }

    /// Last published status, without a round-trip to the supervisor.
    #[must_use]
    pub fn current_status(&self) -> Status {
        self.status_rx.borrow().clone()
    }

    /// Subscribe to status changes.
    #[must_use]
    pub fn status_receiver(&self) -> watch::Receiver<Status> {
        self.status_rx.clone()
    }

    fn command(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_e| WsError::SupervisorStopped)?;
        Ok(())
    }
}

struct Supervisor {
    machine: Machine,
    registry: Arc<SubscriberRegistry>,
    /// Socket drivers and timers report back through this channel
    events_tx: mpsc::UnboundedSender<Input>,
    status_tx: watch::Sender<Status>,
    /// Writer half of every socket still owned by the supervisor
    sockets: HashMap<SocketId, mpsc::UnboundedSender<String>>,
    settle_timers: HashMap<SocketId, DropGuard>,
    reconnect_timer: Option<(TimerId, DropGuard)>,
}

impl Supervisor {
    fn new(
        config: &Config,
        registry: Arc<SubscriberRegistry>,
    ) -> (Self, mpsc::UnboundedReceiver<Input>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let machine = Machine::new(config);
        let (status_tx, _) = watch::channel(machine.status());

        let supervisor = Self {
            machine,
            registry,
            events_tx,
            status_tx,
            sockets: HashMap::new(),
            settle_timers: HashMap::new(),
            reconnect_timer: None,
        };
        (supervisor, events_rx)
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<Input>,
    ) {
        loop {
            let input = tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => match self.command(command) {
                        Some(input) => input,
                        None => continue,
                    },
                    // Every handle is gone
                    None => break,
                },
                Some(event) = events.recv() => event,
            };

            self.apply(input);
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("Connection supervisor stopped");
    }

    fn command(&mut self, command: Command) -> Option<Input> {
        match command {
            Command::Connect { endpoint } => Some(Input::Connect { endpoint }),
            Command::Disconnect => Some(Input::Disconnect),
            Command::SetEndpoint { endpoint } => Some(Input::SetEndpoint { endpoint }),
            Command::Send { command, reply } => {
                _ = reply.send(self.write(command));
                None
            }
            Command::Status { reply } => {
                _ = reply.send(self.machine.status());
                None
            }
        }
    }

    fn write(&self, command: String) -> bool {
        let Some(socket) = self.machine.writable_socket() else {
            #[cfg(feature = "tracing")]
            tracing::debug!(%command, "Not connected, command dropped");
            return false;
        };

        self.sockets
            .get(&socket)
            .is_some_and(|sender| sender.send(command).is_ok())
    }

    fn apply(&mut self, input: Input) {
        for effect in self.machine.handle(input) {
            self.execute(effect);
        }

        let status = self.machine.status();
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::Open { socket, endpoint } => {
                let (sender, outgoing) = mpsc::unbounded_channel();
                self.sockets.insert(socket, sender);
                tokio::spawn(drive_socket(
                    socket,
                    endpoint,
                    outgoing,
                    self.events_tx.clone(),
                ));
            }
            Effect::Write { socket, command } => {
                if let Some(sender) = self.sockets.get(&socket) {
                    _ = sender.send(command);
                }
            }
            Effect::Close { socket } => {
                // Dropping the writer makes the driver close the socket
                self.sockets.remove(&socket);
                self.settle_timers.remove(&socket);
            }
            Effect::Broadcast(message) => {
                _ = self.registry.broadcast(&message);
            }
            Effect::StartSettleTimer { socket, after } => {
                let guard = self.schedule(after, Input::SettleElapsed { socket });
                self.settle_timers.insert(socket, guard);
            }
            Effect::StartReconnectTimer { timer, after } => {
                let guard = self.schedule(after, Input::ReconnectDue { timer });
                self.reconnect_timer = Some((timer, guard));
            }
            Effect::CancelReconnectTimer { timer } => {
                if self
                    .reconnect_timer
                    .as_ref()
                    .is_some_and(|(pending, _)| *pending == timer)
                {
                    self.reconnect_timer = None;
                }
            }
        }
    }

    /// Deliver `input` after `after`, unless the returned guard is dropped first.
    fn schedule(&self, after: Duration, input: Input) -> DropGuard {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let events = self.events_tx.clone();
        // Deadline counts from now, not from the task's first poll
        let delay = sleep(after);

        tokio::spawn(async move {
            tokio::select! {
                () = cancelled.cancelled() => {}
                () = delay => {
                    _ = events.send(input);
                }
            }
        });

        token.drop_guard()
    }
}

/// Open one socket and pump it until it ends.
///
/// Always finishes by reporting [`Input::Closed`], preceded by
/// [`Input::Errored`] when the socket failed.
async fn drive_socket(
    socket: SocketId,
    endpoint: String,
    mut outgoing: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<Input>,
) {
    match connect_async(endpoint.as_str()).await {
        Ok((ws_stream, _)) => {
            _ = events.send(Input::Opened { socket });

            if let Err(e) = pump(ws_stream, &mut outgoing, &events, socket).await {
                _ = events.send(Input::Errored {
                    socket,
                    reason: e.to_string(),
                });
            }
        }
        Err(e) => {
            let error = WsError::Connection(e);
            #[cfg(feature = "tracing")]
            tracing::warn!(%endpoint, "Unable to connect: {error}");
            _ = events.send(Input::Errored {
                socket,
                reason: error.to_string(),
            });
        }
    }

    _ = events.send(Input::Closed { socket });
}

async fn pump(
    ws_stream: WsStream,
    outgoing: &mut mpsc::UnboundedReceiver<String>,
    events: &mpsc::UnboundedSender<Input>,
    socket: SocketId,
) -> std::result::Result<(), WsError> {
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(text = %text.as_str(), "Received engine frame");
                    _ = events.send(Input::Text {
                        socket,
                        text: text.as_str().to_owned(),
                    });
                }
                Some(Ok(Message::Close(_))) | None => return Ok(()),
                Some(Err(e)) => return Err(WsError::Connection(e)),
                // Binary frames and control frames carry nothing for consumers
                Some(Ok(_)) => {}
            },

            command = outgoing.recv() => match command {
                Some(command) => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(%command, "Sending engine command");
                    write
                        .send(Message::Text(command.into()))
                        .await
                        .map_err(WsError::Connection)?;
                }
                // Supervisor dropped this socket
                None => {
                    _ = write.close().await;
                    return Ok(());
                }
            },
        }
    }
}
