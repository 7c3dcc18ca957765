//! Connection lifecycle as a transport-independent state machine.
//!
//! Every trigger (a command, a socket event, a timer firing) becomes an
//! [`Input`]; [`Machine::handle`] updates the phase and returns the [`Effect`]s
//! the supervisor must carry out. Sockets and timers carry identities so that
//! events from a superseded socket or a replaced timer are ignored.

use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff as _;
use serde::Serialize;

use super::config::Config;
use crate::protocol::{self, Signal};
use crate::types::OutboundMessage;

/// Lifecycle phase of the engine connection.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum_macros::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Phase {
    /// No connect request was ever made
    Idle,
    /// Socket open in progress
    Connecting,
    /// Socket open, handshake sent
    Open,
    /// Engine answered the readiness probe
    Ready,
    /// Socket closed or failed
    Closed,
}

impl Phase {
    /// `Open` or `Ready`: commands can be written.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Open | Self::Ready)
    }

    /// A socket exists or is being opened, so connect requests are no-ops.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Open | Self::Ready)
    }
}

/// Snapshot answered by a status query.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Status {
    pub connected: bool,
    pub ready: bool,
    pub endpoint: String,
    pub phase: Phase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SocketId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct TimerId(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Input {
    Connect { endpoint: Option<String> },
    Disconnect,
    SetEndpoint { endpoint: String },
    Opened { socket: SocketId },
    Text { socket: SocketId, text: String },
    Errored { socket: SocketId, reason: String },
    Closed { socket: SocketId },
    SettleElapsed { socket: SocketId },
    ReconnectDue { timer: TimerId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Effect {
    Open { socket: SocketId, endpoint: String },
    Write { socket: SocketId, command: String },
    Close { socket: SocketId },
    Broadcast(OutboundMessage),
    StartSettleTimer { socket: SocketId, after: Duration },
    StartReconnectTimer { timer: TimerId, after: Duration },
    CancelReconnectTimer { timer: TimerId },
}

pub(crate) struct Machine {
    phase: Phase,
    endpoint: String,
    socket: Option<SocketId>,
    reconnect: Option<TimerId>,
    /// Set by an explicit disconnect, cleared by the next connect
    manual: bool,
    settle_delay: Duration,
    max_attempts: Option<u32>,
    /// Reconnects scheduled since the last successful open
    attempts: u32,
    backoff: ExponentialBackoff,
    next_id: u64,
}

impl Machine {
    pub(crate) fn new(config: &Config) -> Self {
        Self {
            phase: Phase::Idle,
            endpoint: config.endpoint.clone(),
            socket: None,
            reconnect: None,
            manual: false,
            settle_delay: config.settle_delay,
            max_attempts: config.reconnect.max_attempts,
            attempts: 0,
            backoff: config.reconnect.clone().into(),
            next_id: 0,
        }
    }

    pub(crate) fn status(&self) -> Status {
        Status {
            connected: self.phase.is_connected(),
            ready: self.phase == Phase::Ready,
            endpoint: self.endpoint.clone(),
            phase: self.phase,
        }
    }

    /// The socket a command may be written to, if any.
    pub(crate) fn writable_socket(&self) -> Option<SocketId> {
        self.socket.filter(|_| self.phase.is_connected())
    }

    pub(crate) fn handle(&mut self, input: Input) -> Vec<Effect> {
        let mut effects = Vec::new();

        match input {
            Input::Connect { endpoint } => self.connect(endpoint, &mut effects),
            Input::Disconnect => self.disconnect(&mut effects),
            Input::SetEndpoint { endpoint } => {
                #[cfg(feature = "tracing")]
                tracing::info!(%endpoint, "Endpoint set");
                self.endpoint = endpoint;
            }
            Input::Opened { socket } => self.opened(socket, &mut effects),
            Input::Text { socket, text } => self.text(socket, &text, &mut effects),
            Input::Errored { socket, reason } => self.errored(socket, reason, &mut effects),
            Input::Closed { socket } => self.closed(socket, &mut effects),
            Input::SettleElapsed { socket } => self.settle_elapsed(socket, &mut effects),
            Input::ReconnectDue { timer } => self.reconnect_due(timer, &mut effects),
        }

        effects
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn is_current(&self, socket: SocketId) -> bool {
        self.socket == Some(socket)
    }

    fn connect(&mut self, endpoint: Option<String>, effects: &mut Vec<Effect>) {
        if self.phase.is_active() {
            #[cfg(feature = "tracing")]
            tracing::debug!(phase = %self.phase, "Already connected or connecting");
            return;
        }

        if let Some(endpoint) = endpoint {
            self.endpoint = endpoint;
        }
        self.manual = false;
        self.cancel_reconnect(effects);

        // A socket that errored but has not reported its close yet
        if let Some(stale) = self.socket.take() {
            effects.push(Effect::Close { socket: stale });
        }

        let socket = SocketId(self.next_id());
        self.socket = Some(socket);
        self.phase = Phase::Connecting;

        #[cfg(feature = "tracing")]
        tracing::info!(endpoint = %self.endpoint, "Connecting");

        effects.push(Effect::Open {
            socket,
            endpoint: self.endpoint.clone(),
        });
    }

    fn disconnect(&mut self, effects: &mut Vec<Effect>) {
        self.cancel_reconnect(effects);
        if let Some(socket) = self.socket.take() {
            effects.push(Effect::Close { socket });
        }
        self.manual = true;
        self.phase = Phase::Closed;

        #[cfg(feature = "tracing")]
        tracing::info!("Disconnected on request");

        effects.push(Effect::Broadcast(OutboundMessage::Disconnected));
    }

    fn opened(&mut self, socket: SocketId, effects: &mut Vec<Effect>) {
        if !self.is_current(socket) {
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::info!(endpoint = %self.endpoint, "Connected");

        self.phase = Phase::Open;
        self.attempts = 0;
        self.backoff.reset();

        effects.extend(protocol::HANDSHAKE.iter().map(|command| Effect::Write {
            socket,
            command: (*command).to_owned(),
        }));
        effects.push(Effect::StartSettleTimer {
            socket,
            after: self.settle_delay,
        });
        effects.push(Effect::Broadcast(OutboundMessage::Connected));
    }

    fn settle_elapsed(&mut self, socket: SocketId, effects: &mut Vec<Effect>) {
        // The socket may have closed while the timer was pending
        if !self.is_current(socket) || !self.phase.is_connected() {
            return;
        }

        effects.extend(protocol::ENGINE_SETUP.iter().map(|command| Effect::Write {
            socket,
            command: (*command).to_owned(),
        }));
    }

    fn text(&mut self, socket: SocketId, text: &str, effects: &mut Vec<Effect>) {
        if !self.is_current(socket) {
            return;
        }

        match protocol::classify(text) {
            Signal::Ready => {
                #[cfg(feature = "tracing")]
                tracing::info!("Engine ready");
                self.phase = Phase::Ready;
                effects.push(Effect::Broadcast(OutboundMessage::Ready));
            }
            Signal::Data(data) => {
                effects.push(Effect::Broadcast(OutboundMessage::Data(data.to_owned())));
            }
            control => log_control(control),
        }
    }

    fn errored(&mut self, socket: SocketId, reason: String, effects: &mut Vec<Effect>) {
        if !self.is_current(socket) {
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::warn!(%reason, "Engine socket error");

        // Reconnect is driven by the close that follows
        self.phase = Phase::Closed;
        effects.push(Effect::Broadcast(OutboundMessage::Error(reason)));
    }

    fn closed(&mut self, socket: SocketId, effects: &mut Vec<Effect>) {
        if !self.is_current(socket) {
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::info!("Engine socket closed");

        self.socket = None;
        self.phase = Phase::Closed;
        effects.push(Effect::Close { socket });
        effects.push(Effect::Broadcast(OutboundMessage::Disconnected));

        if !self.manual {
            self.schedule_reconnect(effects);
        }
    }

    fn schedule_reconnect(&mut self, effects: &mut Vec<Effect>) {
        self.cancel_reconnect(effects);

        if let Some(max) = self.max_attempts
            && self.attempts >= max
        {
            #[cfg(feature = "tracing")]
            tracing::warn!(attempts = self.attempts, "Giving up on reconnecting");
            return;
        }

        let Some(after) = self.backoff.next_backoff() else {
            return;
        };

        self.attempts = self.attempts.saturating_add(1);
        let timer = TimerId(self.next_id());
        self.reconnect = Some(timer);

        #[cfg(feature = "tracing")]
        tracing::debug!(attempt = self.attempts, ?after, "Reconnect scheduled");

        effects.push(Effect::StartReconnectTimer { timer, after });
    }

    fn cancel_reconnect(&mut self, effects: &mut Vec<Effect>) {
        if let Some(timer) = self.reconnect.take() {
            effects.push(Effect::CancelReconnectTimer { timer });
        }
    }

    fn reconnect_due(&mut self, timer: TimerId, effects: &mut Vec<Effect>) {
        // Cancelled or replaced after it fired
        if self.reconnect != Some(timer) {
            return;
        }
        self.reconnect = None;

        #[cfg(feature = "tracing")]
        tracing::info!("Auto-reconnecting");

        self.connect(None, effects);
    }
}

fn log_control(signal: Signal<'_>) {
    #[cfg(feature = "tracing")]
    match signal {
        Signal::Identity(identity) => tracing::info!(%identity, "Server identified"),
        Signal::Engine(engine) => tracing::info!(%engine, "Engine announced"),
        Signal::Authenticated => tracing::info!("Authenticated"),
        Signal::AuthenticationFailed => tracing::warn!("Authentication failed"),
        Signal::Subscribed => tracing::info!("Subscribed to engine output"),
        Signal::Ready | Signal::Data(_) => {}
    }
    #[cfg(not(feature = "tracing"))]
    let _ = signal;
}
