use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identity of a consumer (a browser tab, a local socket, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConsumerId(u64);

impl ConsumerId {
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Event fanned out to every subscribed consumer.
///
/// Serialized adjacently tagged, e.g. `{"type":"connected"}` or
/// `{"type":"data","data":"info depth 12 score cp 31"}`.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum OutboundMessage {
    /// The engine socket opened and the handshake was sent
    Connected,
    /// The engine socket closed, remotely or on request
    Disconnected,
    /// The engine answered the readiness probe
    Ready,
    /// Transport-level failure on the engine socket
    Error(String),
    /// A line of engine output that is not a control token
    Data(String),
}
