//! Line protocol spoken with the engine-control server.
//!
//! Every WebSocket text frame carries exactly one line. A small, closed set of
//! lines are control tokens consumed by the relay; every other line is engine
//! output and is forwarded to consumers verbatim, blank lines included.

/// Subscribe to engine output.
pub const SUBSCRIBE: &str = "sub";
/// Ask the server to identify itself (answered with `iam ...`).
pub const WHO_ARE_YOU: &str = "whoareyou";
/// Ask which engine is attached (answered with `engine ...`).
pub const WHAT_ENGINE: &str = "whatengine";
/// Switch the engine to UCI mode.
pub const UCI: &str = "uci";
/// Readiness probe (answered with `readyok`).
pub const IS_READY: &str = "isready";

/// Commands sent, in order, as soon as the socket opens.
pub const HANDSHAKE: [&str; 3] = [SUBSCRIBE, WHO_ARE_YOU, WHAT_ENGINE];

/// Commands sent once the settle delay has elapsed on a still-open socket.
pub const ENGINE_SETUP: [&str; 2] = [UCI, IS_READY];

const IDENTITY_PREFIX: &str = "iam ";
const ENGINE_PREFIX: &str = "engine ";
const AUTH_OK: &str = "authok";
const AUTH_ERR: &str = "autherr";
const SUBSCRIBE_ACK: &str = "subok";
const READY: &str = "readyok";

/// Classification of a single inbound line.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal<'line> {
    /// Server self-identification, without the `iam ` prefix
    Identity(&'line str),
    /// Engine metadata, without the `engine ` prefix
    Engine(&'line str),
    Authenticated,
    AuthenticationFailed,
    Subscribed,
    Ready,
    /// Anything else: application payload, forwarded unchanged
    Data(&'line str),
}

impl Signal<'_> {
    /// Whether the line is consumed by the relay rather than forwarded.
    #[must_use]
    pub const fn is_control(&self) -> bool {
        !matches!(self, Self::Data(_))
    }
}

/// Classify one line of engine output.
#[must_use]
pub fn classify(line: &str) -> Signal<'_> {
    if let Some(identity) = line.strip_prefix(IDENTITY_PREFIX) {
        return Signal::Identity(identity);
    }
    if let Some(engine) = line.strip_prefix(ENGINE_PREFIX) {
        return Signal::Engine(engine);
    }

    match line {
        AUTH_OK => Signal::Authenticated,
        AUTH_ERR => Signal::AuthenticationFailed,
        SUBSCRIBE_ACK => Signal::Subscribed,
        READY => Signal::Ready,
        _ => Signal::Data(line),
    }
}
