//! Engine connection.
//!
//! # Architecture
//!
//! - [`Connection`]: handle to the supervisor task that owns the socket,
//!   the handshake and reconnect scheduling
//! - `machine`: the lifecycle as a pure state machine; the supervisor feeds it
//!   commands, socket events and timer firings and carries out what it returns
//! - [`Config`]: endpoint, settle delay and reconnect policy

pub mod config;
pub mod connection;
pub mod error;
mod machine;

pub use config::{Config, ReconnectConfig};
pub use connection::Connection;
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use machine::{Phase, Status};
