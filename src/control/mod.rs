//! Request/response API used by consumers.
//!
//! A request names an `operation` plus its parameters and always gets a
//! [`Response`] back; failures are reported in the response, never raised.

pub mod request;
mod surface;

pub use request::{Request, Response};
pub use surface::ControlSurface;
