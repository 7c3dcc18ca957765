#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod control;
pub mod error;
pub mod host;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod store;
pub mod types;
pub mod ws;

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;
