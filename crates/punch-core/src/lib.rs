//! punch-core — rendezvous wire format and configuration.
//! All other Punch crates depend on this one.

pub mod config;
pub mod wire;

pub use wire::{Keepalive, Request, Response, WireError};
