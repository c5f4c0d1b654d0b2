//! Benchlink – control plane for laboratory test equipment
//!
//! Many independent hardware-controlling server processes expose a uniform
//! command interface that remote proxies invoke over the network, while a
//! central registry tracks which servers are alive and where to reach them.
//! This crate implements that control plane:
//! - A declarative command schema that generates a matched client-proxy /
//!   server-dispatcher pair without per-command boilerplate
//! - A newline-delimited JSON transport with a point-to-point client channel
//!   and a multiplexed, identity-addressed server endpoint
//! - A service registry with heartbeat leases, background eviction, and a
//!   self-healing registration client
//! - A control-server scaffold tying dispatcher and registration together
//!
//! Device drivers, persistence back-ends, and GUIs are external collaborators
//! consumed through the command protocol; they are not part of this crate.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod channel;
pub mod command;
pub mod config;
pub mod error;
pub mod registry;
pub mod server;

// Re-export key types for convenience
pub use config::CoreConfig;
pub use error::{Error, Result};

/// Current version of the benchlink crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol version for control-plane communication
pub const PROTOCOL_VERSION: &str = "1.0.0";
