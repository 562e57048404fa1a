//! pwd-port: the passwd database behind an Erlang port.
//!
//! The host spawns the `pwd-port` binary and exchanges length-prefixed
//! packets with it over stdin/stdout. Each request packet is one command
//! (lookup by uid, lookup by name, enumerate all); each reply packet is one
//! term in Erlang external format.
//!
//! - [`directory`]: passwd lookups and the scoped enumeration cursor
//! - [`diagnostic`]: the append-only diagnostic log file
//! - [`worker`]: the command worker that ties both to the channel
//! - [`config`]: layered TOML/env configuration

pub mod config;
pub mod diagnostic;
pub mod directory;
pub mod error;
pub mod worker;

pub use directory::{AccountDirectory, SystemDirectory};
pub use error::{PortError, PortResult};
pub use worker::{Phase, Worker};
