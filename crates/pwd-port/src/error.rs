//! Error types for the port worker.

use std::path::PathBuf;

use pwd_protocol::etf::EtfError;
use pwd_protocol::{ProtocolError, TermError};
use thiserror::Error;

/// Result type for worker operations.
pub type PortResult<T> = Result<T, PortError>;

/// Errors that can stop a worker or prevent it from starting.
#[derive(Debug, Error)]
pub enum PortError {
    /// The diagnostic log could not be opened; fatal at startup.
    #[error("couldn't open diagnostic log {}: {source}", path.display())]
    LogOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Channel framing or I/O failure.
    #[error("channel error: {0}")]
    Channel(#[from] ProtocolError),

    /// A reply term could not be built.
    #[error("term error: {0}")]
    Term(#[from] TermError),

    /// A reply term could not be serialized.
    #[error("encoding error: {0}")]
    Etf(#[from] EtfError),

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// A configured value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
