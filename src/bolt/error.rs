//! Wire-layer error type.

use std::fmt;
use std::io;

use super::packstream::PackStreamError;

/// Result type for wire-layer operations.
pub type BoltResult<T> = Result<T, BoltError>;

/// Errors raised below the driver layer: socket faults, codec faults and
/// framing violations. The driver layer classifies these into its own
/// taxonomy.
#[derive(Debug)]
pub enum BoltError {
    /// I/O error on the underlying stream
    Io(io::Error),

    /// PackStream encode/decode error
    PackStream(PackStreamError),

    /// Framing or message-level protocol violation
    Protocol(String),
}

impl fmt::Display for BoltError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoltError::Io(e) => write!(f, "I/O error: {}", e),
            BoltError::PackStream(e) => write!(f, "PackStream error: {}", e),
            BoltError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
        }
    }
}

impl std::error::Error for BoltError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BoltError::Io(e) => Some(e),
            BoltError::PackStream(e) => Some(e),
            BoltError::Protocol(_) => None,
        }
    }
}

impl From<io::Error> for BoltError {
    fn from(err: io::Error) -> Self {
        BoltError::Io(err)
    }
}

impl From<PackStreamError> for BoltError {
    fn from(err: PackStreamError) -> Self {
        BoltError::PackStream(err)
    }
}
