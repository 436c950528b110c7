//! Driver layer: connections, pooling and routing over the Bolt wire
//! protocol.

pub mod address;
pub mod config;
pub mod connection;
pub mod error;
pub mod pool;
pub mod routing;

pub use address::{BoltAddress, Scheme};
pub use config::{
    AuthToken, ConnectionSettings, DriverConfig, DriverConfigBuilder, EncryptionLevel,
    PoolSettings, RoutingSettings, TrustStrategy,
};
pub use connection::Connection;
pub use error::{DriverError, DriverResult, ServerError};
pub use pool::{PoolMetrics, PooledConnection, SocketConnectionPool};
pub use routing::{
    ClusterConnection, ClusterConnectionPool, LoadBalancer, RoutingTable, RoutingTableManager,
};

use async_trait::async_trait;
use std::fmt;

/// Whether a unit of work reads or writes, deciding which ring of the
/// routing table serves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AccessMode {
    /// Routed to a reader.
    Read,
    /// Routed to the writer. The default.
    #[default]
    Write,
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessMode::Read => write!(f, "READ"),
            AccessMode::Write => write!(f, "WRITE"),
        }
    }
}

/// The acquisition boundary consumed by sessions: hand out a connection
/// fit for the requested access mode.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// Acquire a connection for `mode`.
    async fn acquire(&self, mode: AccessMode) -> DriverResult<ClusterConnection>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_mode_display() {
        assert_eq!(AccessMode::Read.to_string(), "READ");
        assert_eq!(AccessMode::Write.to_string(), "WRITE");
        assert_eq!(AccessMode::default(), AccessMode::Write);
    }
}
