//! Fault-classifying connection wrapper.
//!
//! A [`ClusterConnection`] delegates to a pooled connection and runs
//! every fault through a classifier that knows the connection's access
//! mode and address. Classification mutates routing and pool state as a
//! side effect, then re-raises a narrowed error.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::bolt::{ResponseHandler, Value};
use crate::driver::address::BoltAddress;
use crate::driver::error::{DriverError, DriverResult};
use crate::driver::pool::PooledConnection;
use crate::driver::AccessMode;

use super::cluster_pool::ClusterConnectionPool;
use super::manager::SharedRoutingTable;

/// Reactions to classified cluster faults.
pub trait ClusterErrorHandler: Send + Sync {
    /// The address stopped answering: drop its pool and forget it in
    /// every role.
    fn on_connection_error(&self, address: &BoltAddress);

    /// The address refused a write: forget it as a writer, keep its pool.
    fn on_write_error(&self, address: &BoltAddress);
}

/// Production handler wired to the shared routing table and the cluster
/// pool.
pub struct RoutingErrorHandler {
    shared: Arc<SharedRoutingTable>,
    pool: Arc<ClusterConnectionPool>,
}

impl RoutingErrorHandler {
    /// Handler mutating the given table and pool.
    pub fn new(shared: Arc<SharedRoutingTable>, pool: Arc<ClusterConnectionPool>) -> Self {
        Self { shared, pool }
    }
}

impl ClusterErrorHandler for RoutingErrorHandler {
    fn on_connection_error(&self, address: &BoltAddress) {
        warn!(address = %address, "connection fault, purging address");
        self.pool.purge(address);
        self.shared.remove(address);
    }

    fn on_write_error(&self, address: &BoltAddress) {
        warn!(address = %address, "write refused, demoting writer");
        self.shared.remove_writer(address);
    }
}

/// Classify a fault raised on a connection to `address` in `mode`,
/// invoking the handler's side effects and returning the error to
/// surface.
pub fn classify_fault(
    error: DriverError,
    mode: AccessMode,
    address: &BoltAddress,
    handler: &dyn ClusterErrorHandler,
) -> DriverError {
    if error.is_connection_fault() {
        handler.on_connection_error(address);
        return DriverError::session_expired(format!(
            "Server at {} is no longer available",
            address
        ));
    }
    if let DriverError::Server(server_error) = &error {
        if server_error.is_cluster_error() {
            return match mode {
                AccessMode::Read => DriverError::client(
                    "Write queries cannot be performed in READ access mode",
                ),
                AccessMode::Write => {
                    handler.on_write_error(address);
                    DriverError::session_expired(format!(
                        "Server at {} no longer accepts writes",
                        address
                    ))
                }
            };
        }
    }
    error
}

/// A pooled connection bound to an access mode, with fault interception.
pub struct ClusterConnection {
    inner: PooledConnection,
    address: BoltAddress,
    mode: AccessMode,
    handler: Arc<dyn ClusterErrorHandler>,
}

impl ClusterConnection {
    /// Wrap a pooled connection acquired for `mode` at `address`.
    pub fn new(
        inner: PooledConnection,
        address: BoltAddress,
        mode: AccessMode,
        handler: Arc<dyn ClusterErrorHandler>,
    ) -> Self {
        Self {
            inner,
            address,
            mode,
            handler,
        }
    }

    /// The remote address.
    pub fn address(&self) -> &BoltAddress {
        &self.address
    }

    /// The access mode this connection was acquired for.
    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// Queue a RUN. Faults are classified.
    pub fn run(
        &mut self,
        statement: impl Into<String>,
        parameters: HashMap<String, Value>,
        handler: Box<dyn ResponseHandler>,
    ) -> DriverResult<()> {
        self.inner
            .run(statement, parameters, handler)
            .map_err(|e| self.classify(e))
    }

    /// Queue a PULL_ALL. Faults are classified.
    pub fn pull_all(&mut self, handler: Box<dyn ResponseHandler>) -> DriverResult<()> {
        self.inner.pull_all(handler).map_err(|e| self.classify(e))
    }

    /// Queue a DISCARD_ALL. Faults are classified.
    pub fn discard_all(&mut self, handler: Box<dyn ResponseHandler>) -> DriverResult<()> {
        self.inner.discard_all(handler).map_err(|e| self.classify(e))
    }

    /// Flush and drain responses. Faults are classified.
    pub async fn sync(&mut self) -> DriverResult<()> {
        self.inner.sync().await.map_err(|e| self.classify(e))
    }

    /// Reset the underlying connection. Faults are classified.
    pub async fn reset(&mut self) -> DriverResult<()> {
        self.inner.reset().await.map_err(|e| self.classify(e))
    }

    /// Return the connection to its pool.
    pub fn release(self) {
        self.inner.release();
    }

    fn classify(&self, error: DriverError) -> DriverError {
        classify_fault(error, self.mode, &self.address, self.handler.as_ref())
    }
}

impl std::fmt::Debug for ClusterConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterConnection")
            .field("address", &self.address)
            .field("mode", &self.mode)
            .finish()
    }
}
