//! Role-aware connection acquisition.
//!
//! The load balancer turns an access mode into a live connection: it
//! refreshes the routing table when stale (coalescing concurrent
//! refreshes into one flight), round-robins an address in the right
//! role, and borrows from the cluster pool, skipping addresses that
//! fail at transport level.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::driver::address::BoltAddress;
use crate::driver::config::DriverConfig;
use crate::driver::error::{DriverError, DriverResult};
use crate::driver::{AccessMode, ConnectionProvider};

use super::cluster_connection::{ClusterConnection, RoutingErrorHandler};
use super::cluster_pool::ClusterConnectionPool;
use super::manager::{Rediscovery, RoutingTableManager, SharedRoutingTable};
use super::procedure::ProcedureRediscovery;

/// Acquires connections by role against the shared routing table.
pub struct LoadBalancer<R: Rediscovery> {
    shared: Arc<SharedRoutingTable>,
    pool: Arc<ClusterConnectionPool>,
    manager: RoutingTableManager<R>,
    error_handler: Arc<RoutingErrorHandler>,
    refresh_lock: tokio::sync::Mutex<()>,
    max_routing_failures: usize,
}

impl LoadBalancer<ProcedureRediscovery> {
    /// Assemble the production routing stack from a configuration: seeded
    /// table, cluster pool, procedure-based rediscovery.
    pub fn routing(config: &DriverConfig) -> Self {
        let seeds = config.routing.initial_routers.clone();
        let shared = Arc::new(SharedRoutingTable::seeded(seeds.clone()));
        let pool = Arc::new(ClusterConnectionPool::new(
            config.connection.clone(),
            config.pool.clone(),
        ));
        let rediscovery =
            ProcedureRediscovery::new(pool.clone(), config.routing.routing_context.clone());
        let manager = RoutingTableManager::new(
            rediscovery,
            shared.clone(),
            pool.clone(),
            seeds,
            config.routing.routing_table_ttl_floor,
        );
        Self::new(manager, config.routing.max_routing_failures)
    }
}

impl<R: Rediscovery> LoadBalancer<R> {
    /// Balance over the table and pool maintained by `manager`.
    pub fn new(manager: RoutingTableManager<R>, max_routing_failures: usize) -> Self {
        let shared = manager.shared().clone();
        let pool = manager.pool().clone();
        let error_handler = Arc::new(RoutingErrorHandler::new(shared.clone(), pool.clone()));
        Self {
            shared,
            pool,
            manager,
            error_handler,
            refresh_lock: tokio::sync::Mutex::new(()),
            max_routing_failures: max_routing_failures.max(1),
        }
    }

    /// The shared routing table.
    pub fn shared(&self) -> &Arc<SharedRoutingTable> {
        &self.shared
    }

    /// The cluster pool.
    pub fn pool(&self) -> &Arc<ClusterConnectionPool> {
        &self.pool
    }

    /// Acquire a connection for `mode`, refreshing the topology when
    /// needed and skipping unreachable addresses a bounded number of
    /// times.
    pub async fn acquire(&self, mode: AccessMode) -> DriverResult<ClusterConnection> {
        self.ensure_fresh(mode).await?;

        let mut failures = 0;
        while failures < self.max_routing_failures {
            let address = self.select_address(mode)?;
            match self.pool.acquire(&address).await {
                Ok(connection) => {
                    return Ok(ClusterConnection::new(
                        connection,
                        address,
                        mode,
                        self.error_handler.clone(),
                    ));
                }
                Err(error) if error.is_connection_fault() => {
                    debug!(address = %address, %error, "address unreachable, removing and retrying");
                    self.shared.remove(&address);
                    failures += 1;
                }
                Err(error) => return Err(error),
            }
        }
        Err(DriverError::service_unavailable(format!(
            "Failed to obtain a connection towards a {} server after {} attempts",
            mode, self.max_routing_failures
        )))
    }

    /// Pick the next address for `mode`, or explain why none exists.
    fn select_address(&self, mode: AccessMode) -> DriverResult<BoltAddress> {
        match self.shared.try_next(mode) {
            Some(address) => Ok(address),
            None => {
                if mode == AccessMode::Write && self.shared.reading_in_absence_of_writer() {
                    Err(DriverError::client(
                        "Writes are not supported in the current topology",
                    ))
                } else {
                    Err(DriverError::session_expired(format!(
                        "Failed to obtain a connection towards a {} server: no known address",
                        mode
                    )))
                }
            }
        }
    }

    /// Refresh the table when stale for `mode`. Concurrent callers wait
    /// on the in-flight refresh instead of launching their own.
    async fn ensure_fresh(&self, mode: AccessMode) -> DriverResult<()> {
        if !self.shared.is_stale(mode) {
            return Ok(());
        }
        let _flight = self.refresh_lock.lock().await;
        if !self.shared.is_stale(mode) {
            // The flight we waited on already refreshed.
            return Ok(());
        }
        self.manager.refresh_with_seed_fallback().await
    }
}

#[async_trait]
impl<R: Rediscovery> ConnectionProvider for LoadBalancer<R> {
    async fn acquire(&self, mode: AccessMode) -> DriverResult<ClusterConnection> {
        LoadBalancer::acquire(self, mode).await
    }
}

impl<R: Rediscovery> std::fmt::Debug for LoadBalancer<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadBalancer")
            .field("table", &self.shared)
            .field("max_routing_failures", &self.max_routing_failures)
            .finish()
    }
}
