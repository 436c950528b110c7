//! Routing table maintenance.
//!
//! The manager owns the shared routing table and refreshes it by walking
//! the routers ring: borrow a connection to each router in turn, run the
//! discovery fetch, and accept the first usable table. Routers that fail
//! are evicted; seed URIs are prepended as a fallback when the ring runs
//! dry.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::driver::address::BoltAddress;
use crate::driver::error::{DriverError, DriverResult};
use crate::driver::AccessMode;

use super::cluster_pool::ClusterConnectionPool;
use super::table::RoutingTable;

/// The routing table and its companion flag, shared between the manager,
/// the load balancer and the error handler. All mutation happens under
/// this one lock, never held across an await.
pub struct SharedRoutingTable {
    table: Mutex<RoutingTable>,
    reading_in_absence_of_writer: AtomicBool,
}

impl SharedRoutingTable {
    /// Bootstrap from seed routers; the table starts stale.
    pub fn seeded(seeds: Vec<BoltAddress>) -> Self {
        Self {
            table: Mutex::new(RoutingTable::seeded(seeds)),
            reading_in_absence_of_writer: AtomicBool::new(false),
        }
    }

    /// Round-robin an address for `mode`.
    pub fn try_next(&self, mode: AccessMode) -> Option<BoltAddress> {
        self.table.lock().try_next(mode)
    }

    /// Staleness for `mode`.
    pub fn is_stale(&self, mode: AccessMode) -> bool {
        self.table.lock().is_stale(mode)
    }

    /// Snapshot of the routers ring.
    pub fn routers(&self) -> Vec<BoltAddress> {
        self.table.lock().routers()
    }

    /// Evict an address from every role.
    pub fn remove(&self, address: &BoltAddress) {
        self.table.lock().remove(address);
    }

    /// Evict an address from the writers ring only.
    pub fn remove_writer(&self, address: &BoltAddress) {
        self.table.lock().remove_writer(address);
    }

    /// Move addresses to the front of the routers ring.
    pub fn prepend_routers(&self, addresses: &[BoltAddress]) {
        self.table.lock().prepend_routers(addresses);
    }

    /// Install a freshly accepted table and the writer-absence flag.
    pub fn replace(&self, table: RoutingTable, reading_in_absence_of_writer: bool) {
        *self.table.lock() = table;
        self.reading_in_absence_of_writer
            .store(reading_in_absence_of_writer, Ordering::SeqCst);
    }

    /// Whether the last accepted table had readers but no writer.
    pub fn reading_in_absence_of_writer(&self) -> bool {
        self.reading_in_absence_of_writer.load(Ordering::SeqCst)
    }

    /// A clone of the current table.
    pub fn snapshot(&self) -> RoutingTable {
        self.table.lock().clone()
    }
}

impl std::fmt::Debug for SharedRoutingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRoutingTable")
            .field("table", &*self.table.lock())
            .field(
                "reading_in_absence_of_writer",
                &self.reading_in_absence_of_writer(),
            )
            .finish()
    }
}

/// Discovery seam: borrow a connection to a router, then fetch a new
/// routing table over it.
///
/// Splitting the two steps lets the manager treat them differently: any
/// acquisition failure evicts the router and moves on, while fetch
/// failures are classified by kind.
#[async_trait]
pub trait Rediscovery: Send + Sync {
    /// The borrowed connection type.
    type Connection: Send;

    /// Borrow a connection to the router.
    async fn acquire(&self, router: &BoltAddress) -> DriverResult<Self::Connection>;

    /// Run the discovery procedure over the connection.
    async fn fetch(&self, connection: &mut Self::Connection) -> DriverResult<RoutingTable>;
}

/// Maintains the shared routing table against a [`Rediscovery`] source.
pub struct RoutingTableManager<R: Rediscovery> {
    rediscovery: R,
    shared: Arc<SharedRoutingTable>,
    pool: Arc<ClusterConnectionPool>,
    seeds: Vec<BoltAddress>,
    ttl_floor: Duration,
}

impl<R: Rediscovery> RoutingTableManager<R> {
    /// Manager over the shared table, refreshing through `rediscovery`
    /// and keeping `pool` membership in step with the topology.
    pub fn new(
        rediscovery: R,
        shared: Arc<SharedRoutingTable>,
        pool: Arc<ClusterConnectionPool>,
        seeds: Vec<BoltAddress>,
        ttl_floor: Duration,
    ) -> Self {
        Self {
            rediscovery,
            shared,
            pool,
            seeds,
            ttl_floor,
        }
    }

    /// The shared routing table this manager maintains.
    pub fn shared(&self) -> &Arc<SharedRoutingTable> {
        &self.shared
    }

    /// The cluster pool kept in step with the topology.
    pub fn pool(&self) -> &Arc<ClusterConnectionPool> {
        &self.pool
    }

    /// The discovery source.
    pub fn rediscovery(&self) -> &R {
        &self.rediscovery
    }

    /// Walk the routers ring until a table is accepted. Returns `Ok(true)`
    /// on acceptance, `Ok(false)` when the ring is exhausted. Attempted
    /// routers are added to `tried`.
    pub async fn update_routing_table(
        &self,
        tried: &mut HashSet<BoltAddress>,
    ) -> DriverResult<bool> {
        let routers = self.shared.routers();
        for router in routers {
            tried.insert(router.clone());

            let mut connection = match self.rediscovery.acquire(&router).await {
                Ok(connection) => connection,
                Err(error) => {
                    warn!(router = %router, %error, "router unreachable, evicting");
                    self.shared.remove(&router);
                    continue;
                }
            };

            match self.rediscovery.fetch(&mut connection).await {
                Ok(table) => {
                    if table.reader_count() == 0 {
                        debug!(router = %router, "discarding routing table with no readers");
                        continue;
                    }
                    let absent_writer = table.writer_count() == 0;
                    self.accept(table, absent_writer)?;
                    return Ok(true);
                }
                Err(error) => match error {
                    DriverError::ServiceUnavailable(_)
                    | DriverError::Protocol(_)
                    | DriverError::Authentication(_)
                    | DriverError::Security(_) => return Err(error),
                    DriverError::SessionExpired(_) | DriverError::Io(_) => {
                        warn!(router = %router, %error, "discovery failed, evicting router");
                        self.shared.remove(&router);
                        continue;
                    }
                    other => return Err(other),
                },
            }
        }
        Ok(false)
    }

    /// Refresh the table, falling back to the seed routers when the
    /// current ring cannot produce one.
    pub async fn refresh_with_seed_fallback(&self) -> DriverResult<()> {
        let mut tried = HashSet::new();

        if self.shared.reading_in_absence_of_writer() {
            // The last table had no writer; go straight back to the seeds
            // in the hope of finding a recovered cluster.
            self.prepend_and_register(&self.seeds)?;
            if self.update_routing_table(&mut tried).await? {
                return Ok(());
            }
        } else if self.update_routing_table(&mut tried).await? {
            return Ok(());
        }

        let untried: Vec<BoltAddress> = self
            .seeds
            .iter()
            .filter(|seed| !tried.contains(*seed))
            .cloned()
            .collect();
        if !untried.is_empty() {
            self.prepend_and_register(&untried)?;
            if self.update_routing_table(&mut tried).await? {
                return Ok(());
            }
        }

        Err(DriverError::service_unavailable(
            "Failed to connect to any routing server",
        ))
    }

    fn accept(&self, mut table: RoutingTable, absent_writer: bool) -> DriverResult<()> {
        table.apply_ttl_floor(self.ttl_floor);
        self.pool.update(&table.all())?;
        debug!(
            routers = table.router_count(),
            readers = table.reader_count(),
            writers = table.writer_count(),
            ttl = ?table.ttl(),
            "routing table accepted"
        );
        self.shared.replace(table, absent_writer);
        Ok(())
    }

    fn prepend_and_register(&self, addresses: &[BoltAddress]) -> DriverResult<()> {
        self.shared.prepend_routers(addresses);
        self.pool.ensure_pools(addresses)
    }
}
