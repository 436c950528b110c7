//! Cluster-wide connection pooling.
//!
//! Maps each known address to its own [`SocketConnectionPool`], creating
//! pools as the topology grows and disposing them as addresses retire.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::driver::address::BoltAddress;
use crate::driver::config::{ConnectionSettings, PoolSettings};
use crate::driver::error::{DriverError, DriverResult};
use crate::driver::pool::{PooledConnection, SocketConnectionPool};

struct PoolMap {
    entries: HashMap<BoltAddress, Arc<SocketConnectionPool>>,
    disposed: bool,
}

/// One pool per cluster address, built from a shared settings template.
///
/// The map takes concurrent reads and exclusive writes; `update`,
/// `purge` and `dispose` all serialize on the same write lock, so an
/// update racing a dispose either completes first (its pools are then
/// disposed) or observes disposal and fails without leaving a pool
/// behind.
pub struct ClusterConnectionPool {
    pools: RwLock<PoolMap>,
    connection_settings: ConnectionSettings,
    pool_settings: PoolSettings,
}

impl ClusterConnectionPool {
    /// Empty cluster pool with the given per-pool settings template.
    pub fn new(connection_settings: ConnectionSettings, pool_settings: PoolSettings) -> Self {
        Self {
            pools: RwLock::new(PoolMap {
                entries: HashMap::new(),
                disposed: false,
            }),
            connection_settings,
            pool_settings,
        }
    }

    /// Borrow a connection to `address`, creating its pool on first use.
    pub async fn acquire(&self, address: &BoltAddress) -> DriverResult<PooledConnection> {
        let pool = self.get_or_create(address)?;
        pool.acquire().await
    }

    /// The pool for `address`, if one exists.
    pub fn get(&self, address: &BoltAddress) -> Option<Arc<SocketConnectionPool>> {
        self.pools.read().entries.get(address).cloned()
    }

    /// Whether a pool exists for `address`.
    pub fn contains(&self, address: &BoltAddress) -> bool {
        self.pools.read().entries.contains_key(address)
    }

    /// Number of per-address pools.
    pub fn len(&self) -> usize {
        self.pools.read().entries.len()
    }

    /// True when no pools exist.
    pub fn is_empty(&self) -> bool {
        self.pools.read().entries.is_empty()
    }

    /// Create pools for any of `addresses` not yet present. Called when
    /// routers are prepended, so later acquisitions find their pool.
    pub fn ensure_pools(&self, addresses: &[BoltAddress]) -> DriverResult<()> {
        let mut guard = self.pools.write();
        if guard.disposed {
            return Err(DriverError::PoolDisposed);
        }
        for address in addresses {
            if !guard.entries.contains_key(address) {
                let pool = self.build_pool(address);
                guard.entries.insert(address.clone(), pool);
            }
        }
        Ok(())
    }

    /// Reconcile the pool set with a new topology: create pools for new
    /// addresses, dispose and drop pools for retired ones. Atomic from
    /// the caller's viewpoint.
    pub fn update(&self, addresses: &HashSet<BoltAddress>) -> DriverResult<()> {
        let mut guard = self.pools.write();
        if guard.disposed {
            return Err(DriverError::PoolDisposed);
        }
        for address in addresses {
            if !guard.entries.contains_key(address) {
                let pool = self.build_pool(address);
                guard.entries.insert(address.clone(), pool);
            }
        }
        let retired: Vec<BoltAddress> = guard
            .entries
            .keys()
            .filter(|a| !addresses.contains(*a))
            .cloned()
            .collect();
        for address in retired {
            if let Some(pool) = guard.entries.remove(&address) {
                pool.dispose();
                debug!(address = %address, "retired address, pool disposed");
            }
        }
        Ok(())
    }

    /// Dispose and remove the pool for one address, if present.
    pub fn purge(&self, address: &BoltAddress) {
        let removed = self.pools.write().entries.remove(address);
        if let Some(pool) = removed {
            pool.dispose();
            debug!(address = %address, "pool purged");
        }
    }

    /// Dispose every pool and refuse further use.
    pub fn dispose(&self) {
        let mut guard = self.pools.write();
        guard.disposed = true;
        for (_, pool) in guard.entries.drain() {
            pool.dispose();
        }
    }

    /// Whether the cluster pool has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.pools.read().disposed
    }

    /// Total connections currently borrowed across every address.
    pub fn in_use_count(&self) -> usize {
        self.pools
            .read()
            .entries
            .values()
            .map(|p| p.in_use_count())
            .sum()
    }

    fn get_or_create(&self, address: &BoltAddress) -> DriverResult<Arc<SocketConnectionPool>> {
        {
            let guard = self.pools.read();
            if guard.disposed {
                return Err(DriverError::PoolDisposed);
            }
            if let Some(pool) = guard.entries.get(address) {
                return Ok(pool.clone());
            }
        }
        let mut guard = self.pools.write();
        if guard.disposed {
            return Err(DriverError::PoolDisposed);
        }
        if let Some(pool) = guard.entries.get(address) {
            return Ok(pool.clone());
        }
        let pool = self.build_pool(address);
        guard.entries.insert(address.clone(), pool.clone());
        Ok(pool)
    }

    fn build_pool(&self, address: &BoltAddress) -> Arc<SocketConnectionPool> {
        Arc::new(SocketConnectionPool::new(
            address.clone(),
            self.connection_settings.clone(),
            self.pool_settings.clone(),
        ))
    }
}

impl std::fmt::Debug for ClusterConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let guard = self.pools.read();
        f.debug_struct("ClusterConnectionPool")
            .field("addresses", &guard.entries.keys().collect::<Vec<_>>())
            .field("disposed", &guard.disposed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(host: &str) -> BoltAddress {
        BoltAddress::new(host, 7687)
    }

    fn cluster_pool() -> ClusterConnectionPool {
        ClusterConnectionPool::new(ConnectionSettings::default(), PoolSettings::default())
    }

    #[test]
    fn update_creates_and_retires_pools() {
        let pool = cluster_pool();
        pool.update(&[addr("a"), addr("b")].into_iter().collect()).unwrap();
        assert_eq!(pool.len(), 2);

        let pool_a = pool.get(&addr("a")).unwrap();
        let pool_b = pool.get(&addr("b")).unwrap();

        pool.update(&[addr("b"), addr("c")].into_iter().collect()).unwrap();
        assert_eq!(pool.len(), 2);
        assert!(!pool.contains(&addr("a")));
        assert!(pool.contains(&addr("b")));
        assert!(pool.contains(&addr("c")));

        // A was disposed by the update; B kept its pool instance.
        assert!(pool_a.is_disposed());
        assert!(!pool_b.is_disposed());
        assert!(Arc::ptr_eq(&pool_b, &pool.get(&addr("b")).unwrap()));
    }

    #[test]
    fn dispose_empties_the_map_and_disposes_pools() {
        let pool = cluster_pool();
        pool.update(&[addr("b"), addr("c")].into_iter().collect()).unwrap();
        let pool_b = pool.get(&addr("b")).unwrap();
        let pool_c = pool.get(&addr("c")).unwrap();

        pool.dispose();
        assert!(pool.is_empty());
        assert!(pool.is_disposed());
        assert!(pool_b.is_disposed());
        assert!(pool_c.is_disposed());
    }

    #[test]
    fn update_after_dispose_fails_without_leaving_pools() {
        let pool = cluster_pool();
        pool.dispose();
        let err = pool.update(&[addr("x")].into_iter().collect()).unwrap_err();
        assert!(matches!(err, DriverError::PoolDisposed));
        assert!(pool.is_empty());
    }

    #[test]
    fn ensure_pools_registers_missing_addresses() {
        let pool = cluster_pool();
        pool.ensure_pools(&[addr("u")]).unwrap();
        assert!(pool.contains(&addr("u")));

        let first = pool.get(&addr("u")).unwrap();
        pool.ensure_pools(&[addr("u"), addr("v")]).unwrap();
        // Existing pools survive re-registration.
        assert!(Arc::ptr_eq(&first, &pool.get(&addr("u")).unwrap()));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn purge_removes_one_pool() {
        let pool = cluster_pool();
        pool.update(&[addr("a"), addr("b")].into_iter().collect()).unwrap();
        let pool_a = pool.get(&addr("a")).unwrap();

        pool.purge(&addr("a"));
        assert!(!pool.contains(&addr("a")));
        assert!(pool.contains(&addr("b")));
        assert!(pool_a.is_disposed());

        // Purging an unknown address is a no-op.
        pool.purge(&addr("zzz"));
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn acquire_after_dispose_fails() {
        let pool = cluster_pool();
        pool.dispose();
        let err = pool.acquire(&addr("a")).await.unwrap_err();
        assert!(matches!(err, DriverError::PoolDisposed));
    }

    #[test]
    fn address_equality_keys_the_map_case_insensitively() {
        let pool = cluster_pool();
        pool.ensure_pools(&[addr("Core1")]).unwrap();
        assert!(pool.contains(&addr("core1")));
        assert!(pool.contains(&addr("CORE1")));
    }
}
