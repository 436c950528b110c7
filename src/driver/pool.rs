//! Per-address connection pool.
//!
//! Holds initialized idle connections for one server address, bounded by
//! a semaphore whose permits travel with the borrowed connection: a
//! cancelled acquire releases its permit through RAII and can never leak
//! capacity.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::{debug, warn};

use super::address::BoltAddress;
use super::config::{ConnectionSettings, PoolSettings};
use super::connection::Connection;
use super::error::{DriverError, DriverResult};

/// Counters describing a pool's current and lifetime activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolMetrics {
    /// Idle connections available for reuse.
    pub idle: usize,
    /// Connections currently borrowed.
    pub in_use: usize,
    /// Lifetime count of connections created.
    pub total_created: u64,
    /// Lifetime count of connections destroyed.
    pub total_closed: u64,
    /// Lifetime count of successful acquisitions.
    pub total_acquisitions: u64,
}

/// Bounded pool of initialized connections to a single address.
pub struct SocketConnectionPool {
    address: BoltAddress,
    connection_settings: ConnectionSettings,
    pool_settings: PoolSettings,
    idle: Mutex<VecDeque<(Connection, OwnedSemaphorePermit)>>,
    capacity: Arc<Semaphore>,
    disposed: AtomicBool,
    in_use: AtomicUsize,
    total_created: AtomicU64,
    total_closed: AtomicU64,
    total_acquisitions: AtomicU64,
}

impl SocketConnectionPool {
    /// Pool for `address` with the given settings.
    pub fn new(
        address: BoltAddress,
        connection_settings: ConnectionSettings,
        pool_settings: PoolSettings,
    ) -> Self {
        let capacity = Arc::new(Semaphore::new(pool_settings.max_connection_pool_size));
        Self {
            address,
            connection_settings,
            pool_settings,
            idle: Mutex::new(VecDeque::new()),
            capacity,
            disposed: AtomicBool::new(false),
            in_use: AtomicUsize::new(0),
            total_created: AtomicU64::new(0),
            total_closed: AtomicU64::new(0),
            total_acquisitions: AtomicU64::new(0),
        }
    }

    /// The address this pool serves.
    pub fn address(&self) -> &BoltAddress {
        &self.address
    }

    /// Borrow a connection: reuse an idle one, or create a new one while
    /// under the cap. At the cap, waits up to the acquisition timeout.
    pub async fn acquire(self: &Arc<Self>) -> DriverResult<PooledConnection> {
        if self.is_disposed() {
            return Err(DriverError::PoolDisposed);
        }

        if let Some(entry) = self.pop_idle() {
            return Ok(self.borrowed(entry));
        }

        let acquire = self.capacity.clone().acquire_owned();
        let permit = timeout(self.pool_settings.connection_acquisition_timeout, acquire)
            .await
            .map_err(|_| {
                DriverError::client(format!(
                    "Failed to obtain a connection to {} from the pool within {:?}",
                    self.address, self.pool_settings.connection_acquisition_timeout
                ))
            })?
            // The semaphore only closes on dispose.
            .map_err(|_| DriverError::PoolDisposed)?;

        // A release may have repopulated the idle queue while we waited.
        if let Some(entry) = self.pop_idle() {
            drop(permit);
            return Ok(self.borrowed(entry));
        }

        let connection = Connection::connect(&self.address, &self.connection_settings).await?;
        self.total_created.fetch_add(1, Ordering::Relaxed);

        if self.is_disposed() {
            // Disposed while connecting: the new connection dies here.
            self.total_closed.fetch_add(1, Ordering::Relaxed);
            return Err(DriverError::PoolDisposed);
        }
        Ok(self.borrowed((connection, permit)))
    }

    fn borrowed(self: &Arc<Self>, entry: (Connection, OwnedSemaphorePermit)) -> PooledConnection {
        self.total_acquisitions.fetch_add(1, Ordering::Relaxed);
        self.in_use.fetch_add(1, Ordering::Relaxed);
        PooledConnection {
            entry: Some(entry),
            pool: Arc::downgrade(self),
        }
    }

    fn pop_idle(&self) -> Option<(Connection, OwnedSemaphorePermit)> {
        let mut idle = self.idle.lock();
        while let Some((connection, permit)) = idle.pop_front() {
            if connection.is_healthy() {
                return Some((connection, permit));
            }
            self.total_closed.fetch_add(1, Ordering::Relaxed);
        }
        None
    }

    /// Return a borrowed connection. Healthy and quiescent connections go
    /// back to idle; anything else is destroyed. Called from the guard's
    /// `Drop` as well.
    fn release(&self, connection: Connection, permit: OwnedSemaphorePermit) {
        self.in_use.fetch_sub(1, Ordering::Relaxed);

        if self.is_disposed() {
            self.total_closed.fetch_add(1, Ordering::Relaxed);
            return;
        }
        if connection.is_healthy() && !connection.has_outstanding() {
            self.idle.lock().push_back((connection, permit));
        } else {
            debug!(address = %self.address, "destroying unhealthy connection on release");
            self.total_closed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Destroy every pooled connection and refuse further acquires.
    /// Returns false when the pool was already disposed.
    pub fn dispose(&self) -> bool {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.capacity.close();
        let drained: Vec<_> = { self.idle.lock().drain(..).collect() };
        let closed = drained.len() as u64;
        drop(drained);
        self.total_closed.fetch_add(closed, Ordering::Relaxed);
        debug!(address = %self.address, closed, "pool disposed");
        true
    }

    /// Whether the pool has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Current idle count.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// Current borrowed count.
    pub fn in_use_count(&self) -> usize {
        self.in_use.load(Ordering::Relaxed)
    }

    /// Snapshot of the pool counters.
    pub fn metrics(&self) -> PoolMetrics {
        PoolMetrics {
            idle: self.idle_count(),
            in_use: self.in_use_count(),
            total_created: self.total_created.load(Ordering::Relaxed),
            total_closed: self.total_closed.load(Ordering::Relaxed),
            total_acquisitions: self.total_acquisitions.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for SocketConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketConnectionPool")
            .field("address", &self.address)
            .field("idle", &self.idle_count())
            .field("in_use", &self.in_use_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl Drop for SocketConnectionPool {
    fn drop(&mut self) {
        if !self.is_disposed() && !self.idle.lock().is_empty() {
            warn!(address = %self.address, "pool dropped without dispose");
        }
    }
}

/// A borrowed connection. Dereferences to [`Connection`]; returning to
/// the pool happens on drop, destroying instead when the connection is
/// no longer fit for reuse.
pub struct PooledConnection {
    entry: Option<(Connection, OwnedSemaphorePermit)>,
    pool: Weak<SocketConnectionPool>,
}

impl PooledConnection {
    /// Explicitly return the connection to its pool.
    pub fn release(mut self) {
        self.give_back();
    }

    fn give_back(&mut self) {
        if let Some((connection, permit)) = self.entry.take() {
            if let Some(pool) = self.pool.upgrade() {
                pool.release(connection, permit);
            }
        }
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // The entry is only vacated on drop/release, after which the
        // guard is no longer reachable.
        &self.entry.as_ref().unwrap().0
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        &mut self.entry.as_mut().unwrap().0
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.give_back();
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.entry {
            Some((connection, _)) => f
                .debug_struct("PooledConnection")
                .field("connection", connection)
                .finish(),
            None => f.write_str("PooledConnection(released)"),
        }
    }
}
