//! Routing table.
//!
//! Three ordered address rings (routers, readers, writers), each with its
//! own round-robin cursor, plus a creation instant and a TTL received
//! from the server.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::driver::address::BoltAddress;
use crate::driver::AccessMode;

/// One round-robin ring of addresses.
#[derive(Debug, Default)]
struct Ring {
    addresses: Vec<BoltAddress>,
    cursor: AtomicUsize,
}

impl Ring {
    fn new(addresses: Vec<BoltAddress>) -> Self {
        Self {
            addresses,
            cursor: AtomicUsize::new(0),
        }
    }

    fn try_next(&self) -> Option<BoltAddress> {
        if self.addresses.is_empty() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.addresses.len();
        Some(self.addresses[index].clone())
    }

    fn remove(&mut self, address: &BoltAddress) {
        self.addresses.retain(|a| a != address);
    }

    fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    fn len(&self) -> usize {
        self.addresses.len()
    }
}

impl Clone for Ring {
    fn clone(&self) -> Self {
        Self {
            addresses: self.addresses.clone(),
            cursor: AtomicUsize::new(self.cursor.load(Ordering::Relaxed)),
        }
    }
}

/// Cluster topology by role, with round-robin selection and TTL expiry.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    routers: Ring,
    readers: Ring,
    writers: Ring,
    created_at: Instant,
    ttl: Duration,
}

impl RoutingTable {
    /// A table with explicit role membership and TTL.
    pub fn new(
        routers: Vec<BoltAddress>,
        readers: Vec<BoltAddress>,
        writers: Vec<BoltAddress>,
        ttl: Duration,
    ) -> Self {
        Self {
            routers: Ring::new(routers),
            readers: Ring::new(readers),
            writers: Ring::new(writers),
            created_at: Instant::now(),
            ttl,
        }
    }

    /// The bootstrap table: seed routers only, already stale so the first
    /// acquisition triggers discovery.
    pub fn seeded(seeds: Vec<BoltAddress>) -> Self {
        Self::new(seeds, Vec::new(), Vec::new(), Duration::ZERO)
    }

    /// Round-robin the ring serving `mode`. `None` only when that ring is
    /// empty.
    pub fn try_next(&self, mode: AccessMode) -> Option<BoltAddress> {
        match mode {
            AccessMode::Read => self.readers.try_next(),
            AccessMode::Write => self.writers.try_next(),
        }
    }

    /// Snapshot of the routers ring in order, for the discovery walk.
    pub fn routers(&self) -> Vec<BoltAddress> {
        self.routers.addresses.clone()
    }

    /// True when the table can no longer serve `mode`: TTL elapsed, no
    /// routers left to refresh from, or the role's ring is empty.
    pub fn is_stale(&self, mode: AccessMode) -> bool {
        self.created_at.elapsed() >= self.ttl
            || self.routers.is_empty()
            || match mode {
                AccessMode::Read => self.readers.is_empty(),
                AccessMode::Write => self.writers.is_empty(),
            }
    }

    /// Move the given addresses to the front of the routers ring,
    /// deduplicated, and rewind the cursor so they are served next.
    pub fn prepend_routers(&mut self, addresses: &[BoltAddress]) {
        let mut fronted: Vec<BoltAddress> = Vec::with_capacity(addresses.len() + self.routers.len());
        for address in addresses {
            if !fronted.contains(address) {
                fronted.push(address.clone());
            }
        }
        for existing in &self.routers.addresses {
            if !fronted.contains(existing) {
                fronted.push(existing.clone());
            }
        }
        self.routers = Ring::new(fronted);
    }

    /// Forget an address in every role.
    pub fn remove(&mut self, address: &BoltAddress) {
        self.routers.remove(address);
        self.readers.remove(address);
        self.writers.remove(address);
    }

    /// Forget an address as a writer only.
    pub fn remove_writer(&mut self, address: &BoltAddress) {
        self.writers.remove(address);
    }

    /// The union of all three rings.
    pub fn all(&self) -> HashSet<BoltAddress> {
        self.routers
            .addresses
            .iter()
            .chain(&self.readers.addresses)
            .chain(&self.writers.addresses)
            .cloned()
            .collect()
    }

    /// Router count.
    pub fn router_count(&self) -> usize {
        self.routers.len()
    }

    /// Reader count.
    pub fn reader_count(&self) -> usize {
        self.readers.len()
    }

    /// Writer count.
    pub fn writer_count(&self) -> usize {
        self.writers.len()
    }

    /// The TTL this table was created with.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Clamp the TTL from below. Servers may hand out TTLs shorter than
    /// the operator wants to honor.
    pub fn apply_ttl_floor(&mut self, floor: Duration) {
        if self.ttl < floor {
            self.ttl = floor;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(host: &str) -> BoltAddress {
        BoltAddress::new(host, 7687)
    }

    fn table(routers: &[&str], readers: &[&str], writers: &[&str], ttl: Duration) -> RoutingTable {
        RoutingTable::new(
            routers.iter().map(|h| addr(h)).collect(),
            readers.iter().map(|h| addr(h)).collect(),
            writers.iter().map(|h| addr(h)).collect(),
            ttl,
        )
    }

    #[test]
    fn round_robin_cycles() {
        let t = table(&["r"], &["a", "b"], &["w"], Duration::from_secs(60));
        assert_eq!(t.try_next(AccessMode::Read), Some(addr("a")));
        assert_eq!(t.try_next(AccessMode::Read), Some(addr("b")));
        assert_eq!(t.try_next(AccessMode::Read), Some(addr("a")));
        assert_eq!(t.try_next(AccessMode::Write), Some(addr("w")));
        assert_eq!(t.try_next(AccessMode::Write), Some(addr("w")));
    }

    #[test]
    fn empty_ring_yields_none() {
        let t = table(&["r"], &["a"], &[], Duration::from_secs(60));
        assert_eq!(t.try_next(AccessMode::Write), None);
        assert_eq!(t.try_next(AccessMode::Read), Some(addr("a")));
    }

    #[test]
    fn staleness_by_ttl() {
        let t = table(&["r"], &["a"], &["w"], Duration::ZERO);
        assert!(t.is_stale(AccessMode::Read));
        assert!(t.is_stale(AccessMode::Write));

        let t = table(&["r"], &["a"], &["w"], Duration::from_secs(60));
        assert!(!t.is_stale(AccessMode::Read));
        assert!(!t.is_stale(AccessMode::Write));
    }

    #[test]
    fn staleness_by_missing_role() {
        let t = table(&["r"], &["a"], &[], Duration::from_secs(60));
        assert!(!t.is_stale(AccessMode::Read));
        assert!(t.is_stale(AccessMode::Write));

        let t = table(&["r"], &[], &["w"], Duration::from_secs(60));
        assert!(t.is_stale(AccessMode::Read));
        assert!(!t.is_stale(AccessMode::Write));
    }

    #[test]
    fn no_routers_means_stale() {
        let t = table(&[], &["a"], &["w"], Duration::from_secs(60));
        assert!(t.is_stale(AccessMode::Read));
        assert!(t.is_stale(AccessMode::Write));
    }

    #[test]
    fn seeded_table_is_stale() {
        let t = RoutingTable::seeded(vec![addr("seed")]);
        assert!(t.is_stale(AccessMode::Read));
        assert_eq!(t.router_count(), 1);
        assert_eq!(t.reader_count(), 0);
    }

    #[test]
    fn prepend_moves_to_front_without_duplicates() {
        let mut t = table(&["a", "b", "c"], &[], &[], Duration::from_secs(60));
        t.prepend_routers(&[addr("b"), addr("x"), addr("x")]);
        assert_eq!(
            t.routers(),
            vec![addr("b"), addr("x"), addr("a"), addr("c")]
        );
    }

    #[test]
    fn prepended_routers_are_next_in_rotation() {
        let t = table(&["a", "b"], &["a", "b"], &[], Duration::from_secs(60));
        // Advance the reader ring so the cursor is nonzero, then check the
        // router ring after a prepend still starts with the new head.
        t.try_next(AccessMode::Read);
        let mut t = t;
        t.prepend_routers(&[addr("u")]);
        assert_eq!(t.routers()[0], addr("u"));
    }

    #[test]
    fn remove_drops_address_from_every_role() {
        let mut t = table(&["a", "b"], &["a"], &["a", "w"], Duration::from_secs(60));
        t.remove(&addr("a"));
        assert_eq!(t.routers(), vec![addr("b")]);
        assert_eq!(t.reader_count(), 0);
        assert_eq!(t.try_next(AccessMode::Write), Some(addr("w")));
    }

    #[test]
    fn remove_writer_keeps_other_roles() {
        let mut t = table(&["a"], &["a"], &["a"], Duration::from_secs(60));
        t.remove_writer(&addr("a"));
        assert_eq!(t.writer_count(), 0);
        assert_eq!(t.router_count(), 1);
        assert_eq!(t.reader_count(), 1);
    }

    #[test]
    fn all_is_the_union() {
        let t = table(&["a", "b"], &["b", "c"], &["c"], Duration::from_secs(60));
        let all = t.all();
        assert_eq!(all.len(), 3);
        assert!(all.contains(&addr("a")));
        assert!(all.contains(&addr("b")));
        assert!(all.contains(&addr("c")));
    }

    #[test]
    fn one_address_may_hold_every_role() {
        let t = table(&["a"], &["a"], &["a"], Duration::from_secs(60));
        assert_eq!(t.try_next(AccessMode::Read), Some(addr("a")));
        assert_eq!(t.try_next(AccessMode::Write), Some(addr("a")));
        assert_eq!(t.all().len(), 1);
    }
}
