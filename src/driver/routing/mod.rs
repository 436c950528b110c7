//! Causal-cluster routing.
//!
//! - [`table`] - the three-ring routing table with TTL expiry
//! - [`manager`] - table refresh with router eviction and seed fallback
//! - [`cluster_pool`] - one connection pool per cluster address
//! - [`procedure`] - the `getRoutingTable` discovery call
//! - [`load_balancer`] - role-aware acquisition with single-flight refresh
//! - [`cluster_connection`] - fault classification and topology reactions

pub mod cluster_connection;
pub mod cluster_pool;
pub mod load_balancer;
pub mod manager;
pub mod procedure;
pub mod table;

pub use cluster_connection::{ClusterConnection, ClusterErrorHandler, RoutingErrorHandler};
pub use cluster_pool::ClusterConnectionPool;
pub use load_balancer::LoadBalancer;
pub use manager::{Rediscovery, RoutingTableManager, SharedRoutingTable};
pub use procedure::{ProcedureRediscovery, ROUTING_PROCEDURE};
pub use table::RoutingTable;
