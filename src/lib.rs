//! # Bolt Driver
//!
//! A client driver for graph databases speaking the Bolt wire protocol,
//! with causal-cluster routing.
//!
//! ## Features
//!
//! - **Bolt protocol v1** - chunked framing, PackStream values, graph
//!   structures
//! - **Async/Await** - built on Tokio
//! - **Connection pooling** - bounded per-address pools with idle reuse
//! - **Cluster routing** - role-based routing tables with TTL expiry,
//!   seed fallback and automatic eviction of failed servers
//!
//! ## Acquiring connections
//!
//! The driver core hands out connections through a
//! [`ConnectionProvider`]: a [`LoadBalancer`] assembled from a
//! [`DriverConfig`] keeps the cluster topology fresh and routes each
//! acquisition to a server in the right role.
//!
//! ```rust,no_run
//! use bolt_driver::{AccessMode, AuthToken, BoltAddress, DriverConfig, LoadBalancer};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DriverConfig::builder()
//!     .with_auth(AuthToken::basic("user", "password"))
//!     .with_initial_router(BoltAddress::from_uri("bolt+routing://core1:7687")?)
//!     .build();
//!
//! let balancer = LoadBalancer::routing(&config);
//! let mut connection = balancer.acquire(AccessMode::Read).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`bolt`] - the wire protocol: PackStream, chunking, handshake,
//!   messages
//! - [`driver`] - connections, pools, routing tables and the load
//!   balancer

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod bolt;
pub mod driver;

pub use bolt::{
    BoltError, ChunkedInput, ChunkedOutput, FailureDetail, MessageFormat, PackStreamError,
    PackType, ProtocolVersion, Request, Response, ResponseHandler, ServerVersion, Value,
};
pub use bolt::packstream::{Node, Path, PathSegment, Relationship, UnboundRelationship};
pub use driver::{
    AccessMode, AuthToken, BoltAddress, ClusterConnection, ClusterConnectionPool, Connection,
    ConnectionProvider, ConnectionSettings, DriverConfig, DriverConfigBuilder, DriverError,
    DriverResult, EncryptionLevel, LoadBalancer, PoolSettings, PooledConnection, RoutingSettings,
    RoutingTable, RoutingTableManager, Scheme, ServerError, SocketConnectionPool, TrustStrategy,
};
