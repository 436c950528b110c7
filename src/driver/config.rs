//! Driver configuration.
//!
//! Settings are immutable value objects assembled once and passed at
//! construction; nothing here is process-global.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::bolt::Value;

use super::address::BoltAddress;

/// Authentication token, passed through to the server unexamined inside
/// the INIT message.
#[derive(Debug, Clone, Default)]
pub struct AuthToken {
    entries: HashMap<String, Value>,
}

impl AuthToken {
    /// No authentication.
    pub fn none() -> Self {
        let mut entries = HashMap::new();
        entries.insert("scheme".to_string(), Value::String("none".into()));
        Self { entries }
    }

    /// Username/password authentication.
    pub fn basic(principal: impl Into<String>, credentials: impl Into<String>) -> Self {
        let mut entries = HashMap::new();
        entries.insert("scheme".to_string(), Value::String("basic".into()));
        entries.insert("principal".to_string(), Value::String(principal.into()));
        entries.insert("credentials".to_string(), Value::String(credentials.into()));
        Self { entries }
    }

    /// An arbitrary token map for custom schemes.
    pub fn custom(entries: HashMap<String, Value>) -> Self {
        Self { entries }
    }

    /// The token as the map sent on the wire.
    pub fn as_map(&self) -> &HashMap<String, Value> {
        &self.entries
    }

    /// Clone the token into an owned map.
    pub fn to_map(&self) -> HashMap<String, Value> {
        self.entries.clone()
    }
}

/// Whether transport encryption is required, opportunistic, or off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncryptionLevel {
    /// Refuse to operate without encryption.
    Required,
    /// Encrypt when available.
    Optional,
    /// Plaintext only.
    #[default]
    Disabled,
}

/// How server certificates are trusted when encryption is on. The TLS
/// handshake itself is performed by the embedding layer; the driver only
/// carries the choice.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TrustStrategy {
    /// Trust any certificate.
    All,
    /// Trust the system CA store.
    #[default]
    SystemCa,
    /// Trust certificates signed by the CA at the given path.
    CustomCa(PathBuf),
}

/// Settings used when establishing and initializing one connection.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Client name sent in INIT.
    pub user_agent: String,
    /// Authentication token sent in INIT.
    pub auth_token: AuthToken,
    /// Transport encryption requirement.
    pub encryption: EncryptionLevel,
    /// Certificate trust strategy.
    pub trust: TrustStrategy,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            user_agent: format!("bolt-driver/{}", env!("CARGO_PKG_VERSION")),
            auth_token: AuthToken::none(),
            encryption: EncryptionLevel::Disabled,
            trust: TrustStrategy::default(),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// Settings for each per-address connection pool.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Connection cap per address.
    pub max_connection_pool_size: usize,
    /// How long an acquire may wait at capacity before failing.
    pub connection_acquisition_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connection_pool_size: 500,
            connection_acquisition_timeout: Duration::from_secs(60),
        }
    }
}

/// Settings for cluster routing.
#[derive(Debug, Clone)]
pub struct RoutingSettings {
    /// Seed routers contacted when discovery has nothing else to go on.
    pub initial_routers: Vec<BoltAddress>,
    /// Lower bound applied to server-supplied routing table TTLs.
    pub routing_table_ttl_floor: Duration,
    /// Context map forwarded to the routing procedure.
    pub routing_context: HashMap<String, String>,
    /// How many failed addresses an acquire may skip before giving up.
    pub max_routing_failures: usize,
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            initial_routers: Vec::new(),
            routing_table_ttl_floor: Duration::ZERO,
            routing_context: HashMap::new(),
            max_routing_failures: 3,
        }
    }
}

/// Complete driver configuration.
#[derive(Debug, Clone, Default)]
pub struct DriverConfig {
    /// Connection establishment settings.
    pub connection: ConnectionSettings,
    /// Per-address pool settings.
    pub pool: PoolSettings,
    /// Routing settings.
    pub routing: RoutingSettings,
}

impl DriverConfig {
    /// Start building a configuration.
    pub fn builder() -> DriverConfigBuilder {
        DriverConfigBuilder::default()
    }
}

/// Builder for [`DriverConfig`].
#[derive(Debug, Clone, Default)]
pub struct DriverConfigBuilder {
    config: DriverConfig,
}

impl DriverConfigBuilder {
    /// Set the authentication token.
    pub fn with_auth(mut self, auth: AuthToken) -> Self {
        self.config.connection.auth_token = auth;
        self
    }

    /// Set the user agent.
    pub fn with_user_agent(mut self, agent: impl Into<String>) -> Self {
        self.config.connection.user_agent = agent.into();
        self
    }

    /// Set the encryption level.
    pub fn with_encryption(mut self, level: EncryptionLevel) -> Self {
        self.config.connection.encryption = level;
        self
    }

    /// Set the trust strategy.
    pub fn with_trust(mut self, trust: TrustStrategy) -> Self {
        self.config.connection.trust = trust;
        self
    }

    /// Set the TCP connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection.connect_timeout = timeout;
        self
    }

    /// Set the per-address pool cap.
    pub fn with_max_connection_pool_size(mut self, size: usize) -> Self {
        self.config.pool.max_connection_pool_size = size;
        self
    }

    /// Set the pool acquisition timeout.
    pub fn with_connection_acquisition_timeout(mut self, timeout: Duration) -> Self {
        self.config.pool.connection_acquisition_timeout = timeout;
        self
    }

    /// Add a seed router.
    pub fn with_initial_router(mut self, router: BoltAddress) -> Self {
        self.config.routing.initial_routers.push(router);
        self
    }

    /// Set the routing table TTL floor.
    pub fn with_routing_table_ttl_floor(mut self, floor: Duration) -> Self {
        self.config.routing.routing_table_ttl_floor = floor;
        self
    }

    /// Add a routing context entry.
    pub fn with_routing_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config
            .routing
            .routing_context
            .insert(key.into(), value.into());
        self
    }

    /// Finish building.
    pub fn build(self) -> DriverConfig {
        self.config
    }
}
