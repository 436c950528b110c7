//! Server addresses.

use std::fmt;
use std::hash::{Hash, Hasher};

use super::error::{DriverError, DriverResult};

/// Default Bolt port.
pub const DEFAULT_PORT: u16 = 7687;

/// URI scheme of an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scheme {
    /// Direct connection to a single server.
    #[default]
    Bolt,
    /// Cluster entry point: discover topology and route by role.
    BoltRouting,
}

impl Scheme {
    /// The scheme text, without the `://`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Bolt => "bolt",
            Scheme::BoltRouting => "bolt+routing",
        }
    }
}

/// A server endpoint.
///
/// Equality and hashing compare host case-insensitively and ignore the
/// scheme. Hostnames are never resolved: `localhost` and `127.0.0.1` are
/// different addresses even when they name the same machine.
#[derive(Debug, Clone)]
pub struct BoltAddress {
    /// URI scheme this address was written with.
    pub scheme: Scheme,
    /// Host name or literal IP.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl BoltAddress {
    /// Address with the default `bolt` scheme.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: Scheme::Bolt,
            host: host.into(),
            port,
        }
    }

    /// Address with the `bolt+routing` scheme.
    pub fn routing(host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: Scheme::BoltRouting,
            host: host.into(),
            port,
        }
    }

    /// Parse a full URI: `bolt://host[:port]` or `bolt+routing://host[:port]`.
    pub fn from_uri(uri: &str) -> DriverResult<Self> {
        let (scheme, rest) = if let Some(rest) = uri.strip_prefix("bolt+routing://") {
            (Scheme::BoltRouting, rest)
        } else if let Some(rest) = uri.strip_prefix("bolt://") {
            (Scheme::Bolt, rest)
        } else {
            return Err(DriverError::client(format!(
                "Unsupported URI scheme in {:?}",
                uri
            )));
        };
        let (host, port) = split_host_port(rest)?;
        Ok(Self {
            scheme,
            host: host.to_string(),
            port,
        })
    }

    /// Parse a bare `host[:port]` string, as found in routing tables.
    pub fn parse(s: &str) -> DriverResult<Self> {
        let (host, port) = split_host_port(s)?;
        Ok(Self::new(host, port))
    }

    /// The `host:port` form used for TCP connects.
    pub fn to_socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn split_host_port(s: &str) -> DriverResult<(&str, u16)> {
    let s = s.trim_end_matches('/');
    if s.is_empty() {
        return Err(DriverError::client("Address is empty"));
    }
    match s.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => {
            let port = port
                .parse()
                .map_err(|_| DriverError::client(format!("Invalid port in address {:?}", s)))?;
            if host.is_empty() {
                return Err(DriverError::client("Address has no host"));
            }
            Ok((host, port))
        }
        Some(_) => Err(DriverError::client(format!("Invalid address {:?}", s))),
        None => Ok((s, DEFAULT_PORT)),
    }
}

impl PartialEq for BoltAddress {
    fn eq(&self, other: &Self) -> bool {
        self.port == other.port && self.host.eq_ignore_ascii_case(&other.host)
    }
}

impl Eq for BoltAddress {}

impl Hash for BoltAddress {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.host.as_bytes() {
            state.write_u8(b.to_ascii_lowercase());
        }
        state.write_u16(self.port);
    }
}

impl fmt::Display for BoltAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl Default for BoltAddress {
    fn default() -> Self {
        Self::new("localhost", DEFAULT_PORT)
    }
}
