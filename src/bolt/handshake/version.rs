//! Protocol and server version types.

use std::fmt;

/// A negotiated Bolt protocol version, as exchanged during the handshake
/// (one 32-bit big-endian integer per proposal slot).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ProtocolVersion {
    /// Protocol version 1.
    V1 = 1,
}

impl ProtocolVersion {
    /// Versions this driver proposes, in order of preference. Unused
    /// handshake slots are filled with zero.
    pub const PROPOSED: [u32; 4] = [ProtocolVersion::V1 as u32, 0, 0, 0];

    /// Interpret a raw handshake reply. Zero is "no common version" and
    /// yields `None`, as does any version the driver does not speak.
    pub fn from_raw(value: u32) -> Option<Self> {
        match value {
            1 => Some(ProtocolVersion::V1),
            _ => None,
        }
    }

    /// The raw 32-bit form.
    pub fn as_raw(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_raw())
    }
}

/// A server product version, parsed from the agent string in the INIT
/// SUCCESS metadata (for example `"Neo4j/3.2.1"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ServerVersion {
    /// Major version.
    pub major: u32,
    /// Minor version.
    pub minor: u32,
    /// Patch version.
    pub patch: u32,
}

impl ServerVersion {
    /// First server version whose PackStream dialect includes byte arrays.
    pub const BYTES_SUPPORT: ServerVersion = ServerVersion::new(3, 2, 0);

    /// Build a version from its parts.
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    /// Parse `"Product/major.minor.patch"`. Missing trailing components
    /// default to zero; anything unparseable yields `None`.
    pub fn from_agent(agent: &str) -> Option<Self> {
        let version = agent.rsplit('/').next()?;
        let mut parts = version.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next().map_or(Some(0), |p| p.parse().ok())?;
        let patch = parts
            .next()
            // Tolerate suffixes like "3.2.0-alpha01".
            .map_or(Some(0), |p| {
                p.split(|c: char| !c.is_ascii_digit())
                    .next()
                    .and_then(|d| d.parse().ok())
            })?;
        Some(Self { major, minor, patch })
    }

    /// Whether a server of this version accepts and produces byte arrays.
    pub fn supports_bytes(&self) -> bool {
        *self >= Self::BYTES_SUPPORT
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
