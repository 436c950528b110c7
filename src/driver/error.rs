//! Driver error taxonomy.

use std::io;
use thiserror::Error;

use crate::bolt::{BoltError, FailureDetail, PackStreamError};

/// Result type for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

/// Driver errors.
///
/// The kinds mirror how the driver reacts: protocol violations close the
/// connection, session expiry evicts an address from the routing table,
/// service unavailability is fatal for the operation, and client errors
/// leave the connection usable once the failure is acknowledged.
#[derive(Error, Debug)]
pub enum DriverError {
    /// Malformed wire data: bad marker, bad field count, bad chunk header
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server rejected the credentials during INIT
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Handshake or transport-security failure
    #[error("Security error: {0}")]
    Security(String),

    /// A fault of this client: bad usage, wrong mode, exhausted pool
    #[error("Client error: {0}")]
    Client(String),

    /// The contacted host can no longer serve this session's role
    #[error("Session expired: {0}")]
    SessionExpired(String),

    /// No server in the required role is reachable
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// A server failure pending contextual classification
    #[error("Server error: {} - {}", .0.code, .0.message)]
    Server(ServerError),

    /// The pool was disposed before or during the operation
    #[error("Pool has been disposed")]
    PoolDisposed,

    /// Transport I/O fault
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl DriverError {
    /// Protocol error with a message.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Authentication error with a message.
    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Security error with a message.
    pub fn security(msg: impl Into<String>) -> Self {
        Self::Security(msg.into())
    }

    /// Client error with a message.
    pub fn client(msg: impl Into<String>) -> Self {
        Self::Client(msg.into())
    }

    /// Session-expired error with a message.
    pub fn session_expired(msg: impl Into<String>) -> Self {
        Self::SessionExpired(msg.into())
    }

    /// Service-unavailable error with a message.
    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::ServiceUnavailable(msg.into())
    }

    /// True when the fault means the connection's host is unreachable or
    /// unusable: the pool and routing table react to these.
    pub fn is_connection_fault(&self) -> bool {
        matches!(self, Self::ServiceUnavailable(_) | Self::Io(_))
    }

    /// True when a retry against a different server may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::SessionExpired(_) | Self::ServiceUnavailable(_) | Self::Io(_) => true,
            Self::Server(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<BoltError> for DriverError {
    fn from(err: BoltError) -> Self {
        match err {
            BoltError::Io(e) => DriverError::Io(e),
            BoltError::PackStream(e) => DriverError::Protocol(e.to_string()),
            BoltError::Protocol(msg) => DriverError::Protocol(msg),
        }
    }
}

impl From<PackStreamError> for DriverError {
    fn from(err: PackStreamError) -> Self {
        DriverError::Protocol(err.to_string())
    }
}

impl From<ServerError> for DriverError {
    fn from(err: ServerError) -> Self {
        DriverError::Server(err)
    }
}

/// A FAILURE message as reported by the server, with code-based
/// classification. Codes follow `Neo.{Category}.{SubCategory}.{Detail}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    /// Status code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl ServerError {
    /// Build a server error.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// True for client-category codes.
    pub fn is_client_error(&self) -> bool {
        self.code.starts_with("Neo.ClientError")
    }

    /// True for transient codes, where the server asks the caller to retry.
    pub fn is_transient(&self) -> bool {
        self.code.starts_with("Neo.TransientError")
    }

    /// True for authentication and authorization failures.
    pub fn is_authentication_error(&self) -> bool {
        self.code.contains(".Security.")
    }

    /// True for cluster-role errors: the contacted server cannot serve
    /// the request in its current role.
    pub fn is_cluster_error(&self) -> bool {
        self.code == "Neo.ClientError.Cluster.NotALeader"
            || self.code == "Neo.ClientError.General.ForbiddenOnReadOnlyDatabase"
    }

    /// True when the server lacks the routing procedure entirely.
    pub fn is_missing_procedure(&self) -> bool {
        self.code == "Neo.ClientError.Procedure.ProcedureNotFound"
    }
}

impl From<FailureDetail> for ServerError {
    fn from(detail: FailureDetail) -> Self {
        Self {
            code: detail.code,
            message: detail.message,
        }
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ServerError {}
