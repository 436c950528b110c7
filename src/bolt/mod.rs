//! Bolt wire protocol.
//!
//! The layers, bottom up:
//!
//! - [`packstream`] - the typed value encoding
//! - [`chunk`] - message framing into length-prefixed chunks
//! - [`handshake`] - preamble and version negotiation
//! - [`message`] - the protocol version 1 message set
//! - [`format`] - messages over chunks, dispatched to response handlers

pub mod chunk;
pub mod error;
pub mod format;
pub mod handshake;
pub mod message;
pub mod packstream;

pub use chunk::{ChunkedInput, ChunkedOutput, DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};
pub use error::{BoltError, BoltResult};
pub use format::{Collector, MessageFormat, ResponseHandler};
pub use handshake::{ProtocolVersion, ServerVersion};
pub use message::{FailureDetail, Request, Response};
pub use packstream::{PackStreamError, PackType, Value};
