//! PackStream value codec.
//!
//! PackStream is the self-describing binary value encoding carried inside
//! Bolt messages. Every value is introduced by a marker byte; sizes are
//! embedded in the marker for small values and follow it big-endian for
//! larger ones.
//!
//! # Types
//!
//! - **Null**, **Boolean**: single-byte markers
//! - **Integer**: inline for -16..=127, else 8/16/32/64-bit, narrowest wins
//! - **Float**: always 64-bit IEEE 754
//! - **String**: UTF-8, tiny/8/16/32-bit length forms
//! - **Bytes**: 8/16/32-bit length forms only
//! - **List**, **Map**: same length families as strings
//! - **Structure**: field count + one-byte signature; in value position
//!   only the graph signatures (Node, Relationship, UnboundRelationship,
//!   Path) are legal

pub mod decoder;
pub mod encoder;
pub mod marker;
pub mod structures;
pub mod types;

pub use decoder::{unpack, Unpacker};
pub use encoder::{pack, Packer};
pub use structures::{Node, Path, PathSegment, Relationship, UnboundRelationship};
pub use types::{PackType, Value};

use std::fmt;

/// PackStream codec errors.
#[derive(Debug, Clone, PartialEq)]
pub enum PackStreamError {
    /// Input ended inside a value
    UnexpectedEof,
    /// Marker byte outside the PackStream alphabet
    UnknownMarker(u8),
    /// Typed unpack found a different type than requested
    Unexpected {
        /// Type the caller asked for
        expected: PackType,
        /// Type actually present
        actual: PackType,
    },
    /// String payload is not valid UTF-8
    InvalidUtf8(String),
    /// Map key was not a string
    InvalidMapKey(PackType),
    /// Map carried the same key twice
    DuplicateMapKey(String),
    /// Value exceeds the widest length form
    ValueTooLarge(&'static str, usize),
    /// Structure contents violate a signature's field contract
    InvalidStructure(String),
    /// Structure signature not legal in value position
    UnexpectedStruct(u8),
    /// Bytes value met while byte support is disabled
    BytesUnsupported,
}

impl fmt::Display for PackStreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackStreamError::UnexpectedEof => write!(f, "Unexpected end of PackStream data"),
            PackStreamError::UnknownMarker(m) => write!(f, "Unknown PackStream marker: 0x{:02X}", m),
            PackStreamError::Unexpected { expected, actual } => {
                write!(f, "Expected {:?}, found {:?}", expected, actual)
            }
            PackStreamError::InvalidUtf8(e) => write!(f, "Invalid UTF-8 in string: {}", e),
            PackStreamError::InvalidMapKey(t) => write!(f, "Map keys must be strings, found {:?}", t),
            PackStreamError::DuplicateMapKey(k) => write!(f, "Duplicate map key: {:?}", k),
            PackStreamError::ValueTooLarge(what, size) => {
                write!(f, "{} too large to encode: {}", what, size)
            }
            PackStreamError::InvalidStructure(msg) => write!(f, "Invalid structure: {}", msg),
            PackStreamError::UnexpectedStruct(s) => {
                write!(f, "Structure 0x{:02X} is not a value", s)
            }
            PackStreamError::BytesUnsupported => {
                write!(f, "Byte arrays are not supported by the connected server")
            }
        }
    }
}

impl std::error::Error for PackStreamError {}
