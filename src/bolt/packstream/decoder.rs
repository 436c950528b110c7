//! PackStream unpacker.

use bytes::Buf;
use std::collections::HashMap;

use super::marker::*;
use super::structures::{Node, Path, Relationship, UnboundRelationship};
use super::types::{PackType, Value};
use super::PackStreamError;

/// Unpacks values from a byte slice.
///
/// Offers both a generic [`unpack`](Unpacker::unpack) and typed
/// `unpack_*` operations; the typed forms fail when the next marker does
/// not match. [`peek_type`](Unpacker::peek_type) inspects the next marker
/// without consuming it.
pub struct Unpacker<'a> {
    data: &'a [u8],
    pos: usize,
    byte_support: bool,
}

impl<'a> Unpacker<'a> {
    /// Create an unpacker over `data` with byte-array support enabled.
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_byte_support(data, true)
    }

    /// Create an unpacker, optionally rejecting the Bytes marker family.
    pub fn with_byte_support(data: &'a [u8], byte_support: bool) -> Self {
        Self { data, pos: 0, byte_support }
    }

    /// Current read position.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Unconsumed byte count.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// True once every byte has been consumed.
    pub fn is_done(&self) -> bool {
        self.remaining() == 0
    }

    /// Report the type of the next value without consuming anything.
    pub fn peek_type(&self) -> Result<PackType, PackStreamError> {
        let marker = *self
            .data
            .get(self.pos)
            .ok_or(PackStreamError::UnexpectedEof)?;
        Self::classify(marker)
    }

    fn classify(marker: u8) -> Result<PackType, PackStreamError> {
        if is_tiny_int(marker) {
            return Ok(PackType::Integer);
        }
        if in_tiny_range(marker, TINY_STRING) {
            return Ok(PackType::String);
        }
        if in_tiny_range(marker, TINY_LIST) {
            return Ok(PackType::List);
        }
        if in_tiny_range(marker, TINY_MAP) {
            return Ok(PackType::Map);
        }
        if in_tiny_range(marker, TINY_STRUCT) {
            return Ok(PackType::Struct);
        }
        match marker {
            NULL => Ok(PackType::Null),
            TRUE | FALSE => Ok(PackType::Boolean),
            FLOAT_64 => Ok(PackType::Float),
            INT_8 | INT_16 | INT_32 | INT_64 => Ok(PackType::Integer),
            BYTES_8 | BYTES_16 | BYTES_32 => Ok(PackType::Bytes),
            STRING_8 | STRING_16 | STRING_32 => Ok(PackType::String),
            LIST_8 | LIST_16 | LIST_32 => Ok(PackType::List),
            MAP_8 | MAP_16 | MAP_32 => Ok(PackType::Map),
            STRUCT_8 | STRUCT_16 => Ok(PackType::Struct),
            _ => Err(PackStreamError::UnknownMarker(marker)),
        }
    }

    /// Unpack the next value. Structures in value position must carry a
    /// graph signature with the right field count.
    pub fn unpack(&mut self) -> Result<Value, PackStreamError> {
        match self.peek_type()? {
            PackType::Null => {
                self.read_u8()?;
                Ok(Value::Null)
            }
            PackType::Boolean => Ok(Value::Boolean(self.unpack_bool()?)),
            PackType::Integer => Ok(Value::Integer(self.unpack_int()?)),
            PackType::Float => Ok(Value::Float(self.unpack_float()?)),
            PackType::Bytes => Ok(Value::Bytes(self.unpack_bytes()?)),
            PackType::String => Ok(Value::String(self.unpack_string()?)),
            PackType::List => Ok(Value::List(self.unpack_list()?)),
            PackType::Map => Ok(Value::Map(self.unpack_map()?)),
            PackType::Struct => self.unpack_graph_struct(),
        }
    }

    /// Unpack a boolean; fail on any other marker.
    pub fn unpack_bool(&mut self) -> Result<bool, PackStreamError> {
        self.expect(PackType::Boolean)?;
        Ok(self.read_u8()? == TRUE)
    }

    /// Unpack an integer of any width; fail on any other marker.
    pub fn unpack_int(&mut self) -> Result<i64, PackStreamError> {
        self.expect(PackType::Integer)?;
        let marker = self.read_u8()?;
        if is_tiny_int(marker) {
            return Ok(marker as i8 as i64);
        }
        match marker {
            INT_8 => Ok(self.read_u8()? as i8 as i64),
            INT_16 => Ok(self.read_fixed(2)?.get_i16() as i64),
            INT_32 => Ok(self.read_fixed(4)?.get_i32() as i64),
            INT_64 => Ok(self.read_fixed(8)?.get_i64()),
            _ => unreachable!("classified as integer"),
        }
    }

    /// Unpack a float; fail on any other marker.
    pub fn unpack_float(&mut self) -> Result<f64, PackStreamError> {
        self.expect(PackType::Float)?;
        self.read_u8()?;
        Ok(self.read_fixed(8)?.get_f64())
    }

    /// Unpack a byte array; fail on any other marker, and on any Bytes
    /// marker when byte support is off.
    pub fn unpack_bytes(&mut self) -> Result<Vec<u8>, PackStreamError> {
        self.expect(PackType::Bytes)?;
        if !self.byte_support {
            return Err(PackStreamError::BytesUnsupported);
        }
        let len = match self.read_u8()? {
            BYTES_8 => self.read_u8()? as usize,
            BYTES_16 => self.read_fixed(2)?.get_u16() as usize,
            BYTES_32 => self.read_fixed(4)?.get_u32() as usize,
            _ => unreachable!("classified as bytes"),
        };
        Ok(self.read_slice(len)?.to_vec())
    }

    /// Unpack a string; fail on any other marker.
    pub fn unpack_string(&mut self) -> Result<String, PackStreamError> {
        self.expect(PackType::String)?;
        let marker = self.read_u8()?;
        let len = if in_tiny_range(marker, TINY_STRING) {
            tiny_size(marker)
        } else {
            match marker {
                STRING_8 => self.read_u8()? as usize,
                STRING_16 => self.read_fixed(2)?.get_u16() as usize,
                STRING_32 => self.read_fixed(4)?.get_u32() as usize,
                _ => unreachable!("classified as string"),
            }
        };
        let bytes = self.read_slice(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|e| PackStreamError::InvalidUtf8(e.to_string()))
    }

    /// Unpack a list; fail on any other marker.
    pub fn unpack_list(&mut self) -> Result<Vec<Value>, PackStreamError> {
        self.expect(PackType::List)?;
        let marker = self.read_u8()?;
        let len = if in_tiny_range(marker, TINY_LIST) {
            tiny_size(marker)
        } else {
            match marker {
                LIST_8 => self.read_u8()? as usize,
                LIST_16 => self.read_fixed(2)?.get_u16() as usize,
                LIST_32 => self.read_fixed(4)?.get_u32() as usize,
                _ => unreachable!("classified as list"),
            }
        };
        let mut items = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            items.push(self.unpack()?);
        }
        Ok(items)
    }

    /// Unpack a map; fail on any other marker, on non-string keys and on
    /// duplicate keys.
    pub fn unpack_map(&mut self) -> Result<HashMap<String, Value>, PackStreamError> {
        self.expect(PackType::Map)?;
        let marker = self.read_u8()?;
        let len = if in_tiny_range(marker, TINY_MAP) {
            tiny_size(marker)
        } else {
            match marker {
                MAP_8 => self.read_u8()? as usize,
                MAP_16 => self.read_fixed(2)?.get_u16() as usize,
                MAP_32 => self.read_fixed(4)?.get_u32() as usize,
                _ => unreachable!("classified as map"),
            }
        };
        let mut map = HashMap::with_capacity(len.min(1024));
        for _ in 0..len {
            let key = self.unpack_string().map_err(|e| match e {
                PackStreamError::Unexpected { actual, .. } => PackStreamError::InvalidMapKey(actual),
                other => other,
            })?;
            let value = self.unpack()?;
            if map.insert(key.clone(), value).is_some() {
                return Err(PackStreamError::DuplicateMapKey(key));
            }
        }
        Ok(map)
    }

    /// Unpack a structure header, returning (field count, signature).
    /// Used by the message layer, which dispatches on its own signatures.
    pub fn unpack_struct_header(&mut self) -> Result<(usize, u8), PackStreamError> {
        self.expect(PackType::Struct)?;
        let marker = self.read_u8()?;
        let size = if in_tiny_range(marker, TINY_STRUCT) {
            tiny_size(marker)
        } else {
            match marker {
                STRUCT_8 => self.read_u8()? as usize,
                STRUCT_16 => self.read_fixed(2)?.get_u16() as usize,
                _ => unreachable!("classified as struct"),
            }
        };
        let signature = self.read_u8()?;
        Ok((size, signature))
    }

    fn unpack_graph_struct(&mut self) -> Result<Value, PackStreamError> {
        let (size, signature) = self.unpack_struct_header()?;
        let expected = match signature {
            sig::NODE => sig::NODE_FIELDS,
            sig::RELATIONSHIP => sig::RELATIONSHIP_FIELDS,
            sig::UNBOUND_RELATIONSHIP => sig::UNBOUND_RELATIONSHIP_FIELDS,
            sig::PATH => sig::PATH_FIELDS,
            other => return Err(PackStreamError::UnexpectedStruct(other)),
        };
        if size != expected {
            return Err(PackStreamError::InvalidStructure(format!(
                "structure 0x{:02X} requires {} fields, got {}",
                signature, expected, size
            )));
        }
        let mut fields = Vec::with_capacity(size);
        for _ in 0..size {
            fields.push(self.unpack()?);
        }
        match signature {
            sig::NODE => Ok(Value::Node(Node::from_fields(fields)?)),
            sig::RELATIONSHIP => Ok(Value::Relationship(Relationship::from_fields(fields)?)),
            sig::UNBOUND_RELATIONSHIP => Ok(Value::UnboundRelationship(
                UnboundRelationship::from_fields(fields)?,
            )),
            sig::PATH => Ok(Value::Path(Path::from_fields(fields)?)),
            _ => unreachable!("validated above"),
        }
    }

    fn expect(&self, expected: PackType) -> Result<(), PackStreamError> {
        let actual = self.peek_type()?;
        if actual == expected {
            Ok(())
        } else {
            Err(PackStreamError::Unexpected { expected, actual })
        }
    }

    fn read_u8(&mut self) -> Result<u8, PackStreamError> {
        let value = *self
            .data
            .get(self.pos)
            .ok_or(PackStreamError::UnexpectedEof)?;
        self.pos += 1;
        Ok(value)
    }

    fn read_fixed(&mut self, n: usize) -> Result<&'a [u8], PackStreamError> {
        self.read_slice(n)
    }

    fn read_slice(&mut self, len: usize) -> Result<&'a [u8], PackStreamError> {
        if self.remaining() < len {
            return Err(PackStreamError::UnexpectedEof);
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }
}

/// Unpack a single value from a byte slice.
pub fn unpack(data: &[u8]) -> Result<Value, PackStreamError> {
    Unpacker::new(data).unpack()
}
