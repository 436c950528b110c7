//! PackStream packer.

use bytes::{BufMut, BytesMut};
use std::collections::HashMap;

use super::marker::*;
use super::structures::{Node, Path, Relationship, UnboundRelationship};
use super::types::Value;
use super::PackStreamError;

/// Packs values into a byte buffer, always choosing the narrowest marker.
pub struct Packer {
    buffer: BytesMut,
    byte_support: bool,
}

impl Packer {
    /// Create a packer with byte-array support enabled.
    pub fn new() -> Self {
        Self::with_byte_support(true)
    }

    /// Create a packer, optionally rejecting byte arrays. Servers that
    /// predate the Bytes type cannot receive them.
    pub fn with_byte_support(byte_support: bool) -> Self {
        Self {
            buffer: BytesMut::with_capacity(256),
            byte_support,
        }
    }

    /// Current buffer length.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// True when nothing has been packed.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Consume the packer and return the packed bytes.
    pub fn into_bytes(self) -> BytesMut {
        self.buffer
    }

    /// The packed bytes as a slice.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Pack one value.
    pub fn pack(&mut self, value: &Value) -> Result<(), PackStreamError> {
        match value {
            Value::Null => {
                self.pack_null();
                Ok(())
            }
            Value::Boolean(b) => {
                self.pack_bool(*b);
                Ok(())
            }
            Value::Integer(i) => {
                self.pack_int(*i);
                Ok(())
            }
            Value::Float(f) => {
                self.pack_float(*f);
                Ok(())
            }
            Value::Bytes(b) => self.pack_bytes(b),
            Value::String(s) => self.pack_string(s),
            Value::List(l) => self.pack_list(l),
            Value::Map(m) => self.pack_map(m),
            Value::Node(n) => self.pack_node(n),
            Value::Relationship(r) => self.pack_relationship(r),
            Value::UnboundRelationship(r) => self.pack_unbound_relationship(r),
            Value::Path(p) => self.pack_path(p),
        }
    }

    /// Pack a null marker.
    pub fn pack_null(&mut self) {
        self.buffer.put_u8(NULL);
    }

    /// Pack a boolean marker.
    pub fn pack_bool(&mut self, value: bool) {
        self.buffer.put_u8(if value { TRUE } else { FALSE });
    }

    /// Pack an integer with the narrowest encoding.
    pub fn pack_int(&mut self, value: i64) {
        if fits_tiny_int(value) {
            self.buffer.put_u8(value as u8);
        } else if i8::try_from(value).is_ok() {
            self.buffer.put_u8(INT_8);
            self.buffer.put_i8(value as i8);
        } else if i16::try_from(value).is_ok() {
            self.buffer.put_u8(INT_16);
            self.buffer.put_i16(value as i16);
        } else if i32::try_from(value).is_ok() {
            self.buffer.put_u8(INT_32);
            self.buffer.put_i32(value as i32);
        } else {
            self.buffer.put_u8(INT_64);
            self.buffer.put_i64(value);
        }
    }

    /// Pack a float. Always 64-bit.
    pub fn pack_float(&mut self, value: f64) {
        self.buffer.put_u8(FLOAT_64);
        self.buffer.put_f64(value);
    }

    /// Pack a byte array.
    pub fn pack_bytes(&mut self, value: &[u8]) -> Result<(), PackStreamError> {
        if !self.byte_support {
            return Err(PackStreamError::BytesUnsupported);
        }
        let len = value.len();
        if len <= u8::MAX as usize {
            self.buffer.put_u8(BYTES_8);
            self.buffer.put_u8(len as u8);
        } else if len <= u16::MAX as usize {
            self.buffer.put_u8(BYTES_16);
            self.buffer.put_u16(len as u16);
        } else if len <= u32::MAX as usize {
            self.buffer.put_u8(BYTES_32);
            self.buffer.put_u32(len as u32);
        } else {
            return Err(PackStreamError::ValueTooLarge("bytes", len));
        }
        self.buffer.put_slice(value);
        Ok(())
    }

    /// Pack a string.
    pub fn pack_string(&mut self, value: &str) -> Result<(), PackStreamError> {
        let bytes = value.as_bytes();
        self.pack_sized_header(TINY_STRING, STRING_8, STRING_16, STRING_32, bytes.len(), "string")?;
        self.buffer.put_slice(bytes);
        Ok(())
    }

    /// Pack a list header and every element.
    pub fn pack_list(&mut self, values: &[Value]) -> Result<(), PackStreamError> {
        self.pack_sized_header(TINY_LIST, LIST_8, LIST_16, LIST_32, values.len(), "list")?;
        for value in values {
            self.pack(value)?;
        }
        Ok(())
    }

    /// Pack a map header and every entry. Entry order is unspecified.
    pub fn pack_map(&mut self, map: &HashMap<String, Value>) -> Result<(), PackStreamError> {
        self.pack_sized_header(TINY_MAP, MAP_8, MAP_16, MAP_32, map.len(), "map")?;
        for (key, value) in map {
            self.pack_string(key)?;
            self.pack(value)?;
        }
        Ok(())
    }

    /// Pack a structure header: field count then signature.
    pub fn pack_struct_header(&mut self, size: usize, signature: u8) -> Result<(), PackStreamError> {
        if size <= TINY_MAX {
            self.buffer.put_u8(TINY_STRUCT + size as u8);
        } else if size <= u8::MAX as usize {
            self.buffer.put_u8(STRUCT_8);
            self.buffer.put_u8(size as u8);
        } else if size <= u16::MAX as usize {
            self.buffer.put_u8(STRUCT_16);
            self.buffer.put_u16(size as u16);
        } else {
            return Err(PackStreamError::ValueTooLarge("structure", size));
        }
        self.buffer.put_u8(signature);
        Ok(())
    }

    fn pack_node(&mut self, node: &Node) -> Result<(), PackStreamError> {
        self.pack_struct_header(sig::NODE_FIELDS, sig::NODE)?;
        self.pack_fields(node.fields())
    }

    fn pack_relationship(&mut self, rel: &Relationship) -> Result<(), PackStreamError> {
        self.pack_struct_header(sig::RELATIONSHIP_FIELDS, sig::RELATIONSHIP)?;
        self.pack_fields(rel.fields())
    }

    fn pack_unbound_relationship(&mut self, rel: &UnboundRelationship) -> Result<(), PackStreamError> {
        self.pack_struct_header(sig::UNBOUND_RELATIONSHIP_FIELDS, sig::UNBOUND_RELATIONSHIP)?;
        self.pack_fields(rel.fields())
    }

    fn pack_path(&mut self, path: &Path) -> Result<(), PackStreamError> {
        self.pack_struct_header(sig::PATH_FIELDS, sig::PATH)?;
        self.pack_fields(path.fields())
    }

    fn pack_fields(&mut self, fields: Vec<Value>) -> Result<(), PackStreamError> {
        for field in &fields {
            self.pack(field)?;
        }
        Ok(())
    }

    fn pack_sized_header(
        &mut self,
        tiny: u8,
        m8: u8,
        m16: u8,
        m32: u8,
        len: usize,
        what: &'static str,
    ) -> Result<(), PackStreamError> {
        if len <= TINY_MAX {
            self.buffer.put_u8(tiny + len as u8);
        } else if len <= u8::MAX as usize {
            self.buffer.put_u8(m8);
            self.buffer.put_u8(len as u8);
        } else if len <= u16::MAX as usize {
            self.buffer.put_u8(m16);
            self.buffer.put_u16(len as u16);
        } else if len <= u32::MAX as usize {
            self.buffer.put_u8(m32);
            self.buffer.put_u32(len as u32);
        } else {
            return Err(PackStreamError::ValueTooLarge(what, len));
        }
        Ok(())
    }
}

impl Default for Packer {
    fn default() -> Self {
        Self::new()
    }
}

/// Pack a single value into a fresh buffer.
pub fn pack(value: &Value) -> Result<BytesMut, PackStreamError> {
    let mut packer = Packer::new();
    packer.pack(value)?;
    Ok(packer.into_bytes())
}
