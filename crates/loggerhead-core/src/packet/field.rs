//! Field primitives for the self-describing packet format.
//!
//! Every packet body is a list of `(name, type tag, value)` triples. The
//! tags form a closed set of primitive wire types; packets that need richer
//! shapes compose them (a nested packet becomes a `PacketRef` into the
//! stream's dependency table).

use serde::{Deserialize, Serialize};

use crate::errors::{CodecError, Result};
use crate::types::PacketGuid;

// ----------------------------------------------------------------------------
// Field Kinds
// ----------------------------------------------------------------------------

/// Wire type tags for packet fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum FieldKind {
    I16 = 0x01,
    I32 = 0x02,
    I64 = 0x03,
    U16 = 0x04,
    U32 = 0x05,
    U64 = 0x06,
    F64 = 0x07,
    Bool = 0x08,
    Str = 0x09,
    Guid = 0x0A,
    /// Reference to another packet, by slot index into the per-stream
    /// dependency table.
    PacketRef = 0x0B,
}

impl FieldKind {
    /// Convert from the raw tag byte.
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(FieldKind::I16),
            0x02 => Ok(FieldKind::I32),
            0x03 => Ok(FieldKind::I64),
            0x04 => Ok(FieldKind::U16),
            0x05 => Ok(FieldKind::U32),
            0x06 => Ok(FieldKind::U64),
            0x07 => Ok(FieldKind::F64),
            0x08 => Ok(FieldKind::Bool),
            0x09 => Ok(FieldKind::Str),
            0x0A => Ok(FieldKind::Guid),
            0x0B => Ok(FieldKind::PacketRef),
            _ => Err(CodecError::UnknownFieldTag(value).into()),
        }
    }

    /// Convert to the raw tag byte.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub const fn name(self) -> &'static str {
        match self {
            FieldKind::I16 => "i16",
            FieldKind::I32 => "i32",
            FieldKind::I64 => "i64",
            FieldKind::U16 => "u16",
            FieldKind::U32 => "u32",
            FieldKind::U64 => "u64",
            FieldKind::F64 => "f64",
            FieldKind::Bool => "bool",
            FieldKind::Str => "string",
            FieldKind::Guid => "guid",
            FieldKind::PacketRef => "packet-ref",
        }
    }
}

// ----------------------------------------------------------------------------
// Field Values
// ----------------------------------------------------------------------------

/// An in-memory field value.
///
/// `PacketRef` holds the referenced packet's GUID; the stream writer maps it
/// to a slot index on encode, and the stream reader maps the slot back to a
/// GUID on decode, so factories never see raw slots.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    I16(i16),
    I32(i32),
    I64(i64),
    U16(u16),
    U32(u32),
    U64(u64),
    F64(f64),
    Bool(bool),
    Str(String),
    Guid(PacketGuid),
    PacketRef(PacketGuid),
}

impl FieldValue {
    pub const fn kind(&self) -> FieldKind {
        match self {
            FieldValue::I16(_) => FieldKind::I16,
            FieldValue::I32(_) => FieldKind::I32,
            FieldValue::I64(_) => FieldKind::I64,
            FieldValue::U16(_) => FieldKind::U16,
            FieldValue::U32(_) => FieldKind::U32,
            FieldValue::U64(_) => FieldKind::U64,
            FieldValue::F64(_) => FieldKind::F64,
            FieldValue::Bool(_) => FieldKind::Bool,
            FieldValue::Str(_) => FieldKind::Str,
            FieldValue::Guid(_) => FieldKind::Guid,
            FieldValue::PacketRef(_) => FieldKind::PacketRef,
        }
    }
}

// ----------------------------------------------------------------------------
// Packet Definition
// ----------------------------------------------------------------------------

/// Metadata describing a packet variant's field list for one version.
///
/// Generated fresh per encode/decode call from the variant's declared
/// schema; never persisted on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketDefinition {
    pub type_name: String,
    pub version: u16,
    pub fields: Vec<(String, FieldKind)>,
}

impl PacketDefinition {
    pub fn new(
        type_name: impl Into<String>,
        version: u16,
        fields: Vec<(String, FieldKind)>,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            version,
            fields,
        }
    }
}

// ----------------------------------------------------------------------------
// Decoded Record
// ----------------------------------------------------------------------------

/// A packet body parsed into named fields but not yet turned into a typed
/// packet.
///
/// The generic codec layer produces a record from the wire; the registered
/// factory for `type_name` then reads the fields appropriate to `version`.
/// Unknown extra fields are preserved and simply ignored by factories,
/// which is what lets an old reader process a newer writer's output.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRecord {
    pub type_name: String,
    pub version: u16,
    pub fields: Vec<(String, FieldValue)>,
}

impl DecodedRecord {
    pub fn new(type_name: impl Into<String>, version: u16) -> Self {
        Self {
            type_name: type_name.into(),
            version,
            fields: Vec::new(),
        }
    }

    pub fn push(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.push((name.into(), value));
    }

    fn find(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    fn require(&self, name: &'static str) -> Result<&FieldValue> {
        self.find(name).ok_or_else(|| {
            CodecError::MissingField {
                type_name: self.type_name.clone(),
                field: name,
                version: self.version,
            }
            .into()
        })
    }

    fn mismatch(&self, name: &'static str, expected: FieldKind, actual: &FieldValue) -> CodecError {
        CodecError::FieldType {
            field: name.to_string(),
            expected: expected.name(),
            actual: actual.kind().name(),
        }
    }

    pub fn get_str(&self, name: &'static str) -> Result<&str> {
        match self.require(name)? {
            FieldValue::Str(value) => Ok(value),
            other => Err(self.mismatch(name, FieldKind::Str, other).into()),
        }
    }

    /// Like [`get_str`](Self::get_str) but yields an empty string when the
    /// field is absent; used for fields added in later schema versions.
    pub fn get_str_or_default(&self, name: &'static str) -> String {
        match self.find(name) {
            Some(FieldValue::Str(value)) => value.clone(),
            _ => String::new(),
        }
    }

    pub fn get_i32(&self, name: &'static str) -> Result<i32> {
        match self.require(name)? {
            FieldValue::I32(value) => Ok(*value),
            other => Err(self.mismatch(name, FieldKind::I32, other).into()),
        }
    }

    pub fn get_i32_or(&self, name: &'static str, default: i32) -> i32 {
        match self.find(name) {
            Some(FieldValue::I32(value)) => *value,
            _ => default,
        }
    }

    pub fn get_i64(&self, name: &'static str) -> Result<i64> {
        match self.require(name)? {
            FieldValue::I64(value) => Ok(*value),
            other => Err(self.mismatch(name, FieldKind::I64, other).into()),
        }
    }

    pub fn get_u64(&self, name: &'static str) -> Result<u64> {
        match self.require(name)? {
            FieldValue::U64(value) => Ok(*value),
            other => Err(self.mismatch(name, FieldKind::U64, other).into()),
        }
    }

    pub fn get_f64(&self, name: &'static str) -> Result<f64> {
        match self.require(name)? {
            FieldValue::F64(value) => Ok(*value),
            other => Err(self.mismatch(name, FieldKind::F64, other).into()),
        }
    }

    pub fn get_bool(&self, name: &'static str) -> Result<bool> {
        match self.require(name)? {
            FieldValue::Bool(value) => Ok(*value),
            other => Err(self.mismatch(name, FieldKind::Bool, other).into()),
        }
    }

    pub fn get_guid(&self, name: &'static str) -> Result<PacketGuid> {
        match self.require(name)? {
            FieldValue::Guid(value) => Ok(*value),
            other => Err(self.mismatch(name, FieldKind::Guid, other).into()),
        }
    }

    pub fn get_packet_ref(&self, name: &'static str) -> Result<PacketGuid> {
        match self.require(name)? {
            FieldValue::PacketRef(value) => Ok(*value),
            other => Err(self.mismatch(name, FieldKind::PacketRef, other).into()),
        }
    }

}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
