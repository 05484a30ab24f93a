//! Packet body encoder/decoder.
//!
//! Body layout: `[type_name][schema_version: u16][field_count: u32]` then
//! one `[name][tag: u8][value]` triple per field. Integers are big-endian,
//! strings are u32-length-prefixed UTF-8, GUIDs are 16 raw bytes, packet
//! references are u32 slot indices into the stream's dependency table.

use crate::errors::{CodecError, Result};
use crate::packet::field::{DecodedRecord, FieldKind, FieldValue};
use crate::types::PacketGuid;

/// Strings longer than this are treated as corruption, not data.
const MAX_STRING_LEN: usize = 16 * 1024 * 1024;

/// Packets may not declare more fields than this.
const MAX_FIELD_COUNT: u32 = 4096;

// ----------------------------------------------------------------------------
// Reference Mapping
// ----------------------------------------------------------------------------

/// Maps a referenced packet's GUID to its slot in the stream's dependency
/// table at encode time.
pub trait RefEncoder {
    fn slot_for(&self, guid: &PacketGuid) -> Option<u32>;
}

/// Maps a wire slot index back to the referenced packet's GUID at decode
/// time.
pub trait RefDecoder {
    fn guid_for_slot(&self, slot: u32) -> Option<PacketGuid>;
}

/// Reference mapping for contexts that carry no packet references
/// (command messages, unit tests).
pub struct NoRefs;

impl RefEncoder for NoRefs {
    fn slot_for(&self, _guid: &PacketGuid) -> Option<u32> {
        None
    }
}

impl RefDecoder for NoRefs {
    fn guid_for_slot(&self, _slot: u32) -> Option<PacketGuid> {
        None
    }
}

// ----------------------------------------------------------------------------
// Primitive Writer
// ----------------------------------------------------------------------------

/// Append-only writer for the primitive wire types.
pub struct FieldWriter<'a> {
    out: &'a mut Vec<u8>,
}

impl<'a> FieldWriter<'a> {
    pub fn new(out: &'a mut Vec<u8>) -> Self {
        Self { out }
    }

    pub fn put_u8(&mut self, value: u8) {
        self.out.push(value);
    }

    pub fn put_u16(&mut self, value: u16) {
        self.out.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_u32(&mut self, value: u32) {
        self.out.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_u64(&mut self, value: u64) {
        self.out.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_i16(&mut self, value: i16) {
        self.out.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_i32(&mut self, value: i32) {
        self.out.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_i64(&mut self, value: i64) {
        self.out.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_f64(&mut self, value: f64) {
        self.out.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_bool(&mut self, value: bool) {
        self.out.push(u8::from(value));
    }

    pub fn put_str(&mut self, value: &str) {
        self.put_u32(value.len() as u32);
        self.out.extend_from_slice(value.as_bytes());
    }

    pub fn put_guid(&mut self, value: &PacketGuid) {
        self.out.extend_from_slice(value.as_bytes());
    }
}

// ----------------------------------------------------------------------------
// Primitive Reader
// ----------------------------------------------------------------------------

/// Bounds-checked cursor over a packet body.
pub struct FieldReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(CodecError::frame(format!(
                "body truncated: needed {len} bytes, {} remain",
                self.remaining()
            ))
            .into());
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.take(2)?.try_into().unwrap()))
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn get_u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn get_i16(&mut self) -> Result<i16> {
        Ok(i16::from_be_bytes(self.take(2)?.try_into().unwrap()))
    }

    pub fn get_i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn get_i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn get_f64(&mut self) -> Result<f64> {
        Ok(f64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn get_bool(&mut self) -> Result<bool> {
        Ok(self.get_u8()? != 0)
    }

    pub fn get_str(&mut self) -> Result<String> {
        let len = self.get_u32()? as usize;
        if len > MAX_STRING_LEN {
            return Err(CodecError::frame(format!("string length {len} exceeds limit")).into());
        }
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| CodecError::frame("string field is not valid UTF-8").into())
    }

    pub fn get_guid(&mut self) -> Result<PacketGuid> {
        let bytes: [u8; 16] = self.take(16)?.try_into().unwrap();
        Ok(PacketGuid::from_bytes(bytes))
    }
}

// ----------------------------------------------------------------------------
// Body Codec
// ----------------------------------------------------------------------------

/// Encode a packet body from its declared field list.
///
/// Fails with an encoding error when a `PacketRef` names a GUID the stream
/// has not assigned a slot: the reference cannot be represented until its
/// target has been written.
pub fn encode_body<S: AsRef<str>>(
    type_name: &str,
    version: u16,
    fields: &[(S, FieldValue)],
    refs: &dyn RefEncoder,
) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(64 + fields.len() * 16);
    let mut writer = FieldWriter::new(&mut out);

    writer.put_str(type_name);
    writer.put_u16(version);
    writer.put_u32(fields.len() as u32);

    for (name, value) in fields {
        let name = name.as_ref();
        writer.put_str(name);
        writer.put_u8(value.kind().as_u8());
        match value {
            FieldValue::I16(v) => writer.put_i16(*v),
            FieldValue::I32(v) => writer.put_i32(*v),
            FieldValue::I64(v) => writer.put_i64(*v),
            FieldValue::U16(v) => writer.put_u16(*v),
            FieldValue::U32(v) => writer.put_u32(*v),
            FieldValue::U64(v) => writer.put_u64(*v),
            FieldValue::F64(v) => writer.put_f64(*v),
            FieldValue::Bool(v) => writer.put_bool(*v),
            FieldValue::Str(v) => writer.put_str(v),
            FieldValue::Guid(v) => writer.put_guid(v),
            FieldValue::PacketRef(guid) => {
                let slot = refs.slot_for(guid).ok_or_else(|| {
                    CodecError::encoding(
                        type_name,
                        name,
                        format!("referenced packet {guid} has no slot in this stream"),
                    )
                })?;
                writer.put_u32(slot);
            }
        }
    }

    Ok(out)
}

/// Decode a packet body into a named-field record.
///
/// Slot indices in `PacketRef` fields are resolved to GUIDs through `refs`;
/// an unresolvable slot is a missing dependency, never silently "no
/// dependency".
pub fn decode_body(bytes: &[u8], refs: &dyn RefDecoder) -> Result<DecodedRecord> {
    let mut reader = FieldReader::new(bytes);

    let type_name = reader.get_str()?;
    let version = reader.get_u16()?;
    let field_count = reader.get_u32()?;
    if field_count > MAX_FIELD_COUNT {
        return Err(CodecError::frame(format!("field count {field_count} exceeds limit")).into());
    }

    let mut record = DecodedRecord::new(type_name, version);
    for _ in 0..field_count {
        let name = reader.get_str()?;
        let kind = FieldKind::from_u8(reader.get_u8()?)?;
        let value = match kind {
            FieldKind::I16 => FieldValue::I16(reader.get_i16()?),
            FieldKind::I32 => FieldValue::I32(reader.get_i32()?),
            FieldKind::I64 => FieldValue::I64(reader.get_i64()?),
            FieldKind::U16 => FieldValue::U16(reader.get_u16()?),
            FieldKind::U32 => FieldValue::U32(reader.get_u32()?),
            FieldKind::U64 => FieldValue::U64(reader.get_u64()?),
            FieldKind::F64 => FieldValue::F64(reader.get_f64()?),
            FieldKind::Bool => FieldValue::Bool(reader.get_bool()?),
            FieldKind::Str => FieldValue::Str(reader.get_str()?),
            FieldKind::Guid => FieldValue::Guid(reader.get_guid()?),
            FieldKind::PacketRef => {
                let slot = reader.get_u32()?;
                let guid = refs
                    .guid_for_slot(slot)
                    .ok_or_else(|| CodecError::missing_slot(slot))?;
                FieldValue::PacketRef(guid)
            }
        };
        record.push(name, value);
    }

    if reader.remaining() != 0 {
        return Err(CodecError::frame(format!(
            "{} trailing bytes after last field",
            reader.remaining()
        ))
        .into());
    }

    Ok(record)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
