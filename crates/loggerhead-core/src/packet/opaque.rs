//! Deliberate fallback for packet types this build does not understand.

use crate::packet::field::{DecodedRecord, FieldValue};

/// The preserved fields of an unrecognized packet type.
///
/// Decoding an unknown `type_name` normally fails so genuine schema drift
/// is never masked; a caller that explicitly opts into
/// [`crate::packet::registry::PacketRegistry::decode_opaque`] gets this
/// variant instead, carrying the full field list for re-serialization or
/// display.
#[derive(Debug, Clone, PartialEq)]
pub struct OpaquePacket {
    pub type_name: String,
    pub version: u16,
    pub fields: Vec<(String, FieldValue)>,
}

impl OpaquePacket {
    pub(crate) fn from_record(record: &DecodedRecord) -> Self {
        Self {
            type_name: record.type_name.clone(),
            version: record.version,
            fields: record.fields.clone(),
        }
    }
}
