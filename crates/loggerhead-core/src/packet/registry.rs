//! Explicit decode-factory registry.
//!
//! Factories are resolved by `type_name` from a table populated at startup.
//! There is no implicit fallback: an unregistered type fails decoding so
//! schema drift between writer and reader is always visible. The opaque
//! path exists, but only behind a deliberate call.

use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::{CodecError, Result};
use crate::packet::field::DecodedRecord;
use crate::packet::{
    Comment, LogMessage, Marker, MetricDefinition, MetricSample, OpaquePacket, Packet,
    SessionClosed, SessionHeader, ThreadInfo,
};
use crate::types::PacketGuid;

// ----------------------------------------------------------------------------
// Dependency Resolution
// ----------------------------------------------------------------------------

/// Resolves a required packet's GUID to the packet itself.
///
/// Supplied by the caller, typically the stream reader's dependency table
/// or the in-memory session being rehydrated. Absence of a required packet
/// is an error, never silently "no dependency".
pub trait DependencyResolver {
    fn resolve(&self, guid: &PacketGuid) -> Option<Arc<Packet>>;
}

/// Resolver for contexts where no packet may carry references.
pub struct NoDependencies;

impl DependencyResolver for NoDependencies {
    fn resolve(&self, _guid: &PacketGuid) -> Option<Arc<Packet>> {
        None
    }
}

// ----------------------------------------------------------------------------
// Registry
// ----------------------------------------------------------------------------

/// Signature of a decode factory: turn a parsed record into a typed packet,
/// verifying its dependencies through the resolver.
pub type DecodeFn = fn(&DecodedRecord, &dyn DependencyResolver) -> Result<Packet>;

/// Maps packet type names to their decode factories.
#[derive(Clone)]
pub struct PacketRegistry {
    factories: HashMap<String, DecodeFn>,
}

impl PacketRegistry {
    /// An empty registry. Useful only for tests; most callers want
    /// [`PacketRegistry::with_builtins`].
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry pre-populated with every built-in packet variant.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(SessionHeader::TYPE_NAME, |record, _| {
            Ok(Packet::SessionHeader(SessionHeader::from_record(record)?))
        });
        registry.register(ThreadInfo::TYPE_NAME, |record, _| {
            Ok(Packet::ThreadInfo(ThreadInfo::from_record(record)?))
        });
        registry.register(LogMessage::TYPE_NAME, |record, resolver| {
            let message = LogMessage::from_record(record)?;
            resolver
                .resolve(&message.thread)
                .ok_or_else(|| CodecError::missing_guid(message.thread))?;
            Ok(Packet::LogMessage(message))
        });
        registry.register(MetricDefinition::TYPE_NAME, |record, _| {
            Ok(Packet::MetricDefinition(MetricDefinition::from_record(
                record,
            )?))
        });
        registry.register(MetricSample::TYPE_NAME, |record, resolver| {
            let sample = MetricSample::from_record(record)?;
            resolver
                .resolve(&sample.metric)
                .ok_or_else(|| CodecError::missing_guid(sample.metric))?;
            Ok(Packet::MetricSample(sample))
        });
        registry.register(Comment::TYPE_NAME, |record, resolver| {
            let comment = Comment::from_record(record)?;
            resolver
                .resolve(&comment.session)
                .ok_or_else(|| CodecError::missing_guid(comment.session))?;
            Ok(Packet::Comment(comment))
        });
        registry.register(Marker::TYPE_NAME, |record, _| {
            Ok(Packet::Marker(Marker::from_record(record)?))
        });
        registry.register(SessionClosed::TYPE_NAME, |record, _| {
            Ok(Packet::SessionClosed(SessionClosed::from_record(record)?))
        });
        registry
    }

    /// Register a decode factory, replacing any previous registration for
    /// the same type name.
    pub fn register(&mut self, type_name: impl Into<String>, factory: DecodeFn) {
        self.factories.insert(type_name.into(), factory);
    }

    pub fn is_registered(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    /// Decode a parsed record into a typed packet.
    pub fn decode(
        &self,
        record: &DecodedRecord,
        resolver: &dyn DependencyResolver,
    ) -> Result<Packet> {
        let factory =
            self.factories
                .get(&record.type_name)
                .ok_or_else(|| CodecError::UnknownPacketType {
                    type_name: record.type_name.clone(),
                })?;
        factory(record, resolver)
    }

    /// Deliberately decode a record of an unknown type into an opaque
    /// packet that preserves its fields.
    pub fn decode_opaque(&self, record: &DecodedRecord) -> Packet {
        Packet::Opaque(OpaquePacket::from_record(record))
    }
}

impl Default for PacketRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::field::FieldValue;
    use crate::types::{Severity, Timestamp};

    #[test]
    fn test_unknown_type_fails() {
        let registry = PacketRegistry::with_builtins();
        let record = DecodedRecord::new("vendor.custom", 1);
        let err = registry.decode(&record, &NoDependencies).unwrap_err();
        assert!(err.to_string().contains("vendor.custom"));
    }

    #[test]
    fn test_opaque_is_deliberate() {
        let registry = PacketRegistry::with_builtins();
        let mut record = DecodedRecord::new("vendor.custom", 1);
        record.push("blob", FieldValue::U32(9));

        // The implicit path refuses...
        assert!(registry.decode(&record, &NoDependencies).is_err());

        // ...while the explicit path preserves.
        match registry.decode_opaque(&record) {
            Packet::Opaque(opaque) => assert_eq!(opaque.type_name, "vendor.custom"),
            other => panic!("expected opaque packet, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_dependency_fails() {
        let registry = PacketRegistry::with_builtins();
        let thread = PacketGuid::generate();
        let mut record = DecodedRecord::new(LogMessage::TYPE_NAME, 1);
        record.push("sequence", FieldValue::U64(1));
        record.push("timestamp", FieldValue::U64(1));
        record.push("severity", FieldValue::I32(Severity::Error.as_i32()));
        record.push("category", FieldValue::Str("app".into()));
        record.push("message", FieldValue::Str("boom".into()));
        record.push("thread", FieldValue::PacketRef(thread));

        let err = registry.decode(&record, &NoDependencies).unwrap_err();
        assert!(err.to_string().contains("could not be resolved"));
    }

    #[test]
    fn test_builtin_marker_round_trip() {
        let registry = PacketRegistry::with_builtins();
        let marker = Marker::new(Timestamp::from_millis(77), "deploy-42");
        let mut record = DecodedRecord::new(Marker::TYPE_NAME, 1);
        for (name, value) in marker.fields() {
            record.push(name, value);
        }
        let decoded = registry.decode(&record, &NoDependencies).unwrap();
        assert_eq!(decoded, Packet::Marker(marker));
    }

    #[test]
    fn test_custom_registration() {
        let mut registry = PacketRegistry::new();
        assert!(!registry.is_registered(Marker::TYPE_NAME));
        registry.register(Marker::TYPE_NAME, |record, _| {
            Ok(Packet::Marker(Marker::from_record(record)?))
        });
        assert!(registry.is_registered(Marker::TYPE_NAME));
    }
}
