//! The packet model: a closed set of versioned, self-describing record
//! variants plus the codec machinery to move them through byte streams.
//!
//! Packets are immutable once handed to the pipeline. References between
//! packets always point at previously written packets (by GUID in memory,
//! by dependency-table slot on the wire), so the dependency graph is a DAG
//! by construction, and a packet can never depend on itself.

pub mod codec;
pub mod field;
pub mod framing;
pub mod registry;

mod log;
mod metric;
mod opaque;
mod session;

pub use field::{DecodedRecord, FieldKind, FieldValue, PacketDefinition};
pub use log::{LogMessage, ThreadInfo};
pub use metric::{MetricDefinition, MetricSample};
pub use opaque::OpaquePacket;
pub use session::{Comment, Marker, SessionClosed, SessionHeader, SessionStatus};

use smallvec::SmallVec;

use crate::types::PacketGuid;

// ----------------------------------------------------------------------------
// Packet Trait
// ----------------------------------------------------------------------------

/// Operations every packet variant supports, independent of its payload.
pub trait PacketFormat {
    /// Stable identifier used to look up the decode factory.
    fn type_name(&self) -> &str;

    /// Schema version this in-memory value serializes as.
    fn schema_version(&self) -> u16;

    /// GUIDs of packets this packet's meaning depends on.
    ///
    /// Dependencies must already be present in a stream before this packet
    /// can be encoded into it.
    fn required_packets(&self) -> SmallVec<[PacketGuid; 2]> {
        SmallVec::new()
    }

    /// Persistent identity, for cached packets only.
    ///
    /// A later packet with the same identity replaces the earlier one in a
    /// stream's dependency table rather than duplicating it.
    fn cache_id(&self) -> Option<PacketGuid> {
        None
    }
}

// ----------------------------------------------------------------------------
// Packet Enum
// ----------------------------------------------------------------------------

/// A unit of serialization flowing through the agent.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    SessionHeader(SessionHeader),
    ThreadInfo(ThreadInfo),
    LogMessage(LogMessage),
    MetricDefinition(MetricDefinition),
    MetricSample(MetricSample),
    Comment(Comment),
    Marker(Marker),
    SessionClosed(SessionClosed),
    /// Preserved fields of a type this build does not understand. Produced
    /// only by [`registry::PacketRegistry::decode_opaque`], never
    /// implicitly.
    Opaque(OpaquePacket),
}

impl PacketFormat for Packet {
    fn type_name(&self) -> &str {
        match self {
            Packet::SessionHeader(_) => SessionHeader::TYPE_NAME,
            Packet::ThreadInfo(_) => ThreadInfo::TYPE_NAME,
            Packet::LogMessage(_) => LogMessage::TYPE_NAME,
            Packet::MetricDefinition(_) => MetricDefinition::TYPE_NAME,
            Packet::MetricSample(_) => MetricSample::TYPE_NAME,
            Packet::Comment(_) => Comment::TYPE_NAME,
            Packet::Marker(_) => Marker::TYPE_NAME,
            Packet::SessionClosed(_) => SessionClosed::TYPE_NAME,
            Packet::Opaque(p) => &p.type_name,
        }
    }

    fn schema_version(&self) -> u16 {
        match self {
            Packet::SessionHeader(_) => SessionHeader::CURRENT_VERSION,
            Packet::ThreadInfo(_) => ThreadInfo::CURRENT_VERSION,
            Packet::LogMessage(_) => LogMessage::CURRENT_VERSION,
            Packet::MetricDefinition(_) => MetricDefinition::CURRENT_VERSION,
            Packet::MetricSample(_) => MetricSample::CURRENT_VERSION,
            Packet::Comment(_) => Comment::CURRENT_VERSION,
            Packet::Marker(_) => Marker::CURRENT_VERSION,
            Packet::SessionClosed(_) => SessionClosed::CURRENT_VERSION,
            Packet::Opaque(p) => p.version,
        }
    }

    fn required_packets(&self) -> SmallVec<[PacketGuid; 2]> {
        match self {
            Packet::LogMessage(p) => p.required_packets(),
            Packet::MetricSample(p) => p.required_packets(),
            Packet::Comment(p) => p.required_packets(),
            _ => SmallVec::new(),
        }
    }

    fn cache_id(&self) -> Option<PacketGuid> {
        match self {
            Packet::SessionHeader(p) => p.cache_id(),
            Packet::ThreadInfo(p) => p.cache_id(),
            Packet::MetricDefinition(p) => p.cache_id(),
            _ => None,
        }
    }
}

impl Packet {
    /// The field list this packet serializes as, for declared variants.
    ///
    /// [`Packet::Opaque`] is handled separately by the stream writer since
    /// its field names are owned, not declared.
    pub(crate) fn declared_fields(&self) -> Vec<(&'static str, FieldValue)> {
        match self {
            Packet::SessionHeader(p) => p.fields(),
            Packet::ThreadInfo(p) => p.fields(),
            Packet::LogMessage(p) => p.fields(),
            Packet::MetricDefinition(p) => p.fields(),
            Packet::MetricSample(p) => p.fields(),
            Packet::Comment(p) => p.fields(),
            Packet::Marker(p) => p.fields(),
            Packet::SessionClosed(p) => p.fields(),
            Packet::Opaque(_) => Vec::new(),
        }
    }

    /// Derive this packet's field-list metadata for the version it would
    /// serialize as. Generated fresh per call, never persisted.
    pub fn definition(&self) -> PacketDefinition {
        let fields = match self {
            Packet::Opaque(p) => p
                .fields
                .iter()
                .map(|(name, value)| (name.clone(), value.kind()))
                .collect(),
            _ => self
                .declared_fields()
                .into_iter()
                .map(|(name, value)| (name.to_string(), value.kind()))
                .collect(),
        };
        PacketDefinition::new(self.type_name().to_string(), self.schema_version(), fields)
    }
}

impl From<SessionHeader> for Packet {
    fn from(p: SessionHeader) -> Self {
        Packet::SessionHeader(p)
    }
}

impl From<ThreadInfo> for Packet {
    fn from(p: ThreadInfo) -> Self {
        Packet::ThreadInfo(p)
    }
}

impl From<LogMessage> for Packet {
    fn from(p: LogMessage) -> Self {
        Packet::LogMessage(p)
    }
}

impl From<MetricDefinition> for Packet {
    fn from(p: MetricDefinition) -> Self {
        Packet::MetricDefinition(p)
    }
}

impl From<MetricSample> for Packet {
    fn from(p: MetricSample) -> Self {
        Packet::MetricSample(p)
    }
}

impl From<Comment> for Packet {
    fn from(p: Comment) -> Self {
        Packet::Comment(p)
    }
}

impl From<Marker> for Packet {
    fn from(p: Marker) -> Self {
        Packet::Marker(p)
    }
}

impl From<SessionClosed> for Packet {
    fn from(p: SessionClosed) -> Self {
        Packet::SessionClosed(p)
    }
}
