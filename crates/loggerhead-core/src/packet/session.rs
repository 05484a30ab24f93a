//! Session-scoped packet variants: the cached session header, comments,
//! markers, and the closing notice.

use smallvec::{smallvec, SmallVec};

use crate::errors::{CodecError, Result};
use crate::packet::field::{DecodedRecord, FieldValue};
use crate::packet::PacketFormat;
use crate::types::{PacketGuid, SessionId, SessionInfo, Timestamp};

// ----------------------------------------------------------------------------
// Session Header
// ----------------------------------------------------------------------------

/// Cached packet describing the capturing application. Re-emitted at the
/// start of every file the session writes so each file decodes standalone.
///
/// Version history: v1 shipped `product`/`application`/`version`/`host`/`os`;
/// v2 added `environment` and `agent_version`.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionHeader {
    pub id: SessionId,
    pub product: String,
    pub application: String,
    pub version: String,
    pub environment: String,
    pub host: String,
    pub os: String,
    pub agent_version: String,
    pub started: Timestamp,
}

impl SessionHeader {
    pub const TYPE_NAME: &'static str = "session.header";
    pub const CURRENT_VERSION: u16 = 2;

    pub fn new(id: SessionId, info: &SessionInfo, started: Timestamp) -> Self {
        Self {
            id,
            product: info.product.clone(),
            application: info.application.clone(),
            version: info.version.clone(),
            environment: info.environment.clone(),
            host: info.host.clone(),
            os: info.os.clone(),
            agent_version: info.agent_version.clone(),
            started,
        }
    }

    pub(crate) fn fields(&self) -> Vec<(&'static str, FieldValue)> {
        vec![
            ("id", FieldValue::Guid(self.id.as_packet_guid())),
            ("product", FieldValue::Str(self.product.clone())),
            ("application", FieldValue::Str(self.application.clone())),
            ("version", FieldValue::Str(self.version.clone())),
            ("host", FieldValue::Str(self.host.clone())),
            ("os", FieldValue::Str(self.os.clone())),
            ("started", FieldValue::U64(self.started.as_millis())),
            ("environment", FieldValue::Str(self.environment.clone())),
            (
                "agent_version",
                FieldValue::Str(self.agent_version.clone()),
            ),
        ]
    }

    pub(crate) fn from_record(record: &DecodedRecord) -> Result<Self> {
        match record.version {
            1 | 2 => Ok(Self {
                id: SessionId::from_bytes(*record.get_guid("id")?.as_bytes()),
                product: record.get_str("product")?.to_string(),
                application: record.get_str("application")?.to_string(),
                version: record.get_str("version")?.to_string(),
                host: record.get_str("host")?.to_string(),
                os: record.get_str("os")?.to_string(),
                started: Timestamp::from_millis(record.get_u64("started")?),
                // v2 additions; empty when reading a v1 writer's output.
                environment: record.get_str_or_default("environment"),
                agent_version: record.get_str_or_default("agent_version"),
            }),
            newer => Err(CodecError::UnsupportedVersion {
                type_name: Self::TYPE_NAME.into(),
                version: newer,
                newest: Self::CURRENT_VERSION,
            }
            .into()),
        }
    }
}

impl PacketFormat for SessionHeader {
    fn type_name(&self) -> &str {
        Self::TYPE_NAME
    }

    fn schema_version(&self) -> u16 {
        Self::CURRENT_VERSION
    }

    fn cache_id(&self) -> Option<PacketGuid> {
        Some(self.id.as_packet_guid())
    }
}

// ----------------------------------------------------------------------------
// Comment
// ----------------------------------------------------------------------------

/// Free-form annotation attached to a session.
#[derive(Debug, Clone, PartialEq)]
pub struct Comment {
    /// The session header this comment annotates.
    pub session: PacketGuid,
    pub timestamp: Timestamp,
    pub text: String,
}

impl Comment {
    pub const TYPE_NAME: &'static str = "session.comment";
    pub const CURRENT_VERSION: u16 = 1;

    pub fn new(session: PacketGuid, timestamp: Timestamp, text: impl Into<String>) -> Self {
        Self {
            session,
            timestamp,
            text: text.into(),
        }
    }

    pub(crate) fn fields(&self) -> Vec<(&'static str, FieldValue)> {
        vec![
            ("session", FieldValue::PacketRef(self.session)),
            ("timestamp", FieldValue::U64(self.timestamp.as_millis())),
            ("text", FieldValue::Str(self.text.clone())),
        ]
    }

    pub(crate) fn from_record(record: &DecodedRecord) -> Result<Self> {
        match record.version {
            1 => Ok(Self {
                session: record.get_packet_ref("session")?,
                timestamp: Timestamp::from_millis(record.get_u64("timestamp")?),
                text: record.get_str("text")?.to_string(),
            }),
            newer => Err(CodecError::UnsupportedVersion {
                type_name: Self::TYPE_NAME.into(),
                version: newer,
                newest: Self::CURRENT_VERSION,
            }
            .into()),
        }
    }
}

impl PacketFormat for Comment {
    fn type_name(&self) -> &str {
        Self::TYPE_NAME
    }

    fn schema_version(&self) -> u16 {
        Self::CURRENT_VERSION
    }

    fn required_packets(&self) -> SmallVec<[PacketGuid; 2]> {
        smallvec![self.session]
    }
}

// ----------------------------------------------------------------------------
// Marker
// ----------------------------------------------------------------------------

/// A named point in time, used to correlate external events with the log.
#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub timestamp: Timestamp,
    pub label: String,
}

impl Marker {
    pub const TYPE_NAME: &'static str = "session.marker";
    pub const CURRENT_VERSION: u16 = 1;

    pub fn new(timestamp: Timestamp, label: impl Into<String>) -> Self {
        Self {
            timestamp,
            label: label.into(),
        }
    }

    pub(crate) fn fields(&self) -> Vec<(&'static str, FieldValue)> {
        vec![
            ("timestamp", FieldValue::U64(self.timestamp.as_millis())),
            ("label", FieldValue::Str(self.label.clone())),
        ]
    }

    pub(crate) fn from_record(record: &DecodedRecord) -> Result<Self> {
        match record.version {
            1 => Ok(Self {
                timestamp: Timestamp::from_millis(record.get_u64("timestamp")?),
                label: record.get_str("label")?.to_string(),
            }),
            newer => Err(CodecError::UnsupportedVersion {
                type_name: Self::TYPE_NAME.into(),
                version: newer,
                newest: Self::CURRENT_VERSION,
            }
            .into()),
        }
    }
}

impl PacketFormat for Marker {
    fn type_name(&self) -> &str {
        Self::TYPE_NAME
    }

    fn schema_version(&self) -> u16 {
        Self::CURRENT_VERSION
    }
}

// ----------------------------------------------------------------------------
// Session Closed
// ----------------------------------------------------------------------------

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum SessionStatus {
    /// The application ended the session explicitly.
    Normal = 0,
    /// The session file ended without a close packet; inferred on read.
    Crashed = 1,
}

impl SessionStatus {
    pub fn from_i32(value: i32) -> Result<Self> {
        match value {
            0 => Ok(SessionStatus::Normal),
            1 => Ok(SessionStatus::Crashed),
            other => Err(CodecError::frame(format!("invalid session status {other}")).into()),
        }
    }

    pub const fn as_i32(self) -> i32 {
        self as i32
    }
}

/// Final packet of a cleanly ended session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionClosed {
    pub timestamp: Timestamp,
    pub status: SessionStatus,
    /// Messages the session enqueued over its lifetime.
    pub message_count: u64,
}

impl SessionClosed {
    pub const TYPE_NAME: &'static str = "session.closed";
    pub const CURRENT_VERSION: u16 = 1;

    pub fn new(timestamp: Timestamp, status: SessionStatus, message_count: u64) -> Self {
        Self {
            timestamp,
            status,
            message_count,
        }
    }

    pub(crate) fn fields(&self) -> Vec<(&'static str, FieldValue)> {
        vec![
            ("timestamp", FieldValue::U64(self.timestamp.as_millis())),
            ("status", FieldValue::I32(self.status.as_i32())),
            ("message_count", FieldValue::U64(self.message_count)),
        ]
    }

    pub(crate) fn from_record(record: &DecodedRecord) -> Result<Self> {
        match record.version {
            1 => Ok(Self {
                timestamp: Timestamp::from_millis(record.get_u64("timestamp")?),
                status: SessionStatus::from_i32(record.get_i32("status")?)?,
                message_count: record.get_u64("message_count")?,
            }),
            newer => Err(CodecError::UnsupportedVersion {
                type_name: Self::TYPE_NAME.into(),
                version: newer,
                newest: Self::CURRENT_VERSION,
            }
            .into()),
        }
    }
}

impl PacketFormat for SessionClosed {
    fn type_name(&self) -> &str {
        Self::TYPE_NAME
    }

    fn schema_version(&self) -> u16 {
        Self::CURRENT_VERSION
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::field::FieldValue;

    fn sample_info() -> SessionInfo {
        SessionInfo::new("Contoso Suite", "Billing Service", "4.1.0")
            .with_environment("production")
    }

    #[test]
    fn test_session_header_v1_forward_fill() {
        // A v1 writer never emitted environment/agent_version.
        let id = SessionId::generate();
        let mut record = DecodedRecord::new(SessionHeader::TYPE_NAME, 1);
        record.push("id", FieldValue::Guid(id.as_packet_guid()));
        record.push("product", FieldValue::Str("Contoso Suite".into()));
        record.push("application", FieldValue::Str("Billing Service".into()));
        record.push("version", FieldValue::Str("3.0.0".into()));
        record.push("host", FieldValue::Str("web01".into()));
        record.push("os", FieldValue::Str("linux".into()));
        record.push("started", FieldValue::U64(1_000));

        let header = SessionHeader::from_record(&record).unwrap();
        assert_eq!(header.id, id);
        assert_eq!(header.product, "Contoso Suite");
        assert_eq!(header.environment, "");
        assert_eq!(header.agent_version, "");
    }

    #[test]
    fn test_session_header_future_version_rejected() {
        let record = DecodedRecord::new(SessionHeader::TYPE_NAME, 9);
        let err = SessionHeader::from_record(&record).unwrap_err();
        assert!(err.to_string().contains("version 9"));
    }

    #[test]
    fn test_session_header_cache_identity() {
        let header = SessionHeader::new(SessionId::generate(), &sample_info(), Timestamp::now());
        assert_eq!(header.cache_id(), Some(header.id.as_packet_guid()));
    }

    #[test]
    fn test_comment_requires_session() {
        let session = PacketGuid::generate();
        let comment = Comment::new(session, Timestamp::from_millis(5), "checkpoint");
        assert_eq!(comment.required_packets().as_slice(), &[session]);
    }

    #[test]
    fn test_session_status_values() {
        assert_eq!(SessionStatus::from_i32(0).unwrap(), SessionStatus::Normal);
        assert_eq!(SessionStatus::from_i32(1).unwrap(), SessionStatus::Crashed);
        assert!(SessionStatus::from_i32(7).is_err());
    }
}
