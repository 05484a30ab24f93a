//! Log message packets and the cached per-thread descriptor they reference.

use smallvec::{smallvec, SmallVec};

use crate::errors::{CodecError, Result};
use crate::packet::field::{DecodedRecord, FieldValue};
use crate::packet::PacketFormat;
use crate::types::{PacketGuid, Severity, Timestamp};

// ----------------------------------------------------------------------------
// Thread Info
// ----------------------------------------------------------------------------

/// Cached descriptor of one application thread.
///
/// Emitted once per thread per stream; every log message from that thread
/// references it instead of repeating the thread name.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadInfo {
    pub id: PacketGuid,
    pub thread_id: i64,
    pub thread_name: String,
}

impl ThreadInfo {
    pub const TYPE_NAME: &'static str = "thread.info";
    pub const CURRENT_VERSION: u16 = 1;

    pub fn new(thread_id: i64, thread_name: impl Into<String>) -> Self {
        Self {
            id: PacketGuid::generate(),
            thread_id,
            thread_name: thread_name.into(),
        }
    }

    pub(crate) fn fields(&self) -> Vec<(&'static str, FieldValue)> {
        vec![
            ("id", FieldValue::Guid(self.id)),
            ("thread_id", FieldValue::I64(self.thread_id)),
            ("thread_name", FieldValue::Str(self.thread_name.clone())),
        ]
    }

    pub(crate) fn from_record(record: &DecodedRecord) -> Result<Self> {
        match record.version {
            1 => Ok(Self {
                id: record.get_guid("id")?,
                thread_id: record.get_i64("thread_id")?,
                thread_name: record.get_str("thread_name")?.to_string(),
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

impl PacketFormat for ThreadInfo {
    fn type_name(&self) -> &str {
        Self::TYPE_NAME
    }

    fn schema_version(&self) -> u16 {
        Self::CURRENT_VERSION
    }

    fn cache_id(&self) -> Option<PacketGuid> {
        Some(self.id)
    }
}

// ----------------------------------------------------------------------------
// Log Message
// ----------------------------------------------------------------------------

/// One captured log message.
///
/// Version history: v1 shipped sequence/timestamp/severity/category/message/
/// thread; v2 added `method`, `source_file`, and `line_number` for caller
/// attribution.
#[derive(Debug, Clone, PartialEq)]
pub struct LogMessage {
    /// Monotonic per-session sequence number; the authoritative message
    /// order downstream.
    pub sequence: u64,
    pub timestamp: Timestamp,
    pub severity: Severity,
    pub category: String,
    pub message: String,
    /// GUID of the [`ThreadInfo`] packet for the emitting thread.
    pub thread: PacketGuid,
    pub method: String,
    pub source_file: String,
    pub line_number: i32,
}

impl LogMessage {
    pub const TYPE_NAME: &'static str = "log.message";
    pub const CURRENT_VERSION: u16 = 2;

    pub fn new(
        sequence: u64,
        timestamp: Timestamp,
        severity: Severity,
        category: impl Into<String>,
        message: impl Into<String>,
        thread: PacketGuid,
    ) -> Self {
        Self {
            sequence,
            timestamp,
            severity,
            category: category.into(),
            message: message.into(),
            thread,
            method: String::new(),
            source_file: String::new(),
            line_number: 0,
        }
    }

    /// Attach caller attribution (v2 fields).
    pub fn with_location(
        mut self,
        method: impl Into<String>,
        source_file: impl Into<String>,
        line_number: i32,
    ) -> Self {
        self.method = method.into();
        self.source_file = source_file.into();
        self.line_number = line_number;
        self
    }

    pub(crate) fn fields(&self) -> Vec<(&'static str, FieldValue)> {
        vec![
            ("sequence", FieldValue::U64(self.sequence)),
            ("timestamp", FieldValue::U64(self.timestamp.as_millis())),
            ("severity", FieldValue::I32(self.severity.as_i32())),
            ("category", FieldValue::Str(self.category.clone())),
            ("message", FieldValue::Str(self.message.clone())),
            ("thread", FieldValue::PacketRef(self.thread)),
            ("method", FieldValue::Str(self.method.clone())),
            ("source_file", FieldValue::Str(self.source_file.clone())),
            ("line_number", FieldValue::I32(self.line_number)),
        ]
    }

    pub(crate) fn from_record(record: &DecodedRecord) -> Result<Self> {
        match record.version {
            1 | 2 => Ok(Self {
                sequence: record.get_u64("sequence")?,
                timestamp: Timestamp::from_millis(record.get_u64("timestamp")?),
                severity: Severity::from_i32(record.get_i32("severity")?)?,
                category: record.get_str("category")?.to_string(),
                message: record.get_str("message")?.to_string(),
                thread: record.get_packet_ref("thread")?,
                // v2 additions; defaulted when reading a v1 writer's output.
                method: record.get_str_or_default("method"),
                source_file: record.get_str_or_default("source_file"),
                line_number: record.get_i32_or("line_number", 0),
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

impl PacketFormat for LogMessage {
    fn type_name(&self) -> &str {
        Self::TYPE_NAME
    }

    fn schema_version(&self) -> u16 {
        Self::CURRENT_VERSION
    }

    fn required_packets(&self) -> SmallVec<[PacketGuid; 2]> {
        smallvec![self.thread]
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_message_v1_defaults_location() {
        let thread = PacketGuid::generate();
        let mut record = DecodedRecord::new(LogMessage::TYPE_NAME, 1);
        record.push("sequence", FieldValue::U64(12));
        record.push("timestamp", FieldValue::U64(99));
        record.push("severity", FieldValue::I32(Severity::Warning.as_i32()));
        record.push("category", FieldValue::Str("db.pool".into()));
        record.push("message", FieldValue::Str("pool exhausted".into()));
        record.push("thread", FieldValue::PacketRef(thread));

        let message = LogMessage::from_record(&record).unwrap();
        assert_eq!(message.sequence, 12);
        assert_eq!(message.severity, Severity::Warning);
        assert_eq!(message.thread, thread);
        assert_eq!(message.method, "");
        assert_eq!(message.line_number, 0);
    }

    #[test]
    fn test_log_message_requires_thread() {
        let thread = PacketGuid::generate();
        let message = LogMessage::new(
            1,
            Timestamp::from_millis(5),
            Severity::Information,
            "app",
            "started",
            thread,
        );
        assert_eq!(message.required_packets().as_slice(), &[thread]);
    }

    #[test]
    fn test_log_message_future_version_rejected() {
        let record = DecodedRecord::new(LogMessage::TYPE_NAME, 3);
        assert!(LogMessage::from_record(&record).is_err());
    }

    #[test]
    fn test_thread_info_cache_identity() {
        let info = ThreadInfo::new(42, "worker-1");
        assert_eq!(info.cache_id(), Some(info.id));
    }

    #[test]
    fn test_bad_severity_rejected() {
        let mut record = DecodedRecord::new(LogMessage::TYPE_NAME, 1);
        record.push("sequence", FieldValue::U64(1));
        record.push("timestamp", FieldValue::U64(1));
        record.push("severity", FieldValue::I32(99));
        record.push("category", FieldValue::Str("x".into()));
        record.push("message", FieldValue::Str("y".into()));
        record.push("thread", FieldValue::PacketRef(PacketGuid::generate()));
        assert!(LogMessage::from_record(&record).is_err());
    }
}
