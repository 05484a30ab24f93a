//! Metric packets: cached definitions and the samples that reference them.

use smallvec::{smallvec, SmallVec};

use crate::errors::{CodecError, Result};
use crate::packet::field::{DecodedRecord, FieldValue};
use crate::packet::PacketFormat;
use crate::types::{PacketGuid, Timestamp};

// ----------------------------------------------------------------------------
// Metric Definition
// ----------------------------------------------------------------------------

/// Cached packet declaring a metric series.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricDefinition {
    pub id: PacketGuid,
    pub name: String,
    pub unit: String,
    /// True for continuously sampled values, false for event counters.
    pub sampled: bool,
}

impl MetricDefinition {
    pub const TYPE_NAME: &'static str = "metric.def";
    pub const CURRENT_VERSION: u16 = 1;

    pub fn new(name: impl Into<String>, unit: impl Into<String>, sampled: bool) -> Self {
        Self {
            id: PacketGuid::generate(),
            name: name.into(),
            unit: unit.into(),
            sampled,
        }
    }

    pub(crate) fn fields(&self) -> Vec<(&'static str, FieldValue)> {
        vec![
            ("id", FieldValue::Guid(self.id)),
            ("name", FieldValue::Str(self.name.clone())),
            ("unit", FieldValue::Str(self.unit.clone())),
            ("sampled", FieldValue::Bool(self.sampled)),
        ]
    }

    pub(crate) fn from_record(record: &DecodedRecord) -> Result<Self> {
        match record.version {
            1 => Ok(Self {
                id: record.get_guid("id")?,
                name: record.get_str("name")?.to_string(),
                unit: record.get_str("unit")?.to_string(),
                sampled: record.get_bool("sampled")?,
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

impl PacketFormat for MetricDefinition {
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
// Metric Sample
// ----------------------------------------------------------------------------

/// One observed value of a declared metric.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    /// GUID of the [`MetricDefinition`] this sample belongs to.
    pub metric: PacketGuid,
    pub sequence: u64,
    pub timestamp: Timestamp,
    pub value: f64,
}

impl MetricSample {
    pub const TYPE_NAME: &'static str = "metric.sample";
    pub const CURRENT_VERSION: u16 = 1;

    pub fn new(metric: PacketGuid, sequence: u64, timestamp: Timestamp, value: f64) -> Self {
        Self {
            metric,
            sequence,
            timestamp,
            value,
        }
    }

    pub(crate) fn fields(&self) -> Vec<(&'static str, FieldValue)> {
        vec![
            ("metric", FieldValue::PacketRef(self.metric)),
            ("sequence", FieldValue::U64(self.sequence)),
            ("timestamp", FieldValue::U64(self.timestamp.as_millis())),
            ("value", FieldValue::F64(self.value)),
        ]
    }

    pub(crate) fn from_record(record: &DecodedRecord) -> Result<Self> {
        match record.version {
            1 => Ok(Self {
                metric: record.get_packet_ref("metric")?,
                sequence: record.get_u64("sequence")?,
                timestamp: Timestamp::from_millis(record.get_u64("timestamp")?),
                value: record.get_f64("value")?,
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

impl PacketFormat for MetricSample {
    fn type_name(&self) -> &str {
        Self::TYPE_NAME
    }

    fn schema_version(&self) -> u16 {
        Self::CURRENT_VERSION
    }

    fn required_packets(&self) -> SmallVec<[PacketGuid; 2]> {
        smallvec![self.metric]
    }
}
