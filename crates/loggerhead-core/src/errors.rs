//! Error taxonomy for the loggerhead agent.
//!
//! Codec failures are always fatal to the single packet being processed and
//! never to the stream: readers count them and skip to the next frame.
//! Queue and sink failures are recoverable conditions the producer decides
//! how to handle. Lock contention is not an error at all; lock acquisition
//! returns `Option`.

// ----------------------------------------------------------------------------
// Codec Errors
// ----------------------------------------------------------------------------

/// Failures while encoding or decoding a single packet or command message.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("field {field:?} of {type_name} cannot be encoded: {reason}")]
    Encoding {
        type_name: String,
        field: String,
        reason: String,
    },

    #[error("{type_name} version {version} is newer than this reader understands (newest: {newest})")]
    UnsupportedVersion {
        type_name: String,
        version: u16,
        newest: u16,
    },

    #[error("no decode factory registered for packet type {type_name:?}")]
    UnknownPacketType { type_name: String },

    #[error("packet dependency {reference} could not be resolved")]
    MissingDependency { reference: String },

    #[error("missing field {field:?} while decoding {type_name} v{version}")]
    MissingField {
        type_name: String,
        field: &'static str,
        version: u16,
    },

    #[error("field {field:?} carries wire type {actual}, expected {expected}")]
    FieldType {
        field: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("unknown field type tag {0:#04x}")]
    UnknownFieldTag(u8),

    #[error("invalid severity value {0}")]
    InvalidSeverity(i32),

    #[error("malformed frame: {0}")]
    Frame(String),

    #[error("unknown command code {0}")]
    UnknownCommand(u32),

    #[error("I/O failure in codec: {0}")]
    Io(#[from] std::io::Error),
}

impl CodecError {
    /// Shorthand for an encode-side representability failure.
    pub fn encoding(
        type_name: impl Into<String>,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        CodecError::Encoding {
            type_name: type_name.into(),
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// A wire slot index that has no entry in the stream's dependency table.
    pub fn missing_slot(slot: u32) -> Self {
        CodecError::MissingDependency {
            reference: format!("slot {slot}"),
        }
    }

    /// A required packet GUID absent from the resolver.
    pub fn missing_guid(guid: impl std::fmt::Display) -> Self {
        CodecError::MissingDependency {
            reference: format!("packet {guid}"),
        }
    }

    pub fn frame(reason: impl Into<String>) -> Self {
        CodecError::Frame(reason.into())
    }
}

// ----------------------------------------------------------------------------
// Queue Errors
// ----------------------------------------------------------------------------

/// Failures surfaced to producers by the messenger queue.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The bounded queue stayed full past the overflow timeout. The packet
    /// was NOT enqueued; the producer decides whether to retry or drop.
    #[error("message queue full (capacity {capacity}) after waiting {waited_ms}ms")]
    Full { capacity: usize, waited_ms: u64 },

    /// The session has ended; no further packets are accepted.
    #[error("publisher is shut down")]
    ShutDown,
}

// ----------------------------------------------------------------------------
// Sink Errors
// ----------------------------------------------------------------------------

/// Failures inside a messenger sink during the worker's drain cycle.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("sink {name:?} I/O failure: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("sink {name:?} disabled after {attempts} failed write attempts")]
    Disabled { name: String, attempts: u32 },

    #[error("network endpoint unreachable: {reason}")]
    Unreachable { reason: String },

    #[error("repository lock for {path:?} could not be acquired in time")]
    RepositoryBusy { path: String },

    #[error("commit failed: {reason}")]
    Commit { reason: String },
}

impl SinkError {
    pub fn io(name: impl Into<String>, source: std::io::Error) -> Self {
        SinkError::Io {
            name: name.into(),
            source,
        }
    }

    pub fn unreachable(reason: impl Into<String>) -> Self {
        SinkError::Unreachable {
            reason: reason.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Unified Error
// ----------------------------------------------------------------------------

/// Top-level error for the loggerhead agent.
#[derive(Debug, thiserror::Error)]
pub enum LoggerheadError {
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LoggerheadError {
    /// Create a configuration error with a reason.
    pub fn config_error(reason: impl Into<String>) -> Self {
        LoggerheadError::Configuration {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = core::result::Result<T, LoggerheadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversions() {
        let err: LoggerheadError = CodecError::UnknownPacketType {
            type_name: "bogus".into(),
        }
        .into();
        assert!(matches!(err, LoggerheadError::Codec(_)));

        let err: LoggerheadError = QueueError::Full {
            capacity: 10,
            waited_ms: 25,
        }
        .into();
        assert!(err.to_string().contains("capacity 10"));
    }

    #[test]
    fn test_encoding_constructor() {
        let err = CodecError::encoding("log.message", "thread", "unresolved packet reference");
        assert!(err.to_string().contains("log.message"));
        assert!(err.to_string().contains("thread"));
    }
}
