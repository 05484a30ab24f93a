//! loggerhead-core: packet codec and wire protocol for the loggerhead
//! logging/instrumentation agent.
//!
//! This crate owns everything about how captured data is represented:
//! the self-describing versioned packet format, the frame layer that makes
//! streams crash-tolerant, the decode-factory registry, the network command
//! vocabulary, and the configuration value objects the pipeline consumes.
//! It deliberately knows nothing about threads, files, or sockets; that is
//! the agent crate's business.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod commands;
pub mod config;
pub mod errors;
pub mod packet;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use commands::CommandMessage;
pub use config::{
    AgentConfig, AlertConfig, FileMessengerConfig, NetworkMessengerConfig, PublisherConfig,
    RetryPolicy,
};
pub use errors::{CodecError, LoggerheadError, QueueError, Result, SinkError};
pub use packet::framing::{FrameReader, PacketStreamReader, PacketStreamWriter};
pub use packet::registry::{DependencyResolver, NoDependencies, PacketRegistry};
pub use packet::{
    Comment, LogMessage, Marker, MetricDefinition, MetricSample, OpaquePacket, Packet,
    PacketFormat, SessionClosed, SessionHeader, SessionStatus, ThreadInfo,
};
pub use types::{PacketGuid, SessionId, SessionInfo, Severity, Timestamp};
