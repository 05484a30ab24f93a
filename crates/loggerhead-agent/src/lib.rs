//! loggerhead-agent: the capture pipeline of the loggerhead
//! logging/instrumentation agent.
//!
//! Application threads enqueue packets into a bounded queue; a single
//! worker thread drains it in FIFO order into the configured messengers
//! (durable session files, live network streaming). Repository mutations
//! are serialized across processes by a reentrant named lock, and an alert
//! hub turns the dispatch stream into debounced notifications.
//!
//! The write path never blocks the host indefinitely by default and never
//! silently loses data: a full queue applies backpressure and ultimately
//! fails the enqueue, a broken sink is retried, disabled, and surfaced.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod alert;
pub mod file;
pub mod lock;
pub mod messenger;
pub mod network;
pub mod publisher;
pub mod queue;
pub mod session;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use alert::{AlertHub, MessageAlert, MessageSummary, SeverityCounts, SubscriptionId};
pub use file::{finished_session_files, FileMessenger, PruneReport, SessionFileReader};
pub use lock::{InterprocessLock, InterprocessLockGuard};
pub use messenger::Messenger;
pub use network::NetworkMessenger;
pub use publisher::Publisher;
pub use queue::{BoundedQueue, CommitMode, CommitTicket, DrainOutcome, Envelope};
pub use session::{start_session, MetricHandle, SessionHandle};

// Re-export the codec crate so applications depend on one name.
pub use loggerhead_core as core;
pub use loggerhead_core::{
    AgentConfig, AlertConfig, FileMessengerConfig, LoggerheadError, NetworkMessengerConfig,
    Packet, PublisherConfig, Result, RetryPolicy, SessionInfo, Severity,
};
