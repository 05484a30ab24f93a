//! Session lifecycle: the process-wide capture handle.
//!
//! There is no implicit global logger. A session exists between an explicit
//! `start_session` and `end_session`, and everything flows through the
//! handle those calls bracket, which makes startup/shutdown ordering
//! testable and leaves the host application in charge of when capture
//! begins and ends.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

use parking_lot::Mutex;

use loggerhead_core::{
    AgentConfig, Comment, LogMessage, Marker, MetricDefinition, MetricSample, Packet, PacketGuid,
    Result, SessionClosed, SessionHeader, SessionId, SessionInfo, SessionStatus, Severity,
    ThreadInfo, Timestamp,
};

use crate::alert::AlertHub;
use crate::file::FileMessenger;
use crate::messenger::Messenger;
use crate::network::NetworkMessenger;
use crate::publisher::Publisher;
use crate::queue::CommitMode;

// ----------------------------------------------------------------------------
// Session Construction
// ----------------------------------------------------------------------------

/// Start a capture session.
///
/// Validates the configuration, builds the configured sinks, starts the
/// pipeline worker, and emits the session header as the first packet.
pub fn start_session(config: AgentConfig, info: SessionInfo) -> Result<SessionHandle> {
    config.validate()?;

    let session_id = SessionId::generate();
    let started = Timestamp::now();
    let hub = Arc::new(AlertHub::new(config.alerts.clone()));

    let mut sinks: Vec<Box<dyn Messenger>> = Vec::new();
    if config.file.enabled {
        sinks.push(Box::new(FileMessenger::new(config.file.clone(), session_id)));
    }
    if config.network.enabled {
        sinks.push(Box::new(NetworkMessenger::new(
            config.network.clone(),
            session_id,
        )));
    }

    let publisher = Publisher::start(
        config.publisher.clone(),
        config.retry.clone(),
        hub.clone(),
        sinks,
    )?;

    let header = SessionHeader::new(session_id, &info, started);
    publisher.enqueue(
        Arc::new(Packet::SessionHeader(header)),
        CommitMode::Queued,
    )?;

    tracing::info!(%session_id, product = %info.product, "session started");

    Ok(SessionHandle {
        inner: Arc::new(SessionShared {
            session_id,
            publisher,
            hub,
            sequence: AtomicU64::new(0),
            threads: Mutex::new(HashMap::new()),
            next_thread_number: AtomicI64::new(1),
            closed: AtomicBool::new(false),
        }),
    })
}

// ----------------------------------------------------------------------------
// Session Handle
// ----------------------------------------------------------------------------

/// Handle on a declared metric series.
#[derive(Debug, Clone)]
pub struct MetricHandle {
    pub id: PacketGuid,
    pub name: String,
}

struct SessionShared {
    session_id: SessionId,
    publisher: Publisher,
    hub: Arc<AlertHub>,
    /// Monotonic sequence across all captured messages and samples.
    sequence: AtomicU64,
    /// Interned thread descriptors, one per logging thread.
    threads: Mutex<HashMap<ThreadId, PacketGuid>>,
    next_thread_number: AtomicI64,
    closed: AtomicBool,
}

/// Cloneable handle to the running session.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<SessionShared>,
}

impl SessionHandle {
    pub fn session_id(&self) -> SessionId {
        self.inner.session_id
    }

    pub fn alerts(&self) -> Arc<AlertHub> {
        self.inner.hub.clone()
    }

    /// Messages and samples captured so far.
    pub fn message_count(&self) -> u64 {
        self.inner.sequence.load(Ordering::Relaxed)
    }

    /// Capture a log message, fire-and-forget.
    pub fn log(
        &self,
        severity: Severity,
        category: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<()> {
        self.log_with(CommitMode::Queued, severity, category, message)
    }

    /// Capture a log message under an explicit commit mode.
    pub fn log_with(
        &self,
        mode: CommitMode,
        severity: Severity,
        category: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<()> {
        let thread = self.intern_current_thread()?;
        let sequence = self.next_sequence();
        let packet = LogMessage::new(
            sequence,
            Timestamp::now(),
            severity,
            category,
            message,
            thread,
        );
        self.enqueue(Packet::LogMessage(packet), mode)
    }

    /// Declare a metric series; samples reference the returned handle.
    pub fn define_metric(
        &self,
        name: impl Into<String>,
        unit: impl Into<String>,
        sampled: bool,
    ) -> Result<MetricHandle> {
        let definition = MetricDefinition::new(name, unit, sampled);
        let handle = MetricHandle {
            id: definition.id,
            name: definition.name.clone(),
        };
        self.enqueue(Packet::MetricDefinition(definition), CommitMode::Queued)?;
        Ok(handle)
    }

    /// Record one observed value of a declared metric.
    pub fn record_metric(&self, metric: &MetricHandle, value: f64) -> Result<()> {
        let sample = MetricSample::new(metric.id, self.next_sequence(), Timestamp::now(), value);
        self.enqueue(Packet::MetricSample(sample), CommitMode::Queued)
    }

    /// Attach a free-form comment to the session.
    pub fn comment(&self, text: impl Into<String>) -> Result<()> {
        let packet = Comment::new(
            self.inner.session_id.as_packet_guid(),
            Timestamp::now(),
            text,
        );
        self.enqueue(Packet::Comment(packet), CommitMode::Queued)
    }

    /// Drop a named marker into the stream.
    pub fn marker(&self, label: impl Into<String>) -> Result<()> {
        let packet = Marker::new(Timestamp::now(), label);
        self.enqueue(Packet::Marker(packet), CommitMode::Queued)
    }

    /// Enqueue an arbitrary packet. The escape hatch for extension types.
    pub fn enqueue(&self, packet: Packet, mode: CommitMode) -> Result<()> {
        self.inner.publisher.enqueue(Arc::new(packet), mode)
    }

    /// End the session: drain the queue with commit semantics, flush and
    /// close every sink, stop the worker. Idempotent: a second call (or
    /// the handle being dropped later) does nothing.
    pub fn end_session(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let closed = SessionClosed::new(
            Timestamp::now(),
            SessionStatus::Normal,
            self.inner.sequence.load(Ordering::Relaxed),
        );
        let result = self
            .inner
            .publisher
            .shutdown(Some(Arc::new(Packet::SessionClosed(closed))));
        tracing::info!(session_id = %self.inner.session_id, "session ended");
        result
    }

    fn next_sequence(&self) -> u64 {
        self.inner.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// First log call from a thread emits its descriptor packet; later
    /// calls reuse the interned GUID.
    fn intern_current_thread(&self) -> Result<PacketGuid> {
        let thread_id = std::thread::current().id();
        if let Some(guid) = self.inner.threads.lock().get(&thread_id) {
            return Ok(*guid);
        }

        let current = std::thread::current();
        let name = current.name().unwrap_or("unnamed").to_string();
        let number = self.inner.next_thread_number.fetch_add(1, Ordering::Relaxed);
        let info = ThreadInfo::new(number, name);
        let guid = info.id;

        // Emit the descriptor before registering so no message referencing
        // it can ever precede it in the queue.
        self.enqueue(Packet::ThreadInfo(info), CommitMode::Queued)?;
        self.inner.threads.lock().insert(thread_id, guid);
        Ok(guid)
    }
}

impl Drop for SessionShared {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Acquire) {
            tracing::warn!(
                session_id = %self.session_id,
                "session dropped without end_session; draining"
            );
            let _ = self.publisher.shutdown(None);
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
