//! The bounded messenger queue and commit tickets.
//!
//! Producers are arbitrary application threads; the consumer is exactly one
//! worker thread per publisher. The queue is a plain blocking bounded
//! buffer: a mutex-guarded deque with two condvars. A full queue blocks the
//! producer (bounded by the overflow timeout); it never drops and never
//! grows past capacity.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use loggerhead_core::errors::{QueueError, Result, SinkError};
use loggerhead_core::Packet;

// ----------------------------------------------------------------------------
// Commit Mode
// ----------------------------------------------------------------------------

/// The caller's blocking/durability contract for one enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    /// Fire and forget; returns as soon as the packet is queued.
    Queued,
    /// Block until the worker has dequeued the packet (not necessarily
    /// written it).
    WaitForThread,
    /// Block until the packet has been handed to the sinks' durable-write
    /// path.
    WaitForCommit,
}

// ----------------------------------------------------------------------------
// Commit Ticket
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum TicketState {
    Pending,
    Dequeued,
    Committed,
    Failed(String),
}

/// Tracks one packet's progress through the pipeline so a blocked producer
/// can be woken at the right stage.
pub struct CommitTicket {
    state: Mutex<TicketState>,
    cond: Condvar,
}

impl CommitTicket {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TicketState::Pending),
            cond: Condvar::new(),
        }
    }

    /// The worker pulled the packet off the queue.
    pub fn mark_dequeued(&self) {
        let mut state = self.state.lock();
        if *state == TicketState::Pending {
            *state = TicketState::Dequeued;
            self.cond.notify_all();
        }
    }

    /// The packet reached the sinks' durable-write path.
    pub fn mark_committed(&self) {
        let mut state = self.state.lock();
        *state = TicketState::Committed;
        self.cond.notify_all();
    }

    /// No sink could take the packet.
    pub fn mark_failed(&self, reason: impl Into<String>) {
        let mut state = self.state.lock();
        if *state != TicketState::Committed {
            *state = TicketState::Failed(reason.into());
            self.cond.notify_all();
        }
    }

    /// Block until the worker has dequeued the packet.
    pub fn wait_dequeued(&self) -> Result<()> {
        let mut state = self.state.lock();
        loop {
            match &*state {
                TicketState::Pending => self.cond.wait(&mut state),
                TicketState::Dequeued | TicketState::Committed => return Ok(()),
                TicketState::Failed(reason) => {
                    return Err(SinkError::Commit {
                        reason: reason.clone(),
                    }
                    .into())
                }
            }
        }
    }

    /// Block until the packet is committed or failed.
    pub fn wait_committed(&self) -> Result<()> {
        let mut state = self.state.lock();
        loop {
            match &*state {
                TicketState::Pending | TicketState::Dequeued => self.cond.wait(&mut state),
                TicketState::Committed => return Ok(()),
                TicketState::Failed(reason) => {
                    return Err(SinkError::Commit {
                        reason: reason.clone(),
                    }
                    .into())
                }
            }
        }
    }
}

impl Default for CommitTicket {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// Envelope
// ----------------------------------------------------------------------------

/// One queued packet plus its optional commit ticket.
pub struct Envelope {
    pub packet: Arc<Packet>,
    pub ticket: Option<Arc<CommitTicket>>,
}

// ----------------------------------------------------------------------------
// Bounded Queue
// ----------------------------------------------------------------------------

/// Result of one worker drain attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Envelopes were moved into the caller's buffer.
    Drained,
    /// Nothing arrived within the idle wait; time for an auto-flush tick.
    Idle,
    /// The queue is closed and fully drained; the worker should finish up.
    Closed,
}

struct Inner {
    items: VecDeque<Envelope>,
    closed: bool,
}

/// Blocking bounded FIFO between producers and the single worker.
pub struct BoundedQueue {
    inner: Mutex<Inner>,
    not_full: Condvar,
    not_empty: Condvar,
    capacity: usize,
}

impl BoundedQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity.min(1024)),
                closed: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Enqueue, blocking while full up to `overflow_timeout`.
    pub fn push(&self, envelope: Envelope, overflow_timeout: Duration) -> Result<()> {
        let start = Instant::now();
        let deadline = start + overflow_timeout;
        let mut inner = self.inner.lock();

        loop {
            if inner.closed {
                return Err(QueueError::ShutDown.into());
            }
            if inner.items.len() < self.capacity {
                inner.items.push_back(envelope);
                self.not_empty.notify_one();
                return Ok(());
            }
            if self.not_full.wait_until(&mut inner, deadline).timed_out() {
                // One last look in case space appeared with the timeout.
                if inner.closed {
                    return Err(QueueError::ShutDown.into());
                }
                if inner.items.len() < self.capacity {
                    inner.items.push_back(envelope);
                    self.not_empty.notify_one();
                    return Ok(());
                }
                return Err(QueueError::Full {
                    capacity: self.capacity,
                    waited_ms: start.elapsed().as_millis() as u64,
                }
                .into());
            }
        }
    }

    /// Worker side: move every queued envelope into `out`, preserving FIFO
    /// order. Waits up to `idle_wait` when the queue is empty.
    pub fn drain(&self, out: &mut Vec<Envelope>, idle_wait: Duration) -> DrainOutcome {
        let mut inner = self.inner.lock();
        if inner.items.is_empty() && !inner.closed {
            let _ = self.not_empty.wait_for(&mut inner, idle_wait);
        }
        if inner.items.is_empty() {
            return if inner.closed {
                DrainOutcome::Closed
            } else {
                DrainOutcome::Idle
            };
        }
        out.extend(inner.items.drain(..));
        self.not_full.notify_all();
        DrainOutcome::Drained
    }

    /// Stop accepting new envelopes. Already-queued envelopes still drain.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
