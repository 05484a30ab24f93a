//! The sink seam: messengers a publisher drains into.

use std::sync::Arc;

use loggerhead_core::{Packet, Result};

/// A durable or transmitting endpoint for dispatched packets.
///
/// Implementations are driven exclusively by the publisher's single worker
/// thread, so they need no internal synchronization on the write path.
/// A messenger must never mutate a packet; everything it receives is shared
/// and logically immutable.
pub trait Messenger: Send {
    /// Short stable name for diagnostics and failure reporting.
    fn name(&self) -> &str;

    /// Write a dispatched batch, in order. Called only from the worker.
    fn write_batch(&mut self, batch: &[Arc<Packet>]) -> Result<()>;

    /// Bytes accepted but not yet pushed to the durable layer.
    fn buffered_bytes(&self) -> u64 {
        0
    }

    /// Buffered bytes above this trigger an immediate flush after a batch.
    fn flush_threshold(&self) -> u64 {
        64 * 1024
    }

    /// Push buffered data down to the durable layer.
    fn flush(&mut self) -> Result<()>;

    /// Periodic housekeeping on idle ticks (age-based rotation, pruning).
    fn maintain(&mut self) -> Result<()> {
        Ok(())
    }

    /// Finalize and release resources. Called once at session end.
    fn close(&mut self) -> Result<()>;
}

/// Worker-side bookkeeping for one registered messenger.
pub(crate) struct SinkSlot {
    pub sink: Box<dyn Messenger>,
    pub enabled: bool,
}

impl SinkSlot {
    pub fn new(sink: Box<dyn Messenger>) -> Self {
        Self {
            sink,
            enabled: true,
        }
    }
}
