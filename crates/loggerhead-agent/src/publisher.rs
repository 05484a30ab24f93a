//! The publisher: one bounded queue, one worker thread, N sinks.
//!
//! Producers enqueue from any thread; the worker drains in strict FIFO
//! order and hands each batch to every registered messenger. Sink failures
//! are retried with bounded backoff on the worker thread itself, so a
//! broken sink slows the pipeline down rather than losing data; a sink that
//! exhausts its retries is disabled for the rest of the process, surfaced
//! exactly once through the alert hub.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use loggerhead_core::errors::{QueueError, Result};
use loggerhead_core::{Packet, PublisherConfig, RetryPolicy};

use crate::alert::AlertHub;
use crate::messenger::{Messenger, SinkSlot};
use crate::queue::{BoundedQueue, CommitMode, CommitTicket, DrainOutcome, Envelope};

// ----------------------------------------------------------------------------
// Publisher
// ----------------------------------------------------------------------------

/// The messenger pipeline head owned by a session.
pub struct Publisher {
    config: PublisherConfig,
    queue: Arc<BoundedQueue>,
    hub: Arc<AlertHub>,
    shutdown: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Publisher {
    /// Build the pipeline and start its worker thread.
    pub fn start(
        config: PublisherConfig,
        retry: RetryPolicy,
        hub: Arc<AlertHub>,
        sinks: Vec<Box<dyn Messenger>>,
    ) -> Result<Self> {
        let queue = Arc::new(BoundedQueue::new(config.effective_queue_length()));
        let slots: Vec<SinkSlot> = sinks.into_iter().map(SinkSlot::new).collect();

        let worker = {
            let queue = queue.clone();
            let hub = hub.clone();
            let flush_interval = config.auto_flush_interval;
            std::thread::Builder::new()
                .name("loggerhead-publisher".into())
                .spawn(move || worker_loop(queue, hub, retry, flush_interval, slots))?
        };

        Ok(Self {
            config,
            queue,
            hub,
            shutdown: AtomicBool::new(false),
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn alerts(&self) -> &Arc<AlertHub> {
        &self.hub
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Enqueue one packet under the caller's commit mode.
    ///
    /// With `force_synchronous` configured, fire-and-forget enqueues are
    /// silently upgraded to wait-for-commit.
    pub fn enqueue(&self, packet: Arc<Packet>, mode: CommitMode) -> Result<()> {
        if self.is_shut_down() {
            return Err(QueueError::ShutDown.into());
        }
        self.enqueue_inner(packet, mode)
    }

    fn enqueue_inner(&self, packet: Arc<Packet>, mode: CommitMode) -> Result<()> {
        let mode = if self.config.force_synchronous && mode == CommitMode::Queued {
            CommitMode::WaitForCommit
        } else {
            mode
        };

        let ticket = match mode {
            CommitMode::Queued => None,
            CommitMode::WaitForThread | CommitMode::WaitForCommit => {
                Some(Arc::new(CommitTicket::new()))
            }
        };

        self.queue.push(
            Envelope {
                packet,
                ticket: ticket.clone(),
            },
            self.config.overflow_timeout,
        )?;

        match (mode, ticket) {
            (CommitMode::Queued, _) => Ok(()),
            (CommitMode::WaitForThread, Some(ticket)) => ticket.wait_dequeued(),
            (CommitMode::WaitForCommit, Some(ticket)) => ticket.wait_committed(),
            _ => unreachable!("ticketed modes always carry a ticket"),
        }
    }

    /// Drain, stop the worker, close the sinks. Idempotent: the second and
    /// later calls return immediately.
    ///
    /// `final_packet`, when given, is committed ahead of the drain so the
    /// stream ends with it.
    pub fn shutdown(&self, final_packet: Option<Arc<Packet>>) -> Result<()> {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let mut result = Ok(());
        if let Some(packet) = final_packet {
            // Best effort: a failed sink must not block session teardown.
            result = self.enqueue_inner(packet, CommitMode::WaitForCommit);
        }

        self.queue.close();
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
        result
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        let _ = self.shutdown(None);
    }
}

// ----------------------------------------------------------------------------
// Worker
// ----------------------------------------------------------------------------

fn worker_loop(
    queue: Arc<BoundedQueue>,
    hub: Arc<AlertHub>,
    retry: RetryPolicy,
    flush_interval: std::time::Duration,
    mut slots: Vec<SinkSlot>,
) {
    let mut batch: Vec<Envelope> = Vec::new();
    loop {
        batch.clear();
        match queue.drain(&mut batch, flush_interval) {
            DrainOutcome::Drained => {
                dispatch_batch(&mut slots, &batch, &hub, &retry);
            }
            DrainOutcome::Idle => {
                for slot in slots.iter_mut().filter(|slot| slot.enabled) {
                    if let Err(err) = slot.sink.flush() {
                        tracing::warn!(sink = slot.sink.name(), error = %err, "idle flush failed");
                    }
                    if let Err(err) = slot.sink.maintain() {
                        tracing::warn!(sink = slot.sink.name(), error = %err, "maintenance failed");
                    }
                }
                hub.poll();
            }
            DrainOutcome::Closed => {
                for slot in slots.iter_mut().filter(|slot| slot.enabled) {
                    if let Err(err) = slot.sink.flush() {
                        tracing::warn!(sink = slot.sink.name(), error = %err, "final flush failed");
                    }
                }
                for slot in slots.iter_mut() {
                    if let Err(err) = slot.sink.close() {
                        tracing::warn!(sink = slot.sink.name(), error = %err, "close failed");
                    }
                }
                hub.poll();
                tracing::debug!("publisher worker stopped");
                return;
            }
        }
    }
}

fn dispatch_batch(
    slots: &mut [SinkSlot],
    batch: &[Envelope],
    hub: &AlertHub,
    retry: &RetryPolicy,
) {
    for envelope in batch {
        if let Some(ticket) = &envelope.ticket {
            ticket.mark_dequeued();
        }
    }

    let packets: Vec<Arc<Packet>> = batch
        .iter()
        .map(|envelope| envelope.packet.clone())
        .collect();
    let wants_commit = batch.iter().any(|envelope| envelope.ticket.is_some());

    for slot in slots.iter_mut().filter(|slot| slot.enabled) {
        if let Err(err) = write_with_retry(slot.sink.as_mut(), &packets, retry) {
            slot.enabled = false;
            tracing::error!(sink = slot.sink.name(), error = %err, "sink disabled");
            hub.raise_sink_failure(slot.sink.name(), &err.to_string());
            continue;
        }
        let over_threshold = slot.sink.buffered_bytes() > slot.sink.flush_threshold();
        if over_threshold || wants_commit {
            if let Err(err) = slot.sink.flush() {
                tracing::warn!(sink = slot.sink.name(), error = %err, "flush failed");
            }
        }
    }

    // The hub sees the batch before any committed producer resumes, so a
    // caller returning from a wait-for-commit enqueue observes the alert
    // state this batch produced.
    hub.observe_batch(&packets);

    // Commit policy: with no sinks registered the pipeline is a validating
    // pass-through; otherwise the batch committed as long as at least one
    // sink is still standing (failed sinks were just disabled above).
    let committed = slots.is_empty() || slots.iter().any(|slot| slot.enabled);
    for envelope in batch {
        if let Some(ticket) = &envelope.ticket {
            if committed {
                ticket.mark_committed();
            } else {
                ticket.mark_failed("no enabled sink accepted the batch");
            }
        }
    }
}

fn write_with_retry(
    sink: &mut dyn Messenger,
    packets: &[Arc<Packet>],
    retry: &RetryPolicy,
) -> Result<()> {
    let mut attempt = 0;
    loop {
        match sink.write_batch(packets) {
            Ok(()) => return Ok(()),
            Err(err) => {
                attempt += 1;
                if attempt >= retry.max_attempts {
                    return Err(err);
                }
                let delay = retry.delay_for(attempt - 1);
                tracing::warn!(
                    sink = sink.name(),
                    error = %err,
                    attempt,
                    ?delay,
                    "sink write failed, backing off"
                );
                std::thread::sleep(delay);
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use loggerhead_core::errors::SinkError;
    use loggerhead_core::{AlertConfig, Marker, Timestamp};
    use parking_lot::Mutex as PlMutex;
    use std::time::Duration;

    /// In-memory sink recording every packet it accepts.
    struct RecordingSink {
        label: String,
        seen: Arc<PlMutex<Vec<String>>>,
        fail_next: Arc<AtomicBool>,
    }

    impl RecordingSink {
        fn new(seen: Arc<PlMutex<Vec<String>>>) -> Self {
            Self {
                label: "recording".into(),
                seen,
                fail_next: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl Messenger for RecordingSink {
        fn name(&self) -> &str {
            &self.label
        }

        fn write_batch(&mut self, batch: &[Arc<Packet>]) -> Result<()> {
            if self.fail_next.load(Ordering::SeqCst) {
                return Err(SinkError::unreachable("intentional test failure").into());
            }
            let mut seen = self.seen.lock();
            for packet in batch {
                if let Packet::Marker(marker) = packet.as_ref() {
                    seen.push(marker.label.clone());
                }
            }
            Ok(())
        }

        fn flush(&mut self) -> Result<()> {
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn marker(label: &str) -> Arc<Packet> {
        Arc::new(Packet::Marker(Marker::new(Timestamp::now(), label)))
    }

    fn start(sinks: Vec<Box<dyn Messenger>>, config: PublisherConfig) -> Publisher {
        Publisher::start(
            config,
            RetryPolicy::testing(),
            Arc::new(AlertHub::new(AlertConfig::testing())),
            sinks,
        )
        .unwrap()
    }

    #[test]
    fn test_fifo_to_sink_across_capacity() {
        let seen = Arc::new(PlMutex::new(Vec::new()));
        let config = PublisherConfig {
            max_queue_length: 64,
            ..PublisherConfig::testing()
        };
        let publisher = start(vec![Box::new(RecordingSink::new(seen.clone()))], config);

        for i in 0..64 {
            publisher
                .enqueue(marker(&format!("m{i}")), CommitMode::Queued)
                .unwrap();
        }
        publisher.shutdown(None).unwrap();

        let expected: Vec<String> = (0..64).map(|i| format!("m{i}")).collect();
        assert_eq!(*seen.lock(), expected);
    }

    #[test]
    fn test_backpressure_not_loss() {
        let seen = Arc::new(PlMutex::new(Vec::new()));
        let config = PublisherConfig {
            max_queue_length: 4,
            overflow_timeout: Duration::from_secs(5),
            auto_flush_interval: Duration::from_millis(20),
            force_synchronous: false,
        };
        let publisher = Arc::new(start(
            vec![Box::new(RecordingSink::new(seen.clone()))],
            config,
        ));

        let mut producers = Vec::new();
        for p in 0..4 {
            let publisher = publisher.clone();
            producers.push(std::thread::spawn(move || {
                for i in 0..50 {
                    publisher
                        .enqueue(marker(&format!("p{p}-{i}")), CommitMode::Queued)
                        .unwrap();
                }
            }));
        }
        for producer in producers {
            producer.join().unwrap();
        }
        publisher.shutdown(None).unwrap();

        // Every successfully enqueued packet reached the sink.
        assert_eq!(seen.lock().len(), 200);
    }

    #[test]
    fn test_wait_for_commit_observes_write() {
        let seen = Arc::new(PlMutex::new(Vec::new()));
        let publisher = start(
            vec![Box::new(RecordingSink::new(seen.clone()))],
            PublisherConfig::testing(),
        );

        publisher
            .enqueue(marker("durable"), CommitMode::WaitForCommit)
            .unwrap();
        // No sleeps: commit already implies the sink saw it.
        assert_eq!(seen.lock().as_slice(), ["durable".to_string()]);

        publisher.shutdown(None).unwrap();
    }

    #[test]
    fn test_force_synchronous_upgrades_queued() {
        let seen = Arc::new(PlMutex::new(Vec::new()));
        let config = PublisherConfig {
            force_synchronous: true,
            ..PublisherConfig::testing()
        };
        let publisher = start(vec![Box::new(RecordingSink::new(seen.clone()))], config);

        publisher.enqueue(marker("sync"), CommitMode::Queued).unwrap();
        assert_eq!(seen.lock().len(), 1);

        publisher.shutdown(None).unwrap();
    }

    #[test]
    fn test_shutdown_is_idempotent_and_drains() {
        let seen = Arc::new(PlMutex::new(Vec::new()));
        let publisher = start(
            vec![Box::new(RecordingSink::new(seen.clone()))],
            PublisherConfig::testing(),
        );

        for i in 0..10 {
            publisher
                .enqueue(marker(&format!("m{i}")), CommitMode::Queued)
                .unwrap();
        }
        publisher.shutdown(None).unwrap();
        publisher.shutdown(None).unwrap();

        assert_eq!(seen.lock().len(), 10);
        assert!(publisher
            .enqueue(marker("late"), CommitMode::Queued)
            .is_err());
    }

    #[test]
    fn test_failing_sink_disabled_and_ticket_fails() {
        let seen = Arc::new(PlMutex::new(Vec::new()));
        let sink = RecordingSink::new(seen.clone());
        let fail_flag = sink.fail_next.clone();
        let hub = Arc::new(AlertHub::new(AlertConfig::testing()));
        let alerts_fired = Arc::new(AtomicBool::new(false));
        {
            let alerts_fired = alerts_fired.clone();
            hub.subscribe(move |_| {
                alerts_fired.store(true, Ordering::SeqCst);
            });
        }

        let publisher = Publisher::start(
            PublisherConfig::testing(),
            RetryPolicy::testing(),
            hub,
            vec![Box::new(sink)],
        )
        .unwrap();

        fail_flag.store(true, Ordering::SeqCst);
        let err = publisher
            .enqueue(marker("doomed"), CommitMode::WaitForCommit)
            .unwrap_err();
        assert!(err.to_string().contains("no enabled sink"));
        assert!(alerts_fired.load(Ordering::SeqCst));

        // The sink stays disabled even after the underlying fault clears;
        // later packets fail fast.
        fail_flag.store(false, Ordering::SeqCst);
        assert!(publisher
            .enqueue(marker("still-doomed"), CommitMode::WaitForCommit)
            .is_err());

        publisher.shutdown(None).unwrap();
    }
}
