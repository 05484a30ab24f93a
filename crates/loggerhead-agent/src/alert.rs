//! Alert/notification hub.
//!
//! The hub watches the worker's dispatch stream, accumulates log messages
//! into a batch, and notifies subscribers when a message crosses the
//! severity threshold or when messages have been pending longer than the
//! maximum alert interval. After each notification a minimum delay (from
//! configuration, optionally extended by a handler) suppresses further
//! notifications so an error burst produces one alert, not one per message.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use loggerhead_core::{AlertConfig, Packet, Severity, Timestamp};

// ----------------------------------------------------------------------------
// Message Snapshot
// ----------------------------------------------------------------------------

/// Defensive copy of one dispatched log message.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageSummary {
    pub sequence: u64,
    pub timestamp: Timestamp,
    pub severity: Severity,
    pub category: String,
    pub message: String,
}

impl MessageSummary {
    fn from_packet(packet: &Packet) -> Option<Self> {
        match packet {
            Packet::LogMessage(message) => Some(Self {
                sequence: message.sequence,
                timestamp: message.timestamp,
                severity: message.severity,
                category: message.category.clone(),
                message: message.message.clone(),
            }),
            _ => None,
        }
    }
}

/// Per-severity tallies for one alert batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeverityCounts {
    pub critical: usize,
    pub error: usize,
    pub warning: usize,
    pub information: usize,
    pub verbose: usize,
}

impl SeverityCounts {
    fn record(&mut self, severity: Severity) {
        match severity {
            Severity::Critical => self.critical += 1,
            Severity::Error => self.error += 1,
            Severity::Warning => self.warning += 1,
            Severity::Information => self.information += 1,
            Severity::Verbose => self.verbose += 1,
        }
    }

    pub fn count(&self, severity: Severity) -> usize {
        match severity {
            Severity::Critical => self.critical,
            Severity::Error => self.error,
            Severity::Warning => self.warning,
            Severity::Information => self.information,
            Severity::Verbose => self.verbose,
        }
    }
}

// ----------------------------------------------------------------------------
// Message Alert
// ----------------------------------------------------------------------------

/// The snapshot delivered to subscribers.
///
/// The message list is a copy; mutating it cannot affect the hub. A handler
/// may extend the post-notification suppression window with
/// [`MessageAlert::set_minimum_delay`].
pub struct MessageAlert {
    pub total_count: usize,
    pub counts: SeverityCounts,
    pub top_severity: Severity,
    pub oldest: Timestamp,
    pub newest: Timestamp,
    /// Time from the oldest message's capture to dispatch.
    pub latency: Duration,
    pub messages: Vec<MessageSummary>,
    min_delay: Mutex<Option<Duration>>,
}

impl MessageAlert {
    /// Extend the suppression window following this notification. The
    /// longest requested delay wins; a handler cannot shorten the
    /// configured minimum.
    pub fn set_minimum_delay(&self, delay: Duration) {
        let mut slot = self.min_delay.lock();
        *slot = Some(slot.map_or(delay, |existing| existing.max(delay)));
    }

    fn requested_delay(&self) -> Option<Duration> {
        *self.min_delay.lock()
    }
}

// ----------------------------------------------------------------------------
// Subscriptions
// ----------------------------------------------------------------------------

/// Handle for removing a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type AlertCallback = Arc<dyn Fn(&MessageAlert) + Send + Sync>;

// ----------------------------------------------------------------------------
// Alert Hub
// ----------------------------------------------------------------------------

struct HubState {
    pending: Vec<MessageSummary>,
    pending_since: Option<Instant>,
    last_fired: Option<Instant>,
    suppress_until: Option<Instant>,
    failed_sinks: HashSet<String>,
}

/// Aggregates dispatched messages into debounced notifications.
pub struct AlertHub {
    config: AlertConfig,
    state: Mutex<HubState>,
    subscribers: Mutex<Vec<(SubscriptionId, AlertCallback)>>,
    next_id: AtomicU64,
}

impl AlertHub {
    pub fn new(config: AlertConfig) -> Self {
        Self {
            config,
            state: Mutex::new(HubState {
                pending: Vec::new(),
                pending_since: None,
                last_fired: None,
                suppress_until: None,
                failed_sinks: HashSet::new(),
            }),
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a notification callback.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&MessageAlert) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.lock().push((id, Arc::new(callback)));
        id
    }

    /// Remove a subscription. Returns false when the id is unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != id);
        subscribers.len() != before
    }

    /// Messages currently accumulated and not yet delivered.
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Feed one dispatched batch into the hub. Called by the worker after
    /// every successful dispatch.
    pub(crate) fn observe_batch(&self, packets: &[Arc<Packet>]) {
        let now = Instant::now();
        {
            let mut state = self.state.lock();
            for packet in packets {
                if let Some(summary) = MessageSummary::from_packet(packet) {
                    state.pending.push(summary);
                    state.pending_since.get_or_insert(now);
                }
            }
        }
        self.maybe_fire(now);
    }

    /// Time-based check; called by the worker on idle ticks so overdue and
    /// post-suppression notifications fire without new traffic.
    pub(crate) fn poll(&self) {
        self.maybe_fire(Instant::now());
    }

    /// Surface a sink failure exactly once per sink per process.
    pub(crate) fn raise_sink_failure(&self, sink_name: &str, reason: &str) {
        let now = Instant::now();
        {
            let mut state = self.state.lock();
            if !state.failed_sinks.insert(sink_name.to_string()) {
                return;
            }
            state.pending.push(MessageSummary {
                sequence: 0,
                timestamp: Timestamp::now(),
                severity: Severity::Critical,
                category: "loggerhead.agent".into(),
                message: format!("sink {sink_name:?} disabled: {reason}"),
            });
            state.pending_since.get_or_insert(now);
        }
        self.maybe_fire(now);
    }

    fn maybe_fire(&self, now: Instant) {
        let alert = {
            let mut state = self.state.lock();
            if state.pending.is_empty() {
                return;
            }
            if let Some(until) = state.suppress_until {
                if now < until {
                    return;
                }
            }

            let threshold = self.config.severity_threshold;
            let qualifies = state
                .pending
                .iter()
                .any(|summary| summary.severity.is_at_least(threshold));
            let anchor = state.last_fired.or(state.pending_since).unwrap_or(now);
            let overdue = now.duration_since(anchor) >= self.config.max_alert_interval;
            if !qualifies && !overdue {
                return;
            }

            let messages = std::mem::take(&mut state.pending);
            state.pending_since = None;
            state.last_fired = Some(now);

            let mut counts = SeverityCounts::default();
            let mut top = Severity::Verbose;
            let mut oldest = messages[0].timestamp;
            let mut newest = messages[0].timestamp;
            for summary in &messages {
                counts.record(summary.severity);
                top = top.escalate(summary.severity);
                oldest = oldest.min(summary.timestamp);
                newest = newest.max(summary.timestamp);
            }

            MessageAlert {
                total_count: messages.len(),
                counts,
                top_severity: top,
                oldest,
                newest,
                latency: Duration::from_millis(Timestamp::now().millis_since(oldest)),
                messages,
                min_delay: Mutex::new(None),
            }
        };

        // Deliver outside the state lock; a handler may subscribe,
        // unsubscribe, or extend the delay from inside the callback.
        let callbacks: Vec<AlertCallback> = self
            .subscribers
            .lock()
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();
        for callback in callbacks {
            callback(&alert);
        }

        let delay = match (alert.requested_delay(), self.config.minimum_delay) {
            (Some(requested), Some(configured)) => Some(requested.max(configured)),
            (Some(requested), None) => Some(requested),
            (None, configured) => configured,
        };
        if let Some(delay) = delay {
            self.state.lock().suppress_until = Some(now + delay);
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use loggerhead_core::{LogMessage, PacketGuid, ThreadInfo};
    use std::sync::atomic::AtomicUsize;

    fn message(sequence: u64, severity: Severity, thread: PacketGuid) -> Arc<Packet> {
        Arc::new(Packet::LogMessage(LogMessage::new(
            sequence,
            Timestamp::from_millis(sequence),
            severity,
            "test",
            format!("message {sequence}"),
            thread,
        )))
    }

    fn hub(minimum_delay: Option<Duration>) -> AlertHub {
        AlertHub::new(AlertConfig {
            severity_threshold: Severity::Error,
            max_alert_interval: Duration::from_secs(3_600),
            minimum_delay,
        })
    }

    #[test]
    fn test_error_burst_fires_once() {
        let hub = hub(Some(Duration::from_secs(60)));
        let fired = Arc::new(AtomicUsize::new(0));
        {
            let fired = fired.clone();
            hub.subscribe(move |_| {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }

        let thread = PacketGuid::generate();
        // 50 errors across several dispatch batches in a short window.
        for batch in 0..10 {
            let packets: Vec<Arc<Packet>> = (0..5)
                .map(|i| message(batch * 5 + i, Severity::Error, thread))
                .collect();
            hub.observe_batch(&packets);
        }

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        // The first batch was delivered; everything after it is pending.
        assert_eq!(hub.pending_count(), 45);
    }

    #[test]
    fn test_notification_fires_after_delay_with_new_messages() {
        let hub = hub(Some(Duration::from_millis(40)));
        let fired = Arc::new(AtomicUsize::new(0));
        {
            let fired = fired.clone();
            hub.subscribe(move |_| {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }

        let thread = PacketGuid::generate();
        hub.observe_batch(&[message(1, Severity::Error, thread)]);
        hub.observe_batch(&[message(2, Severity::Error, thread)]);
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        std::thread::sleep(Duration::from_millis(60));
        hub.poll();
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_warning_then_error_scenario() {
        let hub = hub(None);
        let seen: Arc<Mutex<Vec<(usize, Severity)>>> = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = seen.clone();
            hub.subscribe(move |alert| {
                seen.lock().push((alert.total_count, alert.top_severity));
            });
        }

        let thread = PacketGuid::generate();
        // Warning alone does not cross the Error threshold...
        hub.observe_batch(&[message(1, Severity::Warning, thread)]);
        assert!(seen.lock().is_empty());

        // ...the Error does, delivering both accumulated messages.
        hub.observe_batch(&[message(2, Severity::Error, thread)]);
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], (2, Severity::Error));
    }

    #[test]
    fn test_overdue_messages_fire_without_qualifying_severity() {
        let hub = AlertHub::new(AlertConfig {
            severity_threshold: Severity::Error,
            max_alert_interval: Duration::from_millis(30),
            minimum_delay: None,
        });
        let fired = Arc::new(AtomicUsize::new(0));
        {
            let fired = fired.clone();
            hub.subscribe(move |_| {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }

        let thread = PacketGuid::generate();
        hub.observe_batch(&[message(1, Severity::Verbose, thread)]);
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        std::thread::sleep(Duration::from_millis(50));
        hub.poll();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_extends_delay() {
        let hub = hub(None);
        {
            hub.subscribe(move |alert| {
                alert.set_minimum_delay(Duration::from_secs(120));
            });
        }

        let thread = PacketGuid::generate();
        hub.observe_batch(&[message(1, Severity::Error, thread)]);
        // The handler's extension now suppresses this qualifying message.
        hub.observe_batch(&[message(2, Severity::Critical, thread)]);
        assert_eq!(hub.pending_count(), 1);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let hub = hub(None);
        let fired = Arc::new(AtomicUsize::new(0));
        let id = {
            let fired = fired.clone();
            hub.subscribe(move |_| {
                fired.fetch_add(1, Ordering::SeqCst);
            })
        };

        let thread = PacketGuid::generate();
        hub.observe_batch(&[message(1, Severity::Error, thread)]);
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        assert!(hub.unsubscribe(id));
        assert!(!hub.unsubscribe(id));
        hub.observe_batch(&[message(2, Severity::Error, thread)]);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_sink_failure_raised_once() {
        let hub = hub(None);
        let fired = Arc::new(AtomicUsize::new(0));
        {
            let fired = fired.clone();
            hub.subscribe(move |alert| {
                assert_eq!(alert.top_severity, Severity::Critical);
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }

        hub.raise_sink_failure("file", "disk full");
        hub.raise_sink_failure("file", "disk full");
        hub.raise_sink_failure("file", "still broken");
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_snapshot_is_defensive() {
        let hub = hub(None);
        let captured: Arc<Mutex<Vec<MessageSummary>>> = Arc::new(Mutex::new(Vec::new()));
        {
            let captured = captured.clone();
            hub.subscribe(move |alert| {
                let mut copy = alert.messages.clone();
                copy.clear(); // mutating the copy is fine
                *captured.lock() = alert.messages.clone();
            });
        }

        let thread = PacketGuid::generate();
        hub.observe_batch(&[message(1, Severity::Error, thread)]);
        assert_eq!(captured.lock().len(), 1);
        assert_eq!(hub.pending_count(), 0);
    }

    #[test]
    fn test_ignores_non_message_packets() {
        let hub = hub(None);
        let info = ThreadInfo::new(1, "worker");
        hub.observe_batch(&[Arc::new(Packet::ThreadInfo(info))]);
        assert_eq!(hub.pending_count(), 0);
    }
}
