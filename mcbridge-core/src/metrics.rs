//! Runtime counters for the bridge.
//!
//! The error policy in this crate is "count, don't crash" for malformed
//! input; these lock-free counters are where those events become visible.
//! They are incremented on the hot path and read by tests and the shutdown
//! summary log.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters for high-frequency bridge events.
#[derive(Debug)]
pub struct BridgeCounters {
    /// Raw lines read off the log stream.
    pub lines_read: AtomicU64,
    /// Lines that matched a parse rule.
    pub events_parsed: AtomicU64,
    /// Malformed or out-of-order lines rejected by the parser.
    pub parse_anomalies: AtomicU64,
    /// Stream resets emitted by the tailer (truncation or rotation).
    pub stream_resets: AtomicU64,
    /// Gateway reconnect attempts.
    pub reconnects: AtomicU64,
    /// Envelopes received from the gateway.
    pub envelopes_in: AtomicU64,
    /// Envelopes sent to the gateway.
    pub envelopes_out: AtomicU64,
    /// AI completions attempted.
    pub ai_calls: AtomicU64,
    /// AI completions that failed or timed out.
    pub ai_failures: AtomicU64,
    /// Records appended to short-term memory.
    pub records_appended: AtomicU64,
    /// Records evicted from short-term into long-term.
    pub records_evicted: AtomicU64,
    /// Periodic checkpoint flushes completed.
    pub checkpoints: AtomicU64,
}

impl BridgeCounters {
    /// Create a new set of zeroed counters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            lines_read: AtomicU64::new(0),
            events_parsed: AtomicU64::new(0),
            parse_anomalies: AtomicU64::new(0),
            stream_resets: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            envelopes_in: AtomicU64::new(0),
            envelopes_out: AtomicU64::new(0),
            ai_calls: AtomicU64::new(0),
            ai_failures: AtomicU64::new(0),
            records_appended: AtomicU64::new(0),
            records_evicted: AtomicU64::new(0),
            checkpoints: AtomicU64::new(0),
        }
    }

    /// Increment a counter by one.
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot all counters for export.
    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            lines_read: self.lines_read.load(Ordering::Relaxed),
            events_parsed: self.events_parsed.load(Ordering::Relaxed),
            parse_anomalies: self.parse_anomalies.load(Ordering::Relaxed),
            stream_resets: self.stream_resets.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            envelopes_in: self.envelopes_in.load(Ordering::Relaxed),
            envelopes_out: self.envelopes_out.load(Ordering::Relaxed),
            ai_calls: self.ai_calls.load(Ordering::Relaxed),
            ai_failures: self.ai_failures.load(Ordering::Relaxed),
            records_appended: self.records_appended.load(Ordering::Relaxed),
            records_evicted: self.records_evicted.load(Ordering::Relaxed),
            checkpoints: self.checkpoints.load(Ordering::Relaxed),
        }
    }
}

impl Default for BridgeCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// A point-in-time copy of all counter values.
#[derive(Debug, Clone, Copy, Default)]
pub struct CounterSnapshot {
    /// Raw lines read off the log stream.
    pub lines_read: u64,
    /// Lines that matched a parse rule.
    pub events_parsed: u64,
    /// Malformed or out-of-order lines rejected by the parser.
    pub parse_anomalies: u64,
    /// Stream resets emitted by the tailer.
    pub stream_resets: u64,
    /// Gateway reconnect attempts.
    pub reconnects: u64,
    /// Envelopes received from the gateway.
    pub envelopes_in: u64,
    /// Envelopes sent to the gateway.
    pub envelopes_out: u64,
    /// AI completions attempted.
    pub ai_calls: u64,
    /// AI completions that failed or timed out.
    pub ai_failures: u64,
    /// Records appended to short-term memory.
    pub records_appended: u64,
    /// Records evicted from short-term into long-term.
    pub records_evicted: u64,
    /// Periodic checkpoint flushes completed.
    pub checkpoints: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_count() {
        let counters = BridgeCounters::new();
        assert_eq!(counters.snapshot().parse_anomalies, 0);

        BridgeCounters::bump(&counters.parse_anomalies);
        BridgeCounters::bump(&counters.parse_anomalies);
        BridgeCounters::bump(&counters.lines_read);

        let snap = counters.snapshot();
        assert_eq!(snap.parse_anomalies, 2);
        assert_eq!(snap.lines_read, 1);
        assert_eq!(snap.events_parsed, 0);
    }
}
