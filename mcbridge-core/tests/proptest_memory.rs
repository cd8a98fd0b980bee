//! Property-based tests for the dual-tier memory store.
//!
//! Uses `proptest` to verify the structural invariants under arbitrary
//! append/flush sequences:
//!   - the short-term window never exceeds its configured capacity;
//!   - eviction into long-term storage is strictly FIFO;
//!   - no record is ever lost: everything appended is found in the union
//!     of the current window and the durable stream.

use std::sync::Arc;

use proptest::prelude::*;

use mcbridge_core::memory::{MemoryRecord, MemoryStore, Role};
use mcbridge_core::metrics::BridgeCounters;
use mcbridge_core::store::LongTermStore;

fn make_store(dir: &std::path::Path, capacity: usize) -> MemoryStore {
    MemoryStore::new(
        LongTermStore::open(dir).expect("open long-term store"),
        capacity,
        Arc::new(BridgeCounters::new()),
    )
}

fn record(user: &str, i: usize) -> MemoryRecord {
    MemoryRecord::now(user, Role::User, format!("record {i}"))
}

// ---------------------------------------------------------------------------
// Property: short-term length never exceeds capacity
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]
    #[test]
    fn short_term_never_exceeds_capacity(
        capacity in 1..16usize,
        appends in 1..100usize,
    ) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = make_store(dir.path(), capacity);

        for i in 0..appends {
            store.append(record("user", i)).expect("append");
            prop_assert!(store.short_term_len("user") <= capacity);
        }
    }
}

// ---------------------------------------------------------------------------
// Property: eviction order is strictly FIFO
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]
    #[test]
    fn eviction_is_strictly_fifo(
        capacity in 1..8usize,
        appends in 9..60usize,
    ) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = make_store(dir.path(), capacity);

        for i in 0..appends {
            store.append(record("user", i)).expect("append");
        }

        let evicted = store.long_term().read_all("user").expect("read");
        let expected_evictions = appends.saturating_sub(capacity);
        prop_assert_eq!(evicted.len(), expected_evictions);
        for (slot, rec) in evicted.iter().enumerate() {
            prop_assert_eq!(&rec.content, &format!("record {slot}"));
        }
    }
}

// ---------------------------------------------------------------------------
// Property: no record is ever lost (multiset equality)
// ---------------------------------------------------------------------------

/// An arbitrary interleaving of appends (false) and flushes (true).
fn arb_ops() -> impl Strategy<Value = Vec<bool>> {
    prop::collection::vec(prop::bool::weighted(0.15), 1..120)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]
    #[test]
    fn no_record_lost_under_append_flush_interleaving(
        capacity in 1..8usize,
        ops in arb_ops(),
    ) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = make_store(dir.path(), capacity);

        let mut appended = Vec::new();
        let mut next = 0usize;
        for flush in ops {
            if flush {
                store.flush_user("user").expect("flush");
            } else {
                store.append(record("user", next)).expect("append");
                appended.push(format!("record {next}"));
                next += 1;
            }
        }

        // The durable stream plus the live window must cover every append
        // exactly once. (Flushed records also remain visible as context,
        // but only the live window counts toward the multiset.)
        let mut live_and_durable: Vec<String> = store
            .long_term()
            .read_all("user")
            .expect("read")
            .into_iter()
            .map(|r| r.content)
            .collect();
        for i in 0..store.short_term_len("user") {
            // Live records are the tail of the appended sequence.
            let idx = appended.len() - store.short_term_len("user") + i;
            live_and_durable.push(appended[idx].clone());
        }

        live_and_durable.sort();
        let mut expected = appended.clone();
        expected.sort();
        prop_assert_eq!(live_and_durable, expected);
    }
}

// ---------------------------------------------------------------------------
// Property: records survive a process restart via the long-term seed
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]
    #[test]
    fn restart_seeds_context_with_most_recent_records(
        appends in 1..40usize,
        max_turns in 1..10usize,
    ) {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let store = make_store(dir.path(), 8);
            for i in 0..appends {
                store.append(record("user", i)).expect("append");
            }
            store.flush_all().expect("flush");
        }

        let store = make_store(dir.path(), 8);
        let ctx = store.context("user", max_turns).expect("context");

        let expected_len = max_turns.min(appends);
        prop_assert_eq!(ctx.len(), expected_len);
        // The suffix ends with the last record appended.
        if let Some(last) = ctx.last() {
            prop_assert_eq!(&last.content, &format!("record {}", appends - 1));
        }
    }
}
