//! Dual-tier conversational memory.
//!
//! Each user identity gets a bounded short-term session window backed by a
//! durable long-term stream ([`crate::store::LongTermStore`]). The seam
//! between the tiers is a single eviction rule:
//!
//! > when the session window is full, the OLDEST record is appended to
//! > long-term storage and only then discarded from short-term.
//!
//! Eviction is strictly FIFO and blocks on the durable write (one small
//! file append under the per-user lock), so no record is ever lost. After
//! a restart, the first context request for a user seeds the session from
//! the long-term suffix — once per session, never per call.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{BridgeError, Result};
use crate::metrics::BridgeCounters;
use crate::store::LongTermStore;

/// Who produced a memory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The human user.
    User,
    /// The AI responder.
    Assistant,
    /// Bridge-injected context (e.g. game events).
    System,
}

/// One turn of conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// User identity the turn belongs to.
    pub user_id: String,
    /// Who spoke.
    pub role: Role,
    /// What was said.
    pub content: String,
    /// Wall-clock time of the turn.
    pub timestamp: DateTime<Utc>,
}

impl MemoryRecord {
    /// Convenience constructor stamping the current time.
    #[must_use]
    pub fn now(user_id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Per-user session state.
#[derive(Debug, Default)]
struct Session {
    /// Live short-term records, oldest at the front.
    live: VecDeque<MemoryRecord>,
    /// Records read back from long-term (session seed) or drained by a
    /// checkpoint flush. Context falls back to these when `live` is empty;
    /// they are already durable and are never flushed again.
    seed: Vec<MemoryRecord>,
    /// Whether the one-per-session long-term backfill has happened.
    seeded: bool,
}

/// The conversational memory store.
///
/// Cheap to clone via [`Arc`]; per-user operations serialize on the user's
/// session lock while different users proceed in parallel.
pub struct MemoryStore {
    sessions: DashMap<String, Arc<Mutex<Session>>>,
    long_term: LongTermStore,
    capacity: usize,
    counters: Arc<BridgeCounters>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("capacity", &self.capacity)
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}

impl MemoryStore {
    /// Create a store with the given short-term capacity per user.
    #[must_use]
    pub fn new(long_term: LongTermStore, capacity: usize, counters: Arc<BridgeCounters>) -> Self {
        Self {
            sessions: DashMap::new(),
            long_term,
            capacity: capacity.max(1),
            counters,
        }
    }

    fn session(&self, user: &str) -> Arc<Mutex<Session>> {
        self.sessions
            .entry(user.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Session::default())))
            .clone()
    }

    /// Append one record to the user's session, evicting the oldest record
    /// into long-term storage first if the window is full.
    ///
    /// # Errors
    /// Returns the long-term write error if eviction cannot persist the
    /// oldest record (in which case nothing is evicted or admitted), or
    /// [`BridgeError::CapacityViolation`] if the window is found above
    /// capacity — a programming error, not an operational one.
    pub fn append(&self, record: MemoryRecord) -> Result<()> {
        let user = record.user_id.clone();
        let session = self.session(&user);
        let mut session = session.lock();

        if session.live.len() > self.capacity {
            return Err(BridgeError::CapacityViolation {
                user,
                len: session.live.len(),
                capacity: self.capacity,
            });
        }

        if session.live.len() == self.capacity {
            // Move, don't copy: the record is only dropped from the window
            // after the durable append succeeds.
            if let Some(oldest) = session.live.front() {
                self.long_term.append(&user, std::slice::from_ref(oldest))?;
            }
            session.live.pop_front();
            BridgeCounters::bump(&self.counters.records_evicted);
        }

        session.live.push_back(record);
        BridgeCounters::bump(&self.counters.records_appended);
        debug!(user, len = session.live.len(), "Appended memory record");
        Ok(())
    }

    /// The most recent `max_turns` records for a user, oldest first.
    ///
    /// Short-term records win; the long-term suffix is consulted only when
    /// the session window is empty, and read at most once per session.
    ///
    /// # Errors
    /// Returns a storage error if the one-time backfill read fails.
    pub fn context(&self, user: &str, max_turns: usize) -> Result<Vec<MemoryRecord>> {
        let session = self.session(user);
        let mut session = session.lock();

        if session.live.is_empty() && !session.seeded {
            session.seed = self.long_term.read_suffix(user, max_turns)?;
            session.seeded = true;
            if !session.seed.is_empty() {
                info!(user, turns = session.seed.len(), "Seeded session from long-term memory");
            }
        }

        let source: Vec<MemoryRecord> = if session.live.is_empty() {
            session.seed.clone()
        } else {
            session.live.iter().cloned().collect()
        };
        let skip = source.len().saturating_sub(max_turns);
        Ok(source.into_iter().skip(skip).collect())
    }

    /// Drain a user's short-term window into long-term storage.
    ///
    /// Drained records stay available as session context (they move to the
    /// seed buffer) but will not be written again. Returns how many records
    /// were persisted.
    ///
    /// # Errors
    /// Returns the long-term write error; on failure the window is left
    /// untouched.
    pub fn flush_user(&self, user: &str) -> Result<usize> {
        let session = self.session(user);
        let mut session = session.lock();

        if session.live.is_empty() {
            return Ok(0);
        }

        let records: Vec<MemoryRecord> = session.live.iter().cloned().collect();
        self.long_term.append(user, &records)?;

        let count = records.len();
        session.live.clear();
        session.seed.extend(records);
        // The seed only exists to serve context; cap it at one window.
        let len = session.seed.len();
        if len > self.capacity {
            session.seed.drain(..len - self.capacity);
        }
        session.seeded = true;
        Ok(count)
    }

    /// Flush every user's window; used by the periodic checkpoint and on
    /// graceful shutdown. Returns the total number of records persisted.
    ///
    /// # Errors
    /// Returns the first storage error encountered; remaining users are
    /// still attempted on the next checkpoint.
    pub fn flush_all(&self) -> Result<usize> {
        let users: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        let mut total = 0;
        for user in users {
            total += self.flush_user(&user)?;
        }
        BridgeCounters::bump(&self.counters.checkpoints);
        Ok(total)
    }

    /// Direct read access to the durable tier, for tests and tooling.
    #[must_use]
    pub fn long_term(&self) -> &LongTermStore {
        &self.long_term
    }

    /// Current short-term length for a user (0 if no session exists).
    #[must_use]
    pub fn short_term_len(&self, user: &str) -> usize {
        self.sessions
            .get(user)
            .map_or(0, |session| session.lock().live.len())
    }
}
