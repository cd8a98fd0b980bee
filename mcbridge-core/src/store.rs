//! Durable long-term memory storage.
//!
//! One append-only JSON-Lines stream per user identity, stored as
//! `<dir>/<user>.jsonl`. Streams are never rewritten in place; readers get
//! the full stream or a most-recent-N suffix. Per-user file locks mean two
//! writers for the same user serialize while different users never contend.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{BridgeError, Result};
use crate::memory::MemoryRecord;

/// Handle to a directory of per-user record streams.
pub struct LongTermStore {
    dir: PathBuf,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl std::fmt::Debug for LongTermStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LongTermStore")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

impl LongTermStore {
    /// Open (creating if needed) the storage directory.
    ///
    /// # Errors
    /// Returns [`BridgeError::Io`] if the directory cannot be created.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            locks: DashMap::new(),
        })
    }

    fn user_lock(&self, user: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(user.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn user_path(&self, user: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", sanitize_user_id(user)))
    }

    /// Append records to a user's stream, in the order given.
    ///
    /// # Errors
    /// Returns [`BridgeError::Serialization`] if a record cannot be
    /// encoded, or [`BridgeError::Io`] on write failure. Nothing is
    /// written unless every record encodes.
    pub fn append(&self, user: &str, records: &[MemoryRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut encoded = Vec::with_capacity(records.len());
        for record in records {
            encoded.push(
                serde_json::to_string(record)
                    .map_err(|e| BridgeError::Serialization(e.to_string()))?,
            );
        }

        let lock = self.user_lock(user);
        let _guard = lock.lock();

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.user_path(user))?;
        for line in &encoded {
            writeln!(file, "{line}")?;
        }
        file.flush()?;

        debug!(user, count = records.len(), "Appended long-term records");
        Ok(())
    }

    /// Read the most recent `n` records of a user's stream, oldest first.
    ///
    /// Corrupt lines are skipped with a warning; a missing stream is an
    /// empty one.
    ///
    /// # Errors
    /// Returns [`BridgeError::Io`] on read failure.
    pub fn read_suffix(&self, user: &str, n: usize) -> Result<Vec<MemoryRecord>> {
        let mut records = self.read_all(user)?;
        if records.len() > n {
            records.drain(..records.len() - n);
        }
        Ok(records)
    }

    /// Read a user's full stream, oldest first.
    ///
    /// # Errors
    /// Returns [`BridgeError::Io`] on read failure.
    pub fn read_all(&self, user: &str) -> Result<Vec<MemoryRecord>> {
        let lock = self.user_lock(user);
        let _guard = lock.lock();

        let content = match std::fs::read_to_string(self.user_path(user)) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<MemoryRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(user, error = %e, "Skipping corrupt long-term record"),
            }
        }
        Ok(records)
    }
}

/// Map an arbitrary user identity onto a safe file stem. Alphanumerics,
/// `-` and `_` pass through; everything else is hex-escaped so distinct
/// identities never collide.
fn sanitize_user_id(user: &str) -> String {
    let mut out = String::with_capacity(user.len());
    for b in user.bytes() {
        match b {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' => out.push(b as char),
            _ => {
                out.push('%');
                out.push_str(&format!("{b:02x}"));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Role;
    use chrono::Utc;

    fn record(user: &str, content: &str) -> MemoryRecord {
        MemoryRecord {
            user_id: user.to_string(),
            role: Role::User,
            content: content.to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn append_then_read_round_trips_in_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LongTermStore::open(dir.path()).expect("open");

        store
            .append("42", &[record("42", "first"), record("42", "second")])
            .expect("append");
        store.append("42", &[record("42", "third")]).expect("append");

        let all = store.read_all("42").expect("read");
        let contents: Vec<_> = all.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(contents, ["first", "second", "third"]);
    }

    #[test]
    fn read_suffix_returns_most_recent_n() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LongTermStore::open(dir.path()).expect("open");

        for i in 0..10 {
            store
                .append("bob", &[record("bob", &format!("turn {i}"))])
                .expect("append");
        }

        let suffix = store.read_suffix("bob", 3).expect("read");
        let contents: Vec<_> = suffix.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(contents, ["turn 7", "turn 8", "turn 9"]);
    }

    #[test]
    fn missing_stream_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LongTermStore::open(dir.path()).expect("open");
        assert!(store.read_all("nobody").expect("read").is_empty());
    }

    #[test]
    fn corrupt_lines_are_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LongTermStore::open(dir.path()).expect("open");

        store.append("eve", &[record("eve", "good")]).expect("append");
        std::fs::OpenOptions::new()
            .append(true)
            .open(dir.path().join("eve.jsonl"))
            .and_then(|mut f| writeln!(f, "{{not json"))
            .expect("inject garbage");
        store.append("eve", &[record("eve", "also good")]).expect("append");

        let all = store.read_all("eve").expect("read");
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn distinct_identities_get_distinct_files() {
        assert_ne!(sanitize_user_id("a/b"), sanitize_user_id("a_b"));
        assert_eq!(sanitize_user_id("Alice_42"), "Alice_42");
        assert_eq!(sanitize_user_id("a/b"), "a%2fb");
    }
}
