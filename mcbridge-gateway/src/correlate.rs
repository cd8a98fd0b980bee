//! Pending-request correlation table.
//!
//! Every outbound call that expects a response registers here and gets a
//! UUID correlation id, unique among currently-pending requests. The
//! gateway echoes the id back on the response frame; [`PendingTable::resolve`]
//! hands the response to the waiting caller and removes the entry. Callers
//! enforce their own deadline and must [`PendingTable::abandon`] the entry
//! on timeout so the table cannot grow without bound.

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::codec::ApiResponse;

/// The table of in-flight correlated requests.
#[derive(Debug, Default)]
pub struct PendingTable {
    inner: DashMap<String, oneshot::Sender<ApiResponse>>,
}

impl PendingTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new pending request.
    ///
    /// Returns the correlation id and the receiver the response will be
    /// delivered on.
    pub fn register(&self) -> (String, oneshot::Receiver<ApiResponse>) {
        loop {
            let id = Uuid::new_v4().to_string();
            let (tx, rx) = oneshot::channel();
            // Ids must be unique among pending entries; retry on collision.
            use dashmap::mapref::entry::Entry;
            match self.inner.entry(id.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(tx);
                    return (id, rx);
                }
                Entry::Occupied(_) => continue,
            }
        }
    }

    /// Deliver a response to the matching pending caller.
    ///
    /// Returns `false` when no entry matches (timed out or forged) — the
    /// response is discarded.
    pub fn resolve(&self, id: &str, response: ApiResponse) -> bool {
        match self.inner.remove(id) {
            Some((_, tx)) => {
                if tx.send(response).is_err() {
                    // Caller gave up between timeout and removal.
                    debug!(id, "Pending caller no longer waiting");
                }
                true
            }
            None => {
                warn!(id, "Discarding response with no pending entry");
                false
            }
        }
    }

    /// Remove an entry whose caller stopped waiting (deadline elapsed).
    pub fn abandon(&self, id: &str) -> bool {
        self.inner.remove(id).is_some()
    }

    /// Number of requests currently in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether no requests are in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
