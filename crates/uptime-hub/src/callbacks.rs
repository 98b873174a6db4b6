//! Pending dispatch requests keyed by callback id
//!
//! Every dispatch mints a fresh callback id and parks a [`PendingRequest`]
//! here. The validator echoes the id in its reply, and the reply handler
//! takes the record back out. Taking removes, so a duplicated or replayed
//! reply finds nothing the second time.

use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

/// What the hub remembers about one outstanding dispatch
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRequest {
    pub validator_id: String,
    /// Key the reply must be signed with, captured at dispatch time
    pub public_key: String,
    pub website_id: String,
    pub issued_at: Instant,
}

pub struct CallbackCorrelator {
    pending: DashMap<String, PendingRequest>,
}

impl CallbackCorrelator {
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
        }
    }

    /// Mint a new, unique callback id
    pub fn mint_token() -> String {
        Uuid::now_v7().to_string()
    }

    pub fn register(&self, callback_id: &str, request: PendingRequest) {
        self.pending.insert(callback_id.to_string(), request);
    }

    /// Take the pending request for `callback_id`, at most once.
    pub fn resolve(&self, callback_id: &str) -> Option<PendingRequest> {
        let taken = self.pending.remove(callback_id).map(|(_, req)| req);
        if taken.is_none() {
            debug!("No pending request for callback {}", callback_id);
        }
        taken
    }

    /// Abandon a request without processing it
    pub fn drop_token(&self, callback_id: &str) -> bool {
        self.pending.remove(callback_id).is_some()
    }

    /// Drop requests issued more than `max_age` before `now`
    pub fn purge_older_than(&self, max_age: Duration, now: Instant) -> usize {
        let before = self.pending.len();
        self.pending
            .retain(|_, req| now.saturating_duration_since(req.issued_at) < max_age);
        before.saturating_sub(self.pending.len())
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Default for CallbackCorrelator {
    fn default() -> Self {
        Self::new()
    }
}
