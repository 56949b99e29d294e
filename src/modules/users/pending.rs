//! Short-lived, single-use tokens carrying a visitor's search across registration.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use uuid::Uuid;

use super::models::PendingSearch;

pub struct PendingActions {
    ttl: Duration,
    entries: Mutex<HashMap<Uuid, (Instant, PendingSearch)>>,
}

impl PendingActions {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn stash(&self, search: PendingSearch) -> Uuid {
        let token = Uuid::new_v4();
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = Instant::now();
        entries.retain(|_, (created, _)| now.duration_since(*created) < self.ttl);
        entries.insert(token, (now, search));
        token
    }

    /// Remove and return the search for `token` if it has not expired.
    pub fn take(&self, token: &Uuid) -> Option<PendingSearch> {
        let (created, search) = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(token)?;
        (created.elapsed() < self.ttl).then_some(search)
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
