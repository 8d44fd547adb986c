//! Bounded idempotency cache with single-flight collapse.
//!
//! Each idempotency key maps to a `tokio` `OnceCell`: the first caller runs
//! the dispatch and seeds the cell, concurrent callers with the same key
//! await the same cell and receive the identical terminal outcome. Capacity
//! is bounded by LRU eviction; recency is tracked with sequence numbers so
//! the lock is only ever held for O(1) map work (stale order entries are
//! discarded lazily when they surface at the front).

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;

use super::DispatchOutcome;

/// Maximum number of remembered idempotency keys.
pub(crate) const IDEMPOTENCY_CAPACITY: usize = 1024;

pub(crate) struct IdempotencyCache {
    capacity: usize,
    inner: Mutex<Inner>,
}

struct Entry {
    seq: u64,
    cell: Arc<OnceCell<DispatchOutcome>>,
}

#[derive(Default)]
struct Inner {
    next_seq: u64,
    map: HashMap<String, Entry>,
    order: VecDeque<(u64, String)>,
}

impl IdempotencyCache {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// The cell for `key`, creating it on first sight and refreshing its
    /// LRU position otherwise.
    pub(crate) fn entry(&self, key: &str) -> Arc<OnceCell<DispatchOutcome>> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        let seq = inner.next_seq;
        inner.next_seq = inner.next_seq.wrapping_add(1);

        let cell = if let Some(entry) = inner.map.get_mut(key) {
            entry.seq = seq;
            Arc::clone(&entry.cell)
        } else {
            let cell = Arc::new(OnceCell::new());
            inner.map.insert(
                key.to_owned(),
                Entry {
                    seq,
                    cell: Arc::clone(&cell),
                },
            );
            cell
        };
        inner.order.push_back((seq, key.to_owned()));

        // Drop stale order entries (superseded by a later touch of the same
        // key), then evict true LRU entries past capacity.
        loop {
            let front = match inner.order.front() {
                Some((front_seq, front_key)) => (*front_seq, front_key.clone()),
                None => break,
            };
            let live = inner.map.get(&front.1).is_some_and(|e| e.seq == front.0);
            if !live {
                inner.order.pop_front();
                continue;
            }
            if inner.map.len() > self.capacity {
                inner.map.remove(&front.1);
                inner.order.pop_front();
                continue;
            }
            break;
        }

        cell
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .map
            .len()
    }
}

impl Default for IdempotencyCache {
    fn default() -> Self {
        Self::new(IDEMPOTENCY_CAPACITY)
    }
}
