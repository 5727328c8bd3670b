//! Sink collecting normalized records from every site worker.
//!
//! Producers never block on capacity. Consumers poll with [`RaffleQueue::try_pop`]
//! or wait up to a deadline with [`RaffleQueue::pop_timeout`]. No dedup:
//! downstream persistence upserts by [`RaffleId`](crate::models::RaffleId).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

use crate::models::RaffleRecord;

#[derive(Debug, Default)]
struct Inner {
    records: Mutex<VecDeque<RaffleRecord>>,
    available: Notify,
}

/// Multi-producer, multi-consumer record queue. Clones share the same queue.
#[derive(Debug, Clone, Default)]
pub struct RaffleQueue {
    inner: Arc<Inner>,
}

impl RaffleQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> std::sync::MutexGuard<'_, VecDeque<RaffleRecord>> {
        // A producer panicking mid-push leaves the deque itself intact.
        self.inner
            .records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, record: RaffleRecord) {
        self.records().push_back(record);
        self.inner.available.notify_one();
    }

    /// Push a batch under one lock so it lands contiguously.
    pub fn extend(&self, records: impl IntoIterator<Item = RaffleRecord>) {
        let added = {
            let mut queue = self.records();
            let before = queue.len();
            queue.extend(records);
            queue.len() - before
        };
        for _ in 0..added {
            self.inner.available.notify_one();
        }
    }

    /// Next record, or `None` immediately when empty.
    pub fn try_pop(&self) -> Option<RaffleRecord> {
        self.records().pop_front()
    }

    /// Next record, waiting up to `timeout` for one to arrive.
    pub async fn pop_timeout(&self, timeout: Duration) -> Option<RaffleRecord> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.inner.available.notified();
            if let Some(record) = self.try_pop() {
                return Some(record);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_pop();
            }
        }
    }

    /// Take everything currently queued, oldest first.
    pub fn drain(&self) -> Vec<RaffleRecord> {
        self.records().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }
}
