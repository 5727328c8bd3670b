//! Per-site gate state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{AcquireError, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::debug;

use crate::scrapers::config::SiteRateLimit;

/// Counters reported by [`super::RenderGate::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateStats {
    pub max_concurrent: usize,
    pub available_permits: usize,
    pub total_renders: u64,
}

/// State for a single site.
#[derive(Debug)]
pub struct SiteState {
    max_concurrent: usize,
    min_interval: Duration,
    slots: Arc<Semaphore>,
    /// Start time of the most recent render. Held across the interval wait
    /// so waiters are released one at a time.
    last_start: Mutex<Option<Instant>>,
    total_renders: AtomicU64,
}

impl SiteState {
    pub fn new(limits: &SiteRateLimit) -> Self {
        let max_concurrent = limits.max_concurrent_renders.max(1);
        Self {
            max_concurrent,
            min_interval: limits.min_interval(),
            slots: Arc::new(Semaphore::new(max_concurrent)),
            last_start: Mutex::new(None),
            total_renders: AtomicU64::new(0),
        }
    }

    /// Take a slot, then wait out the interval since the previous start.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, AcquireError> {
        let permit = Arc::clone(&self.slots).acquire_owned().await?;

        let mut last_start = self.last_start.lock().await;
        if let Some(last) = *last_start {
            let ready_at = last + self.min_interval;
            let now = Instant::now();
            if ready_at > now {
                debug!("Render pacing: waiting {:?}", ready_at - now);
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last_start = Some(Instant::now());
        self.total_renders.fetch_add(1, Ordering::Relaxed);

        Ok(permit)
    }

    pub fn stats(&self) -> GateStats {
        GateStats {
            max_concurrent: self.max_concurrent,
            available_permits: self.slots.available_permits(),
            total_renders: self.total_renders.load(Ordering::Relaxed),
        }
    }
}
