//! Per-site render gate.
//!
//! Composes two controls keyed by site name: a semaphore capping concurrent
//! renders and a minimum interval between render starts. Waiters for the
//! same site are served in FIFO order; nothing here busy-spins.

mod site_state;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, RwLock};
use tracing::debug;

use super::config::SiteRateLimit;
use super::ScrapeError;
pub use site_state::GateStats;
use site_state::SiteState;

/// Process-wide render gate, shared by every site worker of a run.
#[derive(Debug, Clone, Default)]
pub struct RenderGate {
    sites: Arc<RwLock<HashMap<String, Arc<SiteState>>>>,
}

/// Scoped render permit. Dropping it frees the site's slot.
#[derive(Debug)]
pub struct RenderPermit {
    site: String,
    _permit: OwnedSemaphorePermit,
}

impl RenderPermit {
    pub fn site(&self) -> &str {
        &self.site
    }
}

impl RenderGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// The site's state, created from `limits` on first use. Limits given
    /// on later calls for the same site are ignored.
    async fn site_state(&self, site: &str, limits: &SiteRateLimit) -> Arc<SiteState> {
        if let Some(state) = self.sites.read().await.get(site) {
            return Arc::clone(state);
        }
        let mut sites = self.sites.write().await;
        Arc::clone(
            sites
                .entry(site.to_string())
                .or_insert_with(|| Arc::new(SiteState::new(limits))),
        )
    }

    /// Wait for a render slot on `site`, then for its minimum interval.
    ///
    /// Fails with `RateLimitTimeout` when both are not granted within
    /// `limits.acquire_timeout()`.
    pub async fn acquire(
        &self,
        site: &str,
        limits: &SiteRateLimit,
    ) -> Result<RenderPermit, ScrapeError> {
        let timeout = limits.acquire_timeout();
        let state = self.site_state(site, limits).await;

        let permit = tokio::time::timeout(timeout, state.acquire())
            .await
            .map_err(|_| ScrapeError::RateLimitTimeout {
                site: site.to_string(),
                waited: timeout,
            })?
            .map_err(|_| ScrapeError::Extraction {
                site: site.to_string(),
                reason: "render gate closed".to_string(),
            })?;

        debug!(site, "Render permit granted");
        Ok(RenderPermit {
            site: site.to_string(),
            _permit: permit,
        })
    }

    /// Snapshot of per-site counters.
    pub async fn stats(&self) -> HashMap<String, GateStats> {
        self.sites
            .read()
            .await
            .iter()
            .map(|(site, state)| (site.clone(), state.stats()))
            .collect()
    }
}

/// Parse Retry-After header value (seconds).
/// Returns duration to wait, or None if header is missing/invalid.
pub fn parse_retry_after(header_value: Option<&str>) -> Option<Duration> {
    let value = header_value?;
    value
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| Duration::from_secs(secs.min(60)))
}

/// Calculate exponential backoff delay for a given attempt.
pub fn backoff_delay(attempt: u32, base_ms: u64) -> Duration {
    let delay_ms = base_ms.saturating_mul(2u64.saturating_pow(attempt));
    Duration::from_millis(delay_ms.min(60_000))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    fn limits(max: usize, interval_ms: u64) -> SiteRateLimit {
        SiteRateLimit {
            max_concurrent_renders: max,
            min_interval_ms: interval_ms,
            acquire_timeout_secs: 600,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_never_exceeds_cap() {
        let gate = RenderGate::new();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();

        for _ in 0..8 {
            let gate = gate.clone();
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let _permit = gate.acquire("shop", &limits(2, 0)).await.unwrap();
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_render_starts_respect_min_interval() {
        let gate = RenderGate::new();
        let starts = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let mut handles = Vec::new();

        for _ in 0..4 {
            let gate = gate.clone();
            let starts = Arc::clone(&starts);
            handles.push(tokio::spawn(async move {
                let _permit = gate.acquire("shop", &limits(4, 2000)).await.unwrap();
                starts.lock().await.push(Instant::now());
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let mut starts = starts.lock().await.clone();
        starts.sort();
        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(2000));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiters_granted_in_arrival_order() {
        let gate = RenderGate::new();
        let held = gate.acquire("shop", &limits(1, 250)).await.unwrap();
        let granted = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let mut handles = Vec::new();

        for i in 0..5 {
            let gate = gate.clone();
            let granted = Arc::clone(&granted);
            handles.push(tokio::spawn(async move {
                let _permit = gate.acquire("shop", &limits(1, 250)).await.unwrap();
                granted.lock().await.push(i);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }));
            // Let the waiter queue up before the next one arrives.
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        drop(held);
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*granted.lock().await, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sites_are_independent() {
        let gate = RenderGate::new();
        let _held = gate.acquire("a", &limits(1, 0)).await.unwrap();
        let other = gate.acquire("b", &limits(1, 0)).await;
        assert!(other.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_times_out() {
        let gate = RenderGate::new();
        let tight = SiteRateLimit {
            max_concurrent_renders: 1,
            min_interval_ms: 0,
            acquire_timeout_secs: 1,
        };
        let _held = gate.acquire("shop", &tight).await.unwrap();

        match gate.acquire("shop", &tight).await {
            Err(ScrapeError::RateLimitTimeout { site, waited }) => {
                assert_eq!(site, "shop");
                assert_eq!(waited, Duration::from_secs(1));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_permit_released_on_drop() {
        let gate = RenderGate::new();
        let limits = limits(1, 0);
        drop(gate.acquire("shop", &limits).await.unwrap());
        assert!(gate.acquire("shop", &limits).await.is_ok());

        let stats = gate.stats().await;
        assert_eq!(stats["shop"].total_renders, 2);
    }

    #[test]
    fn test_backoff_delay_caps() {
        assert_eq!(backoff_delay(0, 500), Duration::from_millis(500));
        assert_eq!(backoff_delay(2, 500), Duration::from_millis(2000));
        assert_eq!(backoff_delay(40, 500), Duration::from_secs(60));
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after(Some("5")), Some(Duration::from_secs(5)));
        assert_eq!(parse_retry_after(Some("3600")), Some(Duration::from_secs(60)));
        assert_eq!(parse_retry_after(Some("Wed, 21 Oct 2015")), None);
        assert_eq!(parse_retry_after(None), None);
    }
}
