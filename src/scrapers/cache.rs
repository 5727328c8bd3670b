//! Rendered-page cache with single-flight per key.
//!
//! Keys hash the URL together with the sorted wait selectors and the
//! session's fingerprint, so the same page awaited on different selectors,
//! or rendered under a different login, is cached separately. Entries live
//! for a short TTL since ticket counts move quickly.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::browser::{RenderSession, ANONYMOUS_FINGERPRINT};
use super::ScrapeError;

/// Bumped when the entry layout or key derivation changes.
const CACHE_FORMAT_VERSION: u32 = 2;

/// A pending render, run only on a cache miss.
pub type RenderFuture<'a> = BoxFuture<'a, Result<String, ScrapeError>>;

/// Cache key: URL, the selector set the page was awaited on and the
/// session it was rendered under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    url: String,
    selectors: Vec<String>,
    session: String,
    digest: String,
}

impl CacheKey {
    /// Key for an anonymous render.
    pub fn new(url: &str, selectors: &[String]) -> Self {
        let mut selectors = selectors.to_vec();
        selectors.sort();
        selectors.dedup();
        Self::build(url.to_string(), selectors, ANONYMOUS_FINGERPRINT.to_string())
    }

    /// Scope the key to the login state of `session`.
    pub fn for_session(self, session: &RenderSession) -> Self {
        Self::build(self.url, self.selectors, session.fingerprint())
    }

    fn build(url: String, selectors: Vec<String>, session: String) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(format!("v{}|{}|{}|", CACHE_FORMAT_VERSION, url, session).as_bytes());
        hasher.update(selectors.join("\n").as_bytes());

        Self {
            url,
            selectors,
            session,
            digest: hex::encode(hasher.finalize()),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn selectors(&self) -> &[String] {
        &self.selectors
    }

    /// Fingerprint of the session the page was rendered under.
    pub fn session(&self) -> &str {
        &self.session
    }

    /// Stable hex digest; also the on-disk file stem.
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

/// Cache consulted on every render.
#[async_trait]
pub trait RenderCache: Send + Sync {
    /// Return cached markup for `key`, or run `render` and store its result.
    ///
    /// Concurrent callers for the same key share a single `render`; failed
    /// renders are not cached.
    async fn get_or_render<'a>(
        &'a self,
        key: &'a CacheKey,
        render: RenderFuture<'a>,
    ) -> Result<String, ScrapeError>;

    /// Drop the entry for `key`, if any.
    async fn invalidate(&self, key: &CacheKey) -> Result<(), ScrapeError>;
}

/// Per-key locks implementing single-flight.
#[derive(Debug, Default)]
struct KeyLocks {
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    fn lock_for(&self, digest: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(digest.to_string()).or_default())
    }

    /// Forget the lock once no caller other than `held` references it.
    fn release(&self, digest: &str, held: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // One reference in the map, one in `held`.
        if Arc::strong_count(&held) <= 2 {
            locks.remove(digest);
        }
    }
}

/// Stored form of a cached render.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    url: String,
    selectors: Vec<String>,
    fetched_at: DateTime<Utc>,
    ttl_secs: u64,
    content: String,
}

impl CacheEntry {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.fetched_at);
        age >= chrono::Duration::zero() && age.num_seconds() < self.ttl_secs as i64
    }
}

/// Disk-backed cache: one JSON file per key under `dir`.
#[derive(Debug)]
pub struct DiskRenderCache {
    dir: PathBuf,
    ttl: Duration,
    locks: KeyLocks,
}

impl DiskRenderCache {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
            locks: KeyLocks::default(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.json", key.digest()))
    }

    /// Read a fresh entry. Missing, stale and corrupt entries are misses.
    async fn read_fresh(&self, key: &CacheKey) -> Option<String> {
        let path = self.entry_path(key);
        let raw = tokio::fs::read(&path).await.ok()?;
        match serde_json::from_slice::<CacheEntry>(&raw) {
            Ok(entry) if entry.url == key.url() && entry.is_fresh(Utc::now()) => {
                Some(entry.content)
            }
            Ok(_) => None,
            Err(e) => {
                warn!("Ignoring corrupt cache entry {}: {}", path.display(), e);
                None
            }
        }
    }

    async fn write(&self, key: &CacheKey, content: &str) -> Result<(), ScrapeError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| ScrapeError::Cache(format!("{}: {}", self.dir.display(), e)))?;

        let entry = CacheEntry {
            url: key.url().to_string(),
            selectors: key.selectors().to_vec(),
            fetched_at: Utc::now(),
            ttl_secs: self.ttl.as_secs(),
            content: content.to_string(),
        };
        let json = serde_json::to_vec(&entry).map_err(|e| ScrapeError::Cache(e.to_string()))?;

        // Write then rename so readers never see a partial entry.
        let path = self.entry_path(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| ScrapeError::Cache(format!("{}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| ScrapeError::Cache(format!("{}: {}", path.display(), e)))
    }

    /// Delete expired and unreadable entries. Returns how many were removed.
    pub async fn purge_expired(&self) -> Result<usize, ScrapeError> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(ScrapeError::Cache(format!("{}: {}", self.dir.display(), e))),
        };

        let now = Utc::now();
        let mut removed = 0;
        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| ScrapeError::Cache(e.to_string()))?
        {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let expired = match tokio::fs::read(&path).await {
                Ok(raw) => match serde_json::from_slice::<CacheEntry>(&raw) {
                    Ok(entry) => !entry.is_fresh(now),
                    Err(_) => true,
                },
                Err(_) => false,
            };
            if expired && tokio::fs::remove_file(&path).await.is_ok() {
                removed += 1;
            }
        }

        debug!("Purged {} expired cache entries", removed);
        Ok(removed)
    }
}

#[async_trait]
impl RenderCache for DiskRenderCache {
    async fn get_or_render<'a>(
        &'a self,
        key: &'a CacheKey,
        render: RenderFuture<'a>,
    ) -> Result<String, ScrapeError> {
        let lock = self.locks.lock_for(key.digest());
        let result = {
            let _guard = lock.lock().await;
            match self.read_fresh(key).await {
                Some(content) => {
                    debug!(url = key.url(), "Render cache hit");
                    Ok(content)
                }
                None => match render.await {
                    Ok(content) => {
                        if let Err(e) = self.write(key, &content).await {
                            warn!("Failed to store render for {}: {}", key.url(), e);
                        }
                        Ok(content)
                    }
                    Err(e) => Err(e),
                },
            }
        };
        self.locks.release(key.digest(), lock);
        result
    }

    async fn invalidate(&self, key: &CacheKey) -> Result<(), ScrapeError> {
        match tokio::fs::remove_file(self.entry_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ScrapeError::Cache(e.to_string())),
        }
    }
}

/// In-process cache with the same semantics as [`DiskRenderCache`].
#[derive(Debug)]
pub struct MemoryRenderCache {
    ttl: Duration,
    entries: StdMutex<HashMap<String, CacheEntry>>,
    locks: KeyLocks,
}

impl MemoryRenderCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: StdMutex::new(HashMap::new()),
            locks: KeyLocks::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_fresh(&self, key: &CacheKey) -> Option<String> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .get(key.digest())
            .filter(|entry| entry.is_fresh(Utc::now()))
            .map(|entry| entry.content.clone())
    }
}

#[async_trait]
impl RenderCache for MemoryRenderCache {
    async fn get_or_render<'a>(
        &'a self,
        key: &'a CacheKey,
        render: RenderFuture<'a>,
    ) -> Result<String, ScrapeError> {
        let lock = self.locks.lock_for(key.digest());
        let result = {
            let _guard = lock.lock().await;
            match self.read_fresh(key) {
                Some(content) => Ok(content),
                None => render.await.map(|content| {
                    let entry = CacheEntry {
                        url: key.url().to_string(),
                        selectors: key.selectors().to_vec(),
                        fetched_at: Utc::now(),
                        ttl_secs: self.ttl.as_secs(),
                        content: content.clone(),
                    };
                    self.entries
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .insert(key.digest().to_string(), entry);
                    content
                }),
            }
        };
        self.locks.release(key.digest(), lock);
        result
    }

    async fn invalidate(&self, key: &CacheKey) -> Result<(), ScrapeError> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key.digest());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_render(calls: Arc<AtomicUsize>, body: &'static str) -> RenderFuture<'static> {
        Box::pin(async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(body.to_string())
        })
    }

    #[test]
    fn test_key_ignores_selector_order() {
        let a = CacheKey::new("https://a.example/", &[".b".to_string(), ".a".to_string()]);
        let b = CacheKey::new("https://a.example/", &[".a".to_string(), ".b".to_string()]);
        let c = CacheKey::new("https://a.example/", &[".a".to_string()]);
        assert_eq!(a.digest(), b.digest());
        assert_ne!(a.digest(), c.digest());
        assert_eq!(a.digest().len(), 64);
    }

    #[tokio::test]
    async fn test_logged_in_render_not_served_to_anonymous() {
        let cache = MemoryRenderCache::new(Duration::from_secs(600));
        let selectors = [".card".to_string()];
        let logged_in = RenderSession {
            cookies: vec![("session".to_string(), "abc".to_string())],
            ..RenderSession::default()
        };
        let member_key = CacheKey::new("https://a.example/raffles", &selectors).for_session(&logged_in);
        let anon_key = CacheKey::new("https://a.example/raffles", &selectors)
            .for_session(&RenderSession::anonymous());

        assert_ne!(member_key.digest(), anon_key.digest());
        assert_eq!(anon_key, CacheKey::new("https://a.example/raffles", &selectors));

        let calls = Arc::new(AtomicUsize::new(0));
        let member = cache
            .get_or_render(&member_key, counting_render(calls.clone(), "members only"))
            .await
            .unwrap();
        let anon = cache
            .get_or_render(&anon_key, counting_render(calls.clone(), "public"))
            .await
            .unwrap();
        assert_eq!(member, "members only");
        assert_eq!(anon, "public");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_disk_single_flight() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(DiskRenderCache::new(dir.path(), Duration::from_secs(600)));
        let key = CacheKey::new("https://a.example/raffles", &[".card".to_string()]);
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let cache = Arc::clone(&cache);
            let key = key.clone();
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_render(&key, counting_render(calls, "<html>ok</html>"))
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), "<html>ok</html>");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disk_survives_new_instance() {
        let dir = tempfile::tempdir().unwrap();
        let key = CacheKey::new("https://a.example/raffles", &[]);
        let calls = Arc::new(AtomicUsize::new(0));

        let first = DiskRenderCache::new(dir.path(), Duration::from_secs(600));
        first
            .get_or_render(&key, counting_render(Arc::clone(&calls), "v1"))
            .await
            .unwrap();

        let second = DiskRenderCache::new(dir.path(), Duration::from_secs(600));
        let content = second
            .get_or_render(&key, counting_render(Arc::clone(&calls), "v2"))
            .await
            .unwrap();

        assert_eq!(content, "v1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disk_invalidate_forces_render() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskRenderCache::new(dir.path(), Duration::from_secs(600));
        let key = CacheKey::new("https://a.example/raffles", &[]);
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .get_or_render(&key, counting_render(Arc::clone(&calls), "v1"))
            .await
            .unwrap();
        cache.invalidate(&key).await.unwrap();
        let content = cache
            .get_or_render(&key, counting_render(Arc::clone(&calls), "v2"))
            .await
            .unwrap();

        assert_eq!(content, "v2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        // Invalidating a missing entry is fine.
        cache.invalidate(&CacheKey::new("https://b.example/", &[])).await.unwrap();
    }

    #[tokio::test]
    async fn test_disk_corrupt_entry_is_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskRenderCache::new(dir.path(), Duration::from_secs(600));
        let key = CacheKey::new("https://a.example/raffles", &[]);
        std::fs::write(cache.entry_path(&key), b"{not json").unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let content = cache
            .get_or_render(&key, counting_render(Arc::clone(&calls), "fresh"))
            .await
            .unwrap();
        assert_eq!(content, "fresh");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_ttl_entries_expire_and_purge() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskRenderCache::new(dir.path(), Duration::ZERO);
        let key = CacheKey::new("https://a.example/raffles", &[]);
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            cache
                .get_or_render(&key, counting_render(Arc::clone(&calls), "x"))
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        std::fs::write(dir.path().join("garbage.json"), b"nope").unwrap();
        assert_eq!(cache.purge_expired().await.unwrap(), 2);
        assert_eq!(cache.purge_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_render_not_cached() {
        let cache = MemoryRenderCache::new(Duration::from_secs(600));
        let key = CacheKey::new("https://a.example/raffles", &[]);

        let failed = cache
            .get_or_render(
                &key,
                Box::pin(async { Err::<String, _>(ScrapeError::Cache("boom".to_string())) }),
            )
            .await;
        assert!(failed.is_err());
        assert!(cache.is_empty());

        let calls = Arc::new(AtomicUsize::new(0));
        cache
            .get_or_render(&key, counting_render(Arc::clone(&calls), "ok"))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_memory_single_flight() {
        let cache = Arc::new(MemoryRenderCache::new(Duration::from_secs(600)));
        let key = CacheKey::new("https://a.example/raffles", &[]);
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let cache = Arc::clone(&cache);
            let key = key.clone();
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache.get_or_render(&key, counting_render(calls, "m")).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
