//! Rendering behind the cache and the per-site gate.

use std::sync::Arc;

use tracing::debug;

use super::browser::{RenderSession, Renderer};
use super::cache::{CacheKey, RenderCache, RenderFuture};
use super::config::SiteConfig;
use super::rate_limiter::RenderGate;
use super::ScrapeError;

/// Cache first, then a gate permit, then the renderer. A cache hit never
/// touches the gate.
#[derive(Clone)]
pub struct RenderService {
    gate: RenderGate,
    cache: Arc<dyn RenderCache>,
    renderer: Arc<dyn Renderer>,
}

impl RenderService {
    pub fn new(gate: RenderGate, cache: Arc<dyn RenderCache>, renderer: Arc<dyn Renderer>) -> Self {
        Self {
            gate,
            cache,
            renderer,
        }
    }

    pub fn gate(&self) -> &RenderGate {
        &self.gate
    }

    /// Rendered markup of `url`, awaited on the site's wait selectors.
    ///
    /// `force` drops any cached entry first.
    pub async fn render(
        &self,
        site: &SiteConfig,
        url: &str,
        session: &RenderSession,
        force: bool,
    ) -> Result<String, ScrapeError> {
        let key = CacheKey::new(url, &site.wait_selectors).for_session(session);
        if force {
            self.cache.invalidate(&key).await?;
        }

        let render: RenderFuture<'_> = Box::pin(async move {
            let permit = self.gate.acquire(&site.name, &site.rate_limit).await?;
            debug!(site = permit.site(), url, "Rendering page");
            let html = self
                .renderer
                .render(url, &site.wait_selectors, session)
                .await?;
            drop(permit);
            Ok::<_, ScrapeError>(html)
        });

        self.cache.get_or_render(&key, render).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrapers::cache::MemoryRenderCache;
    use crate::scrapers::config::SiteRateLimit;
    use crate::scrapers::RenderError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingRenderer {
        calls: AtomicUsize,
        result: Result<String, RenderError>,
    }

    #[async_trait]
    impl Renderer for CountingRenderer {
        async fn render(
            &self,
            _url: &str,
            _wait_selectors: &[String],
            _session: &RenderSession,
        ) -> Result<String, RenderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    fn service(result: Result<String, RenderError>) -> (RenderService, Arc<CountingRenderer>) {
        let renderer = Arc::new(CountingRenderer {
            calls: AtomicUsize::new(0),
            result,
        });
        let service = RenderService::new(
            RenderGate::new(),
            Arc::new(MemoryRenderCache::new(Duration::from_secs(600))),
            renderer.clone(),
        );
        (service, renderer)
    }

    fn site() -> SiteConfig {
        let mut site = SiteConfig::new("shop", "https://shop.example/raffles");
        site.wait_selectors = vec![".raffle-card".to_string()];
        site.rate_limit = SiteRateLimit {
            max_concurrent_renders: 1,
            min_interval_ms: 0,
            acquire_timeout_secs: 5,
        };
        site
    }

    #[tokio::test]
    async fn test_second_render_is_cached() {
        let (service, renderer) = service(Ok("<html>ok</html>".to_string()));
        let site = site();
        let session = RenderSession::anonymous();

        let first = service.render(&site, &site.availability_url, &session, false).await.unwrap();
        let second = service.render(&site, &site.availability_url, &session, false).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(service.gate().stats().await["shop"].total_renders, 1);
    }

    #[tokio::test]
    async fn test_force_bypasses_cache() {
        let (service, renderer) = service(Ok("<html>ok</html>".to_string()));
        let site = site();
        let session = RenderSession::anonymous();

        service.render(&site, &site.availability_url, &session, false).await.unwrap();
        service.render(&site, &site.availability_url, &session, true).await.unwrap();
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_selector_timeout_surfaces_as_render_error() {
        let (service, _) = service(Err(RenderError::SelectorTimeout {
            selector: ".raffle-card".to_string(),
        }));
        let site = site();
        let err = service
            .render(&site, &site.availability_url, &RenderSession::anonymous(), false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ScrapeError::Render(RenderError::SelectorTimeout { .. })
        ));
    }

    #[tokio::test]
    async fn test_login_state_gets_its_own_render() {
        let (service, renderer) = service(Ok("<html>ok</html>".to_string()));
        let site = site();
        let token = RenderSession {
            headers: [("Authorization".to_string(), "Bearer t".to_string())].into(),
            ..RenderSession::default()
        };

        service.render(&site, &site.availability_url, &RenderSession::anonymous(), false).await.unwrap();
        service.render(&site, &site.availability_url, &token, false).await.unwrap();
        service.render(&site, &site.availability_url, &token, false).await.unwrap();
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 2);
    }
}
