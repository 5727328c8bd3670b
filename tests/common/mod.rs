//! Shared fixtures for integration tests: local HTTP servers and a scripted
//! renderer.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use chrono::{TimeZone, Utc};

use rafflescope::config::Settings;
use rafflescope::scrapers::{
    MemoryRenderCache, RenderError, RenderSession, Renderer, RunContext, SiteConfig,
};

/// Serve `app` on an ephemeral local port.
pub async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Renderer answering from a URL-keyed script and recording every call.
#[derive(Default)]
pub struct ScriptedRenderer {
    pages: HashMap<String, Result<String, RenderError>>,
    calls: AtomicUsize,
    sessions: Mutex<Vec<RenderSession>>,
}

impl ScriptedRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: impl Into<String>, html: impl Into<String>) -> Self {
        self.pages.insert(url.into(), Ok(html.into()));
        self
    }

    pub fn failing(mut self, url: impl Into<String>, error: RenderError) -> Self {
        self.pages.insert(url.into(), Err(error));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn sessions(&self) -> Vec<RenderSession> {
        self.sessions.lock().unwrap().clone()
    }
}

#[async_trait]
impl Renderer for ScriptedRenderer {
    async fn render(
        &self,
        url: &str,
        _wait_selectors: &[String],
        session: &RenderSession,
    ) -> Result<String, RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.sessions.lock().unwrap().push(session.clone());
        self.pages
            .get(url)
            .cloned()
            .unwrap_or_else(|| Err(RenderError::NavigationFailed(format!("no script for {url}"))))
    }
}

/// A run context over `sites` with an in-memory cache and a fixed clock.
pub fn run_context(
    sites: Vec<SiteConfig>,
    renderer: Arc<ScriptedRenderer>,
    secrets: &[(&str, &str)],
) -> RunContext {
    let settings = Settings {
        run_timeout_secs: 30,
        request_timeout_secs: 5,
        fetch_retries: 0,
        sites,
        ..Settings::default()
    };
    let secrets: HashMap<String, String> = secrets
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    RunContext::new(
        settings,
        Arc::new(MemoryRenderCache::new(Duration::from_secs(600))),
        renderer,
        Arc::new(secrets),
    )
    .with_clock(Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap())
}

/// Site with no render pacing so tests run at full speed.
pub fn site(name: &str, url: impl Into<String>) -> SiteConfig {
    let mut site = SiteConfig::new(name, url);
    site.rate_limit.min_interval_ms = 0;
    site.rate_limit.acquire_timeout_secs = 10;
    site
}
