//! Headless-browser rendering for pages that only carry their data after
//! client-side scripts run.
//!
//! Callers go through [`crate::scrapers::RenderService`], which adds the
//! cache and the per-site gate; nothing else should call a [`Renderer`].

mod config;
#[cfg(feature = "browser")]
mod cookies;
mod types;

pub use config::BrowserEngineConfig;
pub use types::{RenderSession, ANONYMOUS_FINGERPRINT};

#[cfg(feature = "browser")]
use std::time::Duration;

use async_trait::async_trait;
#[cfg(feature = "browser")]
use tokio::sync::OnceCell;
#[cfg(feature = "browser")]
use tokio::time::Instant;
#[cfg(feature = "browser")]
use tracing::{debug, info, warn};

#[cfg(feature = "browser")]
use chromiumoxide::cdp::browser_protocol::network::{
    Headers, SetExtraHttpHeadersParams, SetUserAgentOverrideParams,
};
#[cfg(feature = "browser")]
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
#[cfg(feature = "browser")]
use chromiumoxide::handler::HandlerConfig;
#[cfg(feature = "browser")]
use chromiumoxide::{Browser, BrowserConfig, Handler, Page};
#[cfg(feature = "browser")]
use futures::StreamExt;

use super::RenderError;

/// Loads a page and returns its markup once every wait selector is present.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(
        &self,
        url: &str,
        wait_selectors: &[String],
        session: &RenderSession,
    ) -> Result<String, RenderError>;
}

#[cfg(feature = "browser")]
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

#[cfg(feature = "browser")]
const SELECTOR_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[cfg(feature = "browser")]
const READY_STATE_SCRIPT: &str = r#"
    new Promise((resolve) => {
        if (document.readyState === 'complete' || document.readyState === 'interactive') {
            resolve(document.readyState);
        } else {
            document.addEventListener('DOMContentLoaded', () => resolve(document.readyState));
        }
    })
"#;

#[cfg(feature = "browser")]
fn navigation_failed(e: impl std::fmt::Display) -> RenderError {
    RenderError::NavigationFailed(e.to_string())
}

/// Chromium renderer over the DevTools protocol.
///
/// The browser is launched (or connected to) on first use and shared by
/// every render afterwards; each render gets its own tab.
#[cfg(feature = "browser")]
pub struct ChromeRenderer {
    config: BrowserEngineConfig,
    browser: OnceCell<Browser>,
}

#[cfg(feature = "browser")]
impl ChromeRenderer {
    pub fn new(config: BrowserEngineConfig) -> Self {
        Self {
            config,
            browser: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &BrowserEngineConfig {
        &self.config
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout)
    }

    async fn browser(&self) -> Result<&Browser, RenderError> {
        self.browser
            .get_or_try_init(|| async {
                match self.config.remote_url.as_deref() {
                    Some(remote_url) => self.connect_remote(remote_url).await,
                    None => self.launch().await,
                }
            })
            .await
    }

    async fn launch(&self) -> Result<Browser, RenderError> {
        info!(headless = self.config.headless, "Launching Chromium");

        let mut builder = BrowserConfig::builder()
            .request_timeout(self.request_timeout())
            .args([
                "--disable-blink-features=AutomationControlled",
                "--disable-dev-shm-usage",
                "--no-first-run",
                "--no-sandbox",
            ]);
        // Without an explicit path chromiumoxide searches the usual locations.
        if let Some(path) = &self.config.chrome_path {
            builder = builder.chrome_executable(path);
        }
        if !self.config.headless {
            builder = builder.with_head();
        }
        if let Some(proxy) = &self.config.proxy {
            builder = builder.arg(format!("--proxy-server={}", proxy));
        }
        for arg in &self.config.chrome_args {
            builder = builder.arg(arg);
        }

        let config = builder.build().map_err(|e| {
            navigation_failed(format!(
                "cannot start Chromium ({}); set browser.chrome_path or BROWSER_URL",
                e
            ))
        })?;
        let (browser, handler) = Browser::launch(config)
            .await
            .map_err(|e| navigation_failed(format!("failed to launch Chromium: {}", e)))?;
        drive_handler(handler);
        Ok(browser)
    }

    /// Attach to a running browser's DevTools endpoint.
    ///
    /// Accepts either a `ws://` debugger URL or the `http://host:port` base,
    /// in which case the debugger URL is looked up via `/json/version`.
    async fn connect_remote(&self, url: &str) -> Result<Browser, RenderError> {
        let ws_url = if url.contains("/devtools/browser/") {
            url.to_string()
        } else {
            let base = url
                .replacen("ws://", "http://", 1)
                .replacen("wss://", "https://", 1);
            let version_url = format!("{}/json/version", base.trim_end_matches('/'));
            let info: serde_json::Value = reqwest::Client::new()
                .get(&version_url)
                .timeout(self.request_timeout())
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| navigation_failed(format!("{}: {}", version_url, e)))?
                .json()
                .await
                .map_err(|e| navigation_failed(format!("{}: {}", version_url, e)))?;
            info.get("webSocketDebuggerUrl")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .ok_or_else(|| navigation_failed(format!("{} has no webSocketDebuggerUrl", version_url)))?
        };

        info!("Connecting to remote browser at {}", ws_url);
        let handler_config = HandlerConfig {
            request_timeout: self.request_timeout(),
            ..Default::default()
        };
        let (browser, handler) = Browser::connect_with_config(ws_url.as_str(), handler_config)
            .await
            .map_err(|e| navigation_failed(format!("failed to connect to {}: {}", ws_url, e)))?;
        drive_handler(handler);
        Ok(browser)
    }

    async fn render_page(
        &self,
        page: &Page,
        url: &str,
        wait_selectors: &[String],
        session: &RenderSession,
    ) -> Result<String, RenderError> {
        let deadline = Instant::now() + Duration::from_secs(self.config.timeout);

        let user_agent = session
            .user_agent
            .as_deref()
            .or(self.config.user_agent.as_deref())
            .unwrap_or(DEFAULT_USER_AGENT);
        page.execute(SetUserAgentOverrideParams::new(user_agent.to_string()))
            .await
            .map_err(navigation_failed)?;

        if !session.headers.is_empty() {
            let headers = serde_json::to_value(&session.headers).map_err(navigation_failed)?;
            page.execute(SetExtraHttpHeadersParams::new(Headers::new(headers)))
                .await
                .map_err(navigation_failed)?;
        }
        cookies::install_cookies(page, url, &session.cookies).await;

        info!("Rendering {}", url);
        let nav_params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(|e| navigation_failed(format!("invalid URL {}: {}", url, e)))?;

        match tokio::time::timeout_at(deadline, page.execute(nav_params)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(navigation_failed(e)),
            Err(_) => return Err(navigation_failed(format!("timed out loading {}", url))),
        }

        match tokio::time::timeout_at(deadline, page.evaluate(READY_STATE_SCRIPT.to_string())).await {
            Ok(Ok(result)) => {
                let state: String = result
                    .into_value()
                    .unwrap_or_else(|_| "unknown".to_string());
                debug!("Page ready state: {}", state);
            }
            Ok(Err(e)) => debug!("Could not check ready state: {}", e),
            Err(_) => warn!("Timeout waiting for page ready state on {}", url),
        }

        for selector in wait_selectors {
            debug!("Waiting for selector: {}", selector);
            if tokio::time::timeout_at(deadline, wait_for_selector(page, selector))
                .await
                .is_err()
            {
                return Err(RenderError::SelectorTimeout {
                    selector: selector.clone(),
                });
            }
        }

        page.content().await.map_err(navigation_failed)
    }
}

/// Pump DevTools events until the connection closes.
#[cfg(feature = "browser")]
fn drive_handler(mut handler: Handler) {
    tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                debug!("Browser connection closed: {}", e);
                break;
            }
        }
    });
}

/// Poll until `selector` matches. Bounded by the caller's timeout.
#[cfg(feature = "browser")]
async fn wait_for_selector(page: &Page, selector: &str) {
    while page.find_element(selector).await.is_err() {
        tokio::time::sleep(SELECTOR_POLL_INTERVAL).await;
    }
}

#[cfg(feature = "browser")]
#[async_trait]
impl Renderer for ChromeRenderer {
    async fn render(
        &self,
        url: &str,
        wait_selectors: &[String],
        session: &RenderSession,
    ) -> Result<String, RenderError> {
        let browser = self.browser().await?;
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(navigation_failed)?;

        let result = self.render_page(&page, url, wait_selectors, session).await;

        // Close the tab so long runs don't accumulate them.
        let _ = page.close().await;
        result
    }
}

// Stub for when browser feature is disabled
#[cfg(not(feature = "browser"))]
pub struct ChromeRenderer {
    config: BrowserEngineConfig,
}

#[cfg(not(feature = "browser"))]
impl ChromeRenderer {
    pub fn new(config: BrowserEngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BrowserEngineConfig {
        &self.config
    }
}

#[cfg(not(feature = "browser"))]
#[async_trait]
impl Renderer for ChromeRenderer {
    async fn render(
        &self,
        _url: &str,
        _wait_selectors: &[String],
        _session: &RenderSession,
    ) -> Result<String, RenderError> {
        Err(RenderError::NavigationFailed(
            "Browser support not compiled. Rebuild with: cargo build --features browser"
                .to_string(),
        ))
    }
}
