//! Renderer settings, the `browser` table of the settings file.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Environment variable naming a remote DevTools endpoint.
pub const BROWSER_URL_ENV: &str = "BROWSER_URL";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserEngineConfig {
    /// Set to false to watch renders while debugging a site config.
    pub headless: bool,

    /// Proxy server URL (e.g., "socks5://127.0.0.1:1080").
    pub proxy: Option<String>,

    /// Upper bound in seconds for one render, selector waits included.
    pub timeout: u64,

    /// User agent for rendered pages of sites that configure none.
    pub user_agent: Option<String>,

    /// Chromium binary. Searched for in the usual places when unset.
    pub chrome_path: Option<PathBuf>,

    pub chrome_args: Vec<String>,

    /// Remote DevTools endpoint (e.g., "ws://localhost:9222"). When set, no
    /// local browser is launched.
    pub remote_url: Option<String>,
}

impl Default for BrowserEngineConfig {
    fn default() -> Self {
        Self {
            headless: true,
            proxy: None,
            timeout: 30,
            user_agent: None,
            chrome_path: None,
            chrome_args: Vec::new(),
            remote_url: None,
        }
    }
}

impl BrowserEngineConfig {
    /// `BROWSER_URL`, when set and non-empty, wins over `remote_url`.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(BROWSER_URL_ENV) {
            if !url.trim().is_empty() {
                self.remote_url = Some(url);
            }
        }
        self
    }
}
