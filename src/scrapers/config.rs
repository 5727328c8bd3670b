//! Site configuration types.
//!
//! These structs define the per-site behavior of the extraction engine:
//! where the listing lives, how to log in, which strategy to run, how to
//! read structured JSON and rendered cards, and how hard to hit the site.
//! Secrets are never part of the configuration; only the names of the
//! environment variables holding them are.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::ConfigError;

/// Configuration describing how to pull raffles from one site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Human-readable site name; also the source name on emitted records.
    pub name: String,
    /// Availability / listing endpoint.
    pub availability_url: String,
    /// Additional listing pages scraped after `availability_url`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pages: Vec<String>,
    #[serde(default)]
    pub strategy: StrategyKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login: Option<LoginConfig>,
    /// Continue without credentials when login is impossible.
    #[serde(default = "default_true")]
    pub allow_anonymous: bool,
    /// Selectors that must all be present before a rendered page is read.
    #[serde(default)]
    pub wait_selectors: Vec<String>,
    #[serde(default)]
    pub rate_limit: SiteRateLimit,
    /// `None` for the default agent, `"impersonate"` for a browser agent,
    /// anything else is sent verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Structured-data URLs tried after the ones discovered in the markup.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub known_endpoints: Vec<String>,
    #[serde(default)]
    pub json: JsonExtraction,
    #[serde(default)]
    pub html: HtmlExtraction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

fn default_true() -> bool {
    true
}

impl SiteConfig {
    /// Minimal config for a site, everything else defaulted.
    pub fn new(name: impl Into<String>, availability_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            availability_url: availability_url.into(),
            pages: Vec::new(),
            strategy: StrategyKind::default(),
            login: None,
            allow_anonymous: true,
            wait_selectors: Vec::new(),
            rate_limit: SiteRateLimit::default(),
            user_agent: None,
            known_endpoints: Vec::new(),
            json: JsonExtraction::default(),
            html: HtmlExtraction::default(),
            notes: None,
        }
    }

    /// All listing pages, the availability URL first.
    pub fn listing_urls(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.availability_url.as_str()).chain(self.pages.iter().map(|p| p.as_str()))
    }

    /// Check required fields, URLs and selectors.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidSite {
            site: self.name.clone(),
            reason,
        };

        if self.name.trim().is_empty() {
            return Err(ConfigError::InvalidSite {
                site: "<unnamed>".to_string(),
                reason: "site name is empty".to_string(),
            });
        }

        for url in self
            .listing_urls()
            .chain(self.known_endpoints.iter().map(|u| u.as_str()))
        {
            Url::parse(url).map_err(|e| invalid(format!("invalid URL {:?}: {}", url, e)))?;
        }

        if let Some(login) = &self.login {
            login.validate().map_err(invalid)?;
        }

        if self.rate_limit.max_concurrent_renders == 0 {
            return Err(invalid(
                "rate_limit.max_concurrent_renders must be at least 1".to_string(),
            ));
        }

        for selector in self.wait_selectors.iter().chain(self.html.selectors()) {
            scraper::Selector::parse(selector)
                .map_err(|e| invalid(format!("invalid selector {:?}: {}", selector, e)))?;
        }

        Ok(())
    }
}

/// Validate a whole site list: each entry plus name uniqueness.
pub fn validate_sites(sites: &[SiteConfig]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for site in sites {
        site.validate()?;
        if !seen.insert(site.name.as_str()) {
            return Err(ConfigError::DuplicateSite(site.name.clone()));
        }
    }
    Ok(())
}

/// Extraction strategy for a site.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Try inline JSON and discovered endpoints first, render what is missing.
    #[default]
    EndpointFirst,
    /// Always render; for sites with nothing useful in the raw markup.
    RenderOnly,
}

/// Login strategy for a site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoginConfig {
    EmailPassword(EmailPasswordLogin),
    Token(TokenLogin),
}

impl LoginConfig {
    /// Names of the environment variables this login reads.
    pub fn env_vars(&self) -> Vec<&str> {
        match self {
            Self::EmailPassword(c) => vec![c.email_env.as_str(), c.password_env.as_str()],
            Self::Token(c) => vec![c.token_env.as_str()],
        }
    }

    fn validate(&self) -> Result<(), String> {
        if self.env_vars().iter().any(|v| v.trim().is_empty()) {
            return Err("login env var names must not be empty".to_string());
        }
        match self {
            Self::EmailPassword(c) => {
                Url::parse(&c.login_url)
                    .map_err(|e| format!("invalid login_url {:?}: {}", c.login_url, e))?;
                if c.email_field.is_empty() || c.password_field.is_empty() {
                    return Err("login form field names must not be empty".to_string());
                }
            }
            Self::Token(c) => {
                reqwest::header::HeaderName::from_bytes(c.header_name.as_bytes())
                    .map_err(|e| format!("invalid header_name {:?}: {}", c.header_name, e))?;
            }
        }
        Ok(())
    }
}

/// Form-based email/password login.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailPasswordLogin {
    pub login_url: String,
    pub email_env: String,
    pub password_env: String,
    #[serde(default = "default_email_field")]
    pub email_field: String,
    #[serde(default = "default_password_field")]
    pub password_field: String,
    /// Static form fields sent alongside the credentials.
    #[serde(default)]
    pub extra_payload: BTreeMap<String, String>,
}

fn default_email_field() -> String {
    "email".to_string()
}

fn default_password_field() -> String {
    "password".to_string()
}

/// Token attached as a request header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenLogin {
    pub token_env: String,
    #[serde(default = "default_header_name")]
    pub header_name: String,
    /// Prepended to the token; empty for none.
    #[serde(default = "default_header_prefix")]
    pub header_prefix: String,
}

fn default_header_name() -> String {
    "Authorization".to_string()
}

fn default_header_prefix() -> String {
    "Bearer ".to_string()
}

/// Per-site render limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteRateLimit {
    #[serde(default = "default_max_concurrent_renders")]
    pub max_concurrent_renders: usize,
    /// Minimum time between render starts, in milliseconds.
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    /// How long a render may wait for its permit, in seconds.
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

fn default_max_concurrent_renders() -> usize {
    1
}

fn default_min_interval_ms() -> u64 {
    2000
}

fn default_acquire_timeout_secs() -> u64 {
    120
}

impl Default for SiteRateLimit {
    fn default() -> Self {
        Self {
            max_concurrent_renders: default_max_concurrent_renders(),
            min_interval_ms: default_min_interval_ms(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
        }
    }
}

impl SiteRateLimit {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

/// Where to find raffle fields in structured JSON.
///
/// Each field lists candidate dot-notation paths, tried in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JsonExtraction {
    /// Path to the item array. Empty means auto-detect.
    pub items_path: String,
    pub id: Vec<String>,
    pub title: Vec<String>,
    pub description: Vec<String>,
    pub url: Vec<String>,
    pub entries: Vec<String>,
    pub max_entries: Vec<String>,
    pub remaining: Vec<String>,
    pub deadline: Vec<String>,
}

fn paths(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for JsonExtraction {
    fn default() -> Self {
        Self {
            items_path: String::new(),
            id: paths(&["id", "raffle_id", "handle", "slug"]),
            title: paths(&["title", "name"]),
            description: paths(&["description", "prize", "body_html"]),
            url: paths(&["url", "link"]),
            entries: paths(&["entries", "tickets_sold", "entry_count"]),
            max_entries: paths(&["max_entries", "total_tickets", "tickets_total"]),
            remaining: paths(&["tickets_remaining", "remaining", "tickets"]),
            deadline: paths(&["deadline", "raffle_deadline", "ends_at", "end_date"]),
        }
    }
}

/// CSS selectors for raffle cards in rendered markup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HtmlExtraction {
    pub card_selector: String,
    /// Attribute on the card holding the site-local id.
    pub id_attr: String,
    pub title_selector: String,
    pub description_selector: String,
    pub entries_selector: String,
    pub max_entries_selector: String,
    pub remaining_selector: String,
    pub deadline_selector: String,
    pub link_selector: String,
    /// Attribute carrying an inline JSON blob for the raffle.
    pub embedded_json_attr: String,
}

impl Default for HtmlExtraction {
    fn default() -> Self {
        Self {
            card_selector: "[data-raffle-id], .raffle-card".to_string(),
            id_attr: "data-raffle-id".to_string(),
            title_selector: "h2, h3, .title".to_string(),
            description_selector: ".prize, .description".to_string(),
            entries_selector: ".entries, [data-entries]".to_string(),
            max_entries_selector: ".max-entries, [data-max-entries]".to_string(),
            remaining_selector: ".tickets-remaining, [data-remaining]".to_string(),
            deadline_selector: "time, .deadline".to_string(),
            link_selector: "a[href]".to_string(),
            embedded_json_attr: "data-raffle-json".to_string(),
        }
    }
}

impl HtmlExtraction {
    fn selectors(&self) -> impl Iterator<Item = &String> {
        [
            &self.card_selector,
            &self.title_selector,
            &self.description_selector,
            &self.entries_selector,
            &self.max_entries_selector,
            &self.remaining_selector,
            &self.deadline_selector,
            &self.link_selector,
        ]
        .into_iter()
    }
}
