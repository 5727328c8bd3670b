//! HTTP client scoped to one site, with a cookie jar and session headers.

mod response;
mod user_agent;

pub use response::HttpResponse;
pub use user_agent::{resolve_user_agent, IMPERSONATE_USER_AGENTS, USER_AGENT};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use super::rate_limiter::{backoff_delay, parse_retry_after};
use super::ScrapeError;

/// Base delay for listing-fetch retries.
const RETRY_BASE_MS: u64 = 500;

/// HTTP client for one site.
///
/// Clones share the connection pool and the cookie jar, so cookies set by a
/// login response are sent on every later request of the same session.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    jar: Arc<Jar>,
    site: String,
    headers: HeaderMap,
}

impl HttpClient {
    /// Create a client with the default user agent.
    pub fn new(site: &str, timeout: Duration) -> Result<Self, ScrapeError> {
        Self::with_user_agent(site, timeout, None)
    }

    /// Create a client with a custom user agent configuration.
    /// - None: default rafflescope user agent
    /// - Some("impersonate"): random real browser user agent
    /// - Some(custom): custom user agent string
    pub fn with_user_agent(
        site: &str,
        timeout: Duration,
        user_agent_config: Option<&str>,
    ) -> Result<Self, ScrapeError> {
        let jar = Arc::new(Jar::default());
        let client = Client::builder()
            .user_agent(resolve_user_agent(user_agent_config))
            .timeout(timeout)
            .cookie_provider(Arc::clone(&jar))
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|e| ScrapeError::Extraction {
                site: site.to_string(),
                reason: format!("failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            jar,
            site: site.to_string(),
            headers: HeaderMap::new(),
        })
    }

    /// Attach a header to every request made through this client.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, ScrapeError> {
        let invalid = |reason: String| ScrapeError::LoginFailed {
            site: self.site.clone(),
            reason,
        };
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| invalid(format!("invalid header name: {}", e)))?;
        let mut value = HeaderValue::from_str(value)
            .map_err(|_| invalid(format!("invalid value for header {}", name)))?;
        value.set_sensitive(true);
        self.headers.insert(name, value);
        Ok(self)
    }

    pub fn site(&self) -> &str {
        &self.site
    }

    /// Whether session headers are attached to requests.
    pub fn has_session_headers(&self) -> bool {
        !self.headers.is_empty()
    }

    /// Session headers as plain pairs, for handing to the renderer.
    pub fn session_headers(&self) -> HashMap<String, String> {
        self.headers
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect()
    }

    /// Cookies the jar would send to `url`, as name/value pairs.
    pub fn cookies_for(&self, url: &str) -> Vec<(String, String)> {
        let Ok(url) = Url::parse(url) else {
            return Vec::new();
        };
        let Some(header) = self.jar.cookies(&url) else {
            return Vec::new();
        };
        header
            .to_str()
            .unwrap_or_default()
            .split(';')
            .filter_map(|pair| {
                let (name, value) = pair.trim().split_once('=')?;
                Some((name.to_string(), value.to_string()))
            })
            .collect()
    }

    /// GET `url`. Any status is returned; only transport failures error.
    pub async fn get(&self, url: &str) -> Result<HttpResponse, reqwest::Error> {
        debug!(site = %self.site, url, "GET");
        let response = self
            .client
            .get(url)
            .headers(self.headers.clone())
            .send()
            .await?;
        Ok(HttpResponse::new(response))
    }

    /// POST a form to `url`.
    pub async fn post_form(
        &self,
        url: &str,
        form: &HashMap<String, String>,
    ) -> Result<HttpResponse, reqwest::Error> {
        debug!(site = %self.site, url, "POST form");
        let response = self
            .client
            .post(url)
            .headers(self.headers.clone())
            .form(form)
            .send()
            .await?;
        Ok(HttpResponse::new(response))
    }

    /// GET `url` and return the body, failing on non-success statuses.
    pub async fn get_text(&self, url: &str) -> Result<String, ScrapeError> {
        let response = self.get(url).await?.error_for_status()?;
        Ok(response.text().await?)
    }

    /// GET `url` and decode it as JSON, failing on non-success statuses.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ScrapeError> {
        let response = self.get(url).await?.error_for_status()?;
        Ok(response.json().await?)
    }

    /// `get_text` with exponential backoff on transport failures, 429 and 5xx.
    ///
    /// Other 4xx statuses fail immediately.
    pub async fn get_text_with_retry(&self, url: &str, retries: u32) -> Result<String, ScrapeError> {
        let mut attempt = 0;
        loop {
            let (error, delay) = match self.get(url).await {
                Ok(response) if response.is_success() => return Ok(response.text().await?),
                Ok(response) if response.is_retryable() => {
                    let delay = parse_retry_after(response.header("retry-after"))
                        .unwrap_or_else(|| backoff_delay(attempt, RETRY_BASE_MS));
                    (
                        ScrapeError::Unreachable {
                            url: url.to_string(),
                            reason: format!("HTTP {}", response.status),
                        },
                        delay,
                    )
                }
                Ok(response) => {
                    return Err(ScrapeError::Status {
                        url: url.to_string(),
                        status: response.status.as_u16(),
                    })
                }
                Err(e) => (e.into(), backoff_delay(attempt, RETRY_BASE_MS)),
            };

            if attempt >= retries {
                return Err(error);
            }
            warn!(
                site = %self.site,
                url,
                attempt = attempt + 1,
                "Fetch failed ({}), retrying in {:?}",
                error,
                delay
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_headers_are_exposed() {
        let client = HttpClient::new("a", Duration::from_secs(5))
            .unwrap()
            .with_header("X-Api-Key", "secret")
            .unwrap();
        assert!(client.has_session_headers());
        assert_eq!(
            client.session_headers().get("x-api-key").map(String::as_str),
            Some("secret")
        );
    }

    #[test]
    fn test_invalid_header_is_login_failure() {
        let result = HttpClient::new("a", Duration::from_secs(5))
            .unwrap()
            .with_header("X-Token", "bad\nvalue");
        assert!(matches!(result, Err(ScrapeError::LoginFailed { .. })));
    }

    #[test]
    fn test_cookies_for_reads_jar() {
        let client = HttpClient::new("a", Duration::from_secs(5)).unwrap();
        let url = Url::parse("https://a.example/").unwrap();
        client
            .jar
            .add_cookie_str("session=abc123; Path=/", &url);
        assert_eq!(
            client.cookies_for("https://a.example/raffles"),
            vec![("session".to_string(), "abc123".to_string())]
        );
        assert!(client.cookies_for("https://b.example/").is_empty());
    }
}
