//! Availability probe: one anonymous request per site, classified by status.
//!
//! Independent of the extraction flow. No login, no retries, no rendering.

use std::fmt;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::config::SiteConfig;
use super::http_client::HttpClient;

/// Probe classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStatus {
    Accessible,
    LoginRequired,
    ClientError,
    ServerError,
    Unreachable,
}

impl ProbeStatus {
    /// Classify an HTTP status code.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::LoginRequired,
            s if s >= 500 => Self::ServerError,
            s if s >= 400 => Self::ClientError,
            _ => Self::Accessible,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accessible => "accessible",
            Self::LoginRequired => "login_required",
            Self::ClientError => "client_error",
            Self::ServerError => "server_error",
            Self::Unreachable => "unreachable",
        }
    }
}

impl fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of probing one site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub site: String,
    pub url: String,
    pub status: ProbeStatus,
    /// HTTP status, absent when unreachable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    /// Transport error, when unreachable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// GET `url` once and classify the response.
pub async fn probe_url(
    site: &str,
    url: &str,
    user_agent: Option<&str>,
    timeout: Duration,
) -> ProbeResult {
    let unreachable = |detail: String| ProbeResult {
        site: site.to_string(),
        url: url.to_string(),
        status: ProbeStatus::Unreachable,
        http_status: None,
        detail: Some(detail),
    };

    let client = match HttpClient::with_user_agent(site, timeout, user_agent) {
        Ok(client) => client,
        Err(e) => return unreachable(e.to_string()),
    };

    match client.get(url).await {
        Ok(response) => {
            let code = response.status.as_u16();
            let status = ProbeStatus::from_status(code);
            debug!(site, url, code, "Probe classified as {}", status);
            ProbeResult {
                site: site.to_string(),
                url: url.to_string(),
                status,
                http_status: Some(code),
                detail: None,
            }
        }
        Err(e) => {
            warn!(site, "Failed to reach {}: {}", url, e);
            unreachable(e.to_string())
        }
    }
}

/// Probe a configured site's availability URL.
pub async fn probe_site(site: &SiteConfig, timeout: Duration) -> ProbeResult {
    probe_url(
        &site.name,
        &site.availability_url,
        site.user_agent.as_deref(),
        timeout,
    )
    .await
}

/// Probe every site concurrently, results in configuration order.
pub async fn probe_all(sites: &[SiteConfig], timeout: Duration) -> Vec<ProbeResult> {
    join_all(sites.iter().map(|site| probe_site(site, timeout))).await
}
