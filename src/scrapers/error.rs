//! Error taxonomy for the extraction engine.
//!
//! Item- and page-level failures are absorbed by the scrapers and logged;
//! only site-level failures propagate out of `SiteScraper::extract`.

use std::time::Duration;

use thiserror::Error;

/// Failures from the rendering path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("timed out waiting for selector `{selector}`")]
    SelectorTimeout { selector: String },
    #[error("navigation failed: {0}")]
    NavigationFailed(String),
}

/// Errors raised by the extraction engine.
#[derive(Debug, Clone, Error)]
pub enum ScrapeError {
    /// No structured endpoint found; the caller should render.
    #[error("no structured-data endpoint found")]
    DiscoveryNoop,

    /// A single item could not be normalized and was dropped.
    #[error("skipped item on {site}: {reason}")]
    ParseSkip { site: String, reason: String },

    #[error(transparent)]
    Render(#[from] RenderError),

    /// A render permit was not granted in time. Retryable on a later cycle.
    #[error("render permit for {site} not granted within {waited:?}")]
    RateLimitTimeout { site: String, waited: Duration },

    #[error("login to {site} failed: {reason}")]
    LoginFailed { site: String, reason: String },

    /// Site-level abort; other sites are unaffected.
    #[error("extraction from {site} aborted: {reason}")]
    Extraction { site: String, reason: String },

    #[error("{url} unreachable: {reason}")]
    Unreachable { url: String, reason: String },

    /// A non-retryable HTTP status.
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("render cache error: {0}")]
    Cache(String),
}

impl ScrapeError {
    /// Whether this error aborts the whole site batch.
    pub fn is_site_fatal(&self) -> bool {
        matches!(
            self,
            Self::RateLimitTimeout { .. }
                | Self::LoginFailed { .. }
                | Self::Extraction { .. }
                | Self::Unreachable { .. }
                | Self::Status { .. }
        )
    }

    /// Whether the server rejected the request's credentials.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, Self::Status { status: 401 | 403, .. })
    }

    /// Wrap a failure as a site-level abort for `site`. Rate-limit timeouts
    /// stay as they are so the scheduler can retry them next cycle.
    pub fn into_extraction(self, site: &str) -> Self {
        match self {
            Self::Extraction { .. } | Self::RateLimitTimeout { .. } => self,
            other => Self::Extraction {
                site: site.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

impl From<reqwest::Error> for ScrapeError {
    fn from(e: reqwest::Error) -> Self {
        let url = e
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        if let Some(status) = e.status() {
            return ScrapeError::Status {
                url,
                status: status.as_u16(),
            };
        }
        ScrapeError::Unreachable {
            url,
            reason: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_site_fatal_classification() {
        assert!(!ScrapeError::DiscoveryNoop.is_site_fatal());
        assert!(!ScrapeError::Render(RenderError::SelectorTimeout {
            selector: ".entries".to_string()
        })
        .is_site_fatal());
        assert!(ScrapeError::LoginFailed {
            site: "a".to_string(),
            reason: "401".to_string()
        }
        .is_site_fatal());
    }

    #[test]
    fn test_auth_rejection() {
        let status = |status| ScrapeError::Status {
            url: "https://a.example/".to_string(),
            status,
        };
        assert!(status(401).is_auth_rejection());
        assert!(status(403).is_auth_rejection());
        assert!(!status(404).is_auth_rejection());
        assert!(status(404).is_site_fatal());
    }

    #[test]
    fn test_into_extraction_keeps_reason() {
        let err = ScrapeError::Unreachable {
            url: "https://a.example/".to_string(),
            reason: "dns".to_string(),
        }
        .into_extraction("a");
        match err {
            ScrapeError::Extraction { site, reason } => {
                assert_eq!(site, "a");
                assert!(reason.contains("dns"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
