//! Response handle returned by [`super::HttpClient`].

use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;

/// A response whose status has been read but whose body has not.
pub struct HttpResponse {
    pub status: StatusCode,
    response: Response,
}

impl HttpResponse {
    pub(crate) fn new(response: Response) -> Self {
        Self {
            status: response.status(),
            response,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Rate limited or server-side failure; worth another attempt later.
    pub fn is_retryable(&self) -> bool {
        self.status == StatusCode::TOO_MANY_REQUESTS || self.status.is_server_error()
    }

    /// Header value, when present and valid ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.response.headers().get(name)?.to_str().ok()
    }

    /// Turn a non-success status into an error carrying it.
    pub fn error_for_status(self) -> Result<Self, reqwest::Error> {
        Ok(Self {
            status: self.status,
            response: self.response.error_for_status()?,
        })
    }

    pub async fn text(self) -> Result<String, reqwest::Error> {
        self.response.text().await
    }

    pub async fn json<T: DeserializeOwned>(self) -> Result<T, reqwest::Error> {
        self.response.json().await
    }
}
