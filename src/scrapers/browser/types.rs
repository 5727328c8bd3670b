//! Session state handed to the renderer.

use std::collections::HashMap;

/// Headers and cookies from a site session, replayed in the browser so
/// rendered pages see the same login as plain requests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderSession {
    pub headers: HashMap<String, String>,
    pub cookies: Vec<(String, String)>,
    pub user_agent: Option<String>,
}

impl RenderSession {
    /// A session with nothing to replay.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Header and cookie names, sorted. Values are left out so that a
    /// refreshed token or tracking cookie still hits the same cache entry.
    pub fn fingerprint(&self) -> String {
        if self.headers.is_empty() && self.cookies.is_empty() {
            return ANONYMOUS_FINGERPRINT.to_string();
        }
        let mut names: Vec<String> = self
            .headers
            .keys()
            .map(|name| format!("header:{}", name.to_ascii_lowercase()))
            .chain(self.cookies.iter().map(|(name, _)| format!("cookie:{}", name)))
            .collect();
        names.sort();
        names.dedup();
        names.join(",")
    }
}

/// Fingerprint of a session with nothing to replay.
pub const ANONYMOUS_FINGERPRINT: &str = "anonymous";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_ignores_values_and_order() {
        let a = RenderSession {
            headers: HashMap::from([("Authorization".to_string(), "Bearer one".to_string())]),
            cookies: vec![
                ("session".to_string(), "abc".to_string()),
                ("_tracker".to_string(), "1".to_string()),
            ],
            user_agent: None,
        };
        let b = RenderSession {
            headers: HashMap::from([("authorization".to_string(), "Bearer two".to_string())]),
            cookies: vec![
                ("_tracker".to_string(), "2".to_string()),
                ("session".to_string(), "xyz".to_string()),
            ],
            user_agent: Some("DrawBot/2.1".to_string()),
        };
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(RenderSession::anonymous().fingerprint(), ANONYMOUS_FINGERPRINT);
        assert_ne!(a.fingerprint(), ANONYMOUS_FINGERPRINT);
    }
}
