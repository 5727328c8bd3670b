//! Cookie replay for rendered pages.

use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::Page;
use tracing::{debug, warn};

/// Install session cookies on `page`, scoped to `url`.
///
/// Failures are logged and skipped; a missing cookie degrades the render to
/// what an anonymous visitor sees.
pub(crate) async fn install_cookies(page: &Page, url: &str, cookies: &[(String, String)]) {
    if cookies.is_empty() {
        return;
    }
    debug!("Installing {} session cookies for {}", cookies.len(), url);

    for (name, value) in cookies {
        let cookie_param = CookieParam::builder()
            .name(name.as_str())
            .value(value.as_str())
            .url(url)
            .build();

        match cookie_param {
            Ok(param) => {
                if let Err(e) = page.set_cookie(param).await {
                    warn!("Failed to set cookie {}: {}", name, e);
                }
            }
            Err(e) => {
                warn!("Failed to build cookie {}: {}", name, e);
            }
        }
    }
}
