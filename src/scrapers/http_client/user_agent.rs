//! User agent selection.
//!
//! Some storefronts hide their raffle widgets from non-browser agents, so a
//! site may ask to be fetched with a real browser's agent instead of ours.

use chrono::Utc;

pub const USER_AGENT: &str = concat!("rafflescope/", env!("CARGO_PKG_VERSION"));

/// Config value selecting a browser agent.
const IMPERSONATE: &str = "impersonate";

/// Browser agents used when a site asks to impersonate one.
pub const IMPERSONATE_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.1 Safari/605.1.15",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 18_1 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.1 Mobile/15E148 Safari/604.1",
];

/// Agent string for a site's `user_agent` setting.
///
/// `None` gives ours, `"impersonate"` picks one of
/// [`IMPERSONATE_USER_AGENTS`], anything else is used verbatim.
pub fn resolve_user_agent(config: Option<&str>) -> String {
    match config.map(str::trim) {
        None | Some("") => USER_AGENT.to_string(),
        Some(IMPERSONATE) => {
            let pick = Utc::now().timestamp_subsec_nanos() as usize % IMPERSONATE_USER_AGENTS.len();
            IMPERSONATE_USER_AGENTS[pick].to_string()
        }
        Some(custom) => custom.to_string(),
    }
}
