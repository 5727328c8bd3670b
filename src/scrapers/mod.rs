//! Raffle extraction engine.
//!
//! Leaf-first: `discovery` and `parse` are pure, `http_client` and
//! `session` talk to sites, `rate_limiter`, `cache` and `browser` guard the
//! renderer, `render` composes them, `site` runs the per-site strategy and
//! `runner` drives all sites into a `RaffleQueue`.

pub mod browser;
pub mod cache;
pub mod config;
pub mod discovery;
mod error;
pub mod http_client;
pub mod parse;
pub mod probe;
pub mod queue;
pub mod rate_limiter;
pub mod render;
pub mod runner;
pub mod session;
pub mod site;

pub use browser::{BrowserEngineConfig, ChromeRenderer, RenderSession, Renderer};
pub use cache::{CacheKey, DiskRenderCache, MemoryRenderCache, RenderCache};
pub use config::{LoginConfig, SiteConfig, StrategyKind};
pub use error::{RenderError, ScrapeError};
pub use http_client::HttpClient;
pub use probe::{probe_all, probe_site, probe_url, ProbeResult, ProbeStatus};
pub use queue::RaffleQueue;
pub use rate_limiter::{RenderGate, RenderPermit};
pub use render::RenderService;
pub use runner::{run_ingestion, RunContext, RunReport, SiteOutcome, SiteStatus};
pub use session::{LoginState, ProcessEnv, SecretSource, SessionManager, SiteSession};
pub use site::{ExtractContext, SiteScraper};
