//! One ingestion run across every configured site.
//!
//! Each site runs in its own task with its own [`SessionManager`]; at most
//! `max_site_workers` sites are extracted at once. The render gate and cache
//! are shared by all sites of the run. A run-level timeout cancels whatever
//! is still in flight; records already pushed stay in the queue.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use super::browser::{ChromeRenderer, Renderer};
use super::cache::{DiskRenderCache, RenderCache};
use super::config::SiteConfig;
use super::queue::RaffleQueue;
use super::rate_limiter::RenderGate;
use super::render::RenderService;
use super::session::{LoginState, ProcessEnv, SecretSource, SessionManager};
use super::site::{ExtractContext, SiteScraper};
use super::ScrapeError;
use crate::config::Settings;

/// Per-run state handed to every component. Nothing here outlives the run
/// unless the caller keeps it.
#[derive(Clone)]
pub struct RunContext {
    settings: Arc<Settings>,
    render: RenderService,
    secrets: Arc<dyn SecretSource>,
    queue: RaffleQueue,
    now: DateTime<Utc>,
}

impl RunContext {
    pub fn new(
        settings: Settings,
        cache: Arc<dyn RenderCache>,
        renderer: Arc<dyn Renderer>,
        secrets: Arc<dyn SecretSource>,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            render: RenderService::new(RenderGate::new(), cache, renderer),
            secrets,
            queue: RaffleQueue::new(),
            now: Utc::now(),
        }
    }

    /// Disk cache under `cache_dir`, Chromium renderer, secrets from the
    /// process environment.
    pub fn from_settings(settings: Settings) -> Self {
        let cache = Arc::new(DiskRenderCache::new(&settings.cache_dir, settings.cache_ttl()));
        let renderer = Arc::new(ChromeRenderer::new(settings.browser.clone()));
        Self::new(settings, cache, renderer, Arc::new(ProcessEnv))
    }

    /// Fix the run's clock.
    pub fn with_clock(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn queue(&self) -> &RaffleQueue {
        &self.queue
    }

    pub fn render(&self) -> &RenderService {
        &self.render
    }
}

/// How a site's extraction ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SiteStatus {
    Completed,
    Failed {
        error: String,
        /// Worth retrying on the next cycle.
        retryable: bool,
    },
    /// Cancelled by the run timeout.
    TimedOut,
}

/// Result of one site within a run.
#[derive(Debug, Clone, Serialize)]
pub struct SiteOutcome {
    pub site: String,
    /// Records pushed to the queue, including those pushed before a failure.
    pub records: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login: Option<LoginState>,
    #[serde(flatten)]
    pub status: SiteStatus,
}

impl SiteOutcome {
    pub fn is_success(&self) -> bool {
        self.status == SiteStatus::Completed
    }
}

/// Summary of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub timed_out: bool,
    pub sites: Vec<SiteOutcome>,
}

impl RunReport {
    pub fn total_records(&self) -> usize {
        self.sites.iter().map(|s| s.records).sum()
    }

    pub fn failed(&self) -> impl Iterator<Item = &SiteOutcome> {
        self.sites.iter().filter(|s| !s.is_success())
    }
}

/// Extract every configured site into the context's queue.
///
/// Never fails: site failures and the run timeout are reported per site.
pub async fn run_ingestion(ctx: &RunContext) -> RunReport {
    let started = tokio::time::Instant::now();
    let settings = Arc::clone(&ctx.settings);
    let workers = Arc::new(Semaphore::new(settings.max_site_workers.max(1)));
    let mut progress: Vec<(String, Arc<AtomicUsize>)> = Vec::new();
    let mut tasks = JoinSet::new();

    info!(
        "Starting ingestion of {} sites ({} workers, timeout {:?})",
        settings.sites.len(),
        settings.max_site_workers,
        settings.run_timeout()
    );

    for site in &settings.sites {
        let pushed = Arc::new(AtomicUsize::new(0));
        progress.push((site.name.clone(), Arc::clone(&pushed)));
        tasks.spawn(run_site(
            Arc::new(site.clone()),
            ctx.clone(),
            Arc::clone(&workers),
            pushed,
        ));
    }

    let mut outcomes: HashMap<String, SiteOutcome> = HashMap::new();
    let mut timed_out = false;
    let deadline = tokio::time::sleep(settings.run_timeout());
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            joined = tasks.join_next() => match joined {
                Some(Ok(outcome)) => {
                    outcomes.insert(outcome.site.clone(), outcome);
                }
                Some(Err(e)) => error!("Site worker stopped unexpectedly: {}", e),
                None => break,
            },
            _ = &mut deadline => {
                warn!("Run timed out after {:?}; cancelling in-flight sites", settings.run_timeout());
                timed_out = true;
                tasks.abort_all();
                break;
            }
        }
    }
    // Wait for cancelled tasks so their renders and logins are torn down.
    while tasks.join_next().await.is_some() {}

    let sites: Vec<SiteOutcome> = progress
        .into_iter()
        .map(|(site, pushed)| {
            outcomes.remove(&site).unwrap_or_else(|| SiteOutcome {
                site,
                records: pushed.load(Ordering::SeqCst),
                login: None,
                status: if timed_out {
                    SiteStatus::TimedOut
                } else {
                    SiteStatus::Failed {
                        error: "worker stopped unexpectedly".to_string(),
                        retryable: true,
                    }
                },
            })
        })
        .collect();

    let report = RunReport {
        started_at: ctx.now,
        elapsed_ms: started.elapsed().as_millis() as u64,
        timed_out,
        sites,
    };

    if report.total_records() == 0 {
        warn!(
            "Run produced no records across {} sites; check site configs and credentials",
            report.sites.len()
        );
    } else {
        info!(
            "Run finished: {} records, {} of {} sites failed",
            report.total_records(),
            report.failed().count(),
            report.sites.len()
        );
    }
    report
}

async fn run_site(
    site: Arc<SiteConfig>,
    ctx: RunContext,
    workers: Arc<Semaphore>,
    pushed: Arc<AtomicUsize>,
) -> SiteOutcome {
    let name = site.name.clone();
    let _slot = match workers.acquire_owned().await {
        Ok(slot) => slot,
        Err(_) => {
            return SiteOutcome {
                site: name,
                records: 0,
                login: None,
                status: SiteStatus::Failed {
                    error: "worker pool closed".to_string(),
                    retryable: true,
                },
            }
        }
    };

    let mut sessions = SessionManager::new(
        Arc::clone(&site),
        Arc::clone(&ctx.secrets),
        ctx.settings.request_timeout(),
    );
    let scraper = SiteScraper::new(site);
    let mut extract = ExtractContext {
        sessions: &mut sessions,
        render: &ctx.render,
        fetch_retries: ctx.settings.fetch_retries,
        now: ctx.now,
        pushed: Arc::clone(&pushed),
    };

    let result = scraper.extract_into(&mut extract, &ctx.queue).await;
    let login = Some(sessions.state());
    let records = pushed.load(Ordering::SeqCst);

    let status = match result {
        Ok(_) => SiteStatus::Completed,
        Err(e) => {
            error!(site = %name, "{}", e);
            SiteStatus::Failed {
                retryable: matches!(e, ScrapeError::RateLimitTimeout { .. }),
                error: e.to_string(),
            }
        }
    };

    SiteOutcome {
        site: name,
        records,
        login,
        status,
    }
}
