//! Per-site extraction strategies.
//!
//! Two strategies share one capability set: fetching a listing page's
//! structured data and parsing rendered markup. `EndpointFirst` tries
//! structured data before rendering and renders only for the items it could
//! not complete; `RenderOnly` always renders.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::config::{SiteConfig, StrategyKind};
use super::discovery;
use super::parse;
use super::queue::RaffleQueue;
use super::render::RenderService;
use super::session::{SessionManager, SiteSession};
use super::ScrapeError;
use crate::models::{RaffleDraft, RaffleRecord, RecordOrigin};

/// Everything one site's extraction needs for a run.
pub struct ExtractContext<'a> {
    pub sessions: &'a mut SessionManager,
    pub render: &'a RenderService,
    /// Retries for listing fetches on transport errors, 429 and 5xx.
    pub fetch_retries: u32,
    /// The run's clock, used for countdown deadlines and `retrieved_at`.
    pub now: DateTime<Utc>,
    /// Records pushed so far; readable after the extraction is cancelled.
    pub pushed: Arc<AtomicUsize>,
}

/// Structured drafts for one listing page.
#[derive(Debug, Default)]
pub struct StructuredPage {
    pub drafts: Vec<RaffleDraft>,
    /// Endpoint that supplied items, if any did.
    pub endpoint: Option<String>,
}

/// Extraction strategy for one configured site.
#[derive(Debug, Clone)]
pub enum SiteScraper {
    EndpointFirst(Arc<SiteConfig>),
    RenderOnly(Arc<SiteConfig>),
}

impl SiteScraper {
    pub fn new(site: Arc<SiteConfig>) -> Self {
        match site.strategy {
            StrategyKind::EndpointFirst => Self::EndpointFirst(site),
            StrategyKind::RenderOnly => Self::RenderOnly(site),
        }
    }

    pub fn config(&self) -> &SiteConfig {
        match self {
            Self::EndpointFirst(site) | Self::RenderOnly(site) => site,
        }
    }

    pub fn name(&self) -> &str {
        &self.config().name
    }

    pub fn strategy(&self) -> StrategyKind {
        match self {
            Self::EndpointFirst(_) => StrategyKind::EndpointFirst,
            Self::RenderOnly(_) => StrategyKind::RenderOnly,
        }
    }

    /// Extract every listing page and return the records.
    pub async fn extract(&self, ctx: &mut ExtractContext<'_>) -> Result<Vec<RaffleRecord>, ScrapeError> {
        let queue = RaffleQueue::new();
        self.extract_into(ctx, &queue).await?;
        Ok(queue.drain())
    }

    /// Extract every listing page, pushing each page's records as soon as
    /// they are ready so an aborted run keeps what it already found.
    ///
    /// Returns the number of records pushed. Page-level failures are logged
    /// and skipped; site-level failures abort with `ScrapeError::Extraction`.
    pub async fn extract_into(
        &self,
        ctx: &mut ExtractContext<'_>,
        queue: &RaffleQueue,
    ) -> Result<usize, ScrapeError> {
        let site = self.config();
        let mut session = ctx
            .sessions
            .ensure_session()
            .await
            .map_err(|e| e.into_extraction(&site.name))?;
        info!(site = %site.name, login = %session.state(), "Extracting raffles");

        let mut pushed = 0;
        for url in site.listing_urls() {
            let mut result = self.extract_page(ctx, &session, url).await;

            if let Err(e) = &result {
                if e.is_auth_rejection() && session.is_authenticated() {
                    warn!(site = %site.name, url, "Session rejected, logging in again");
                    ctx.sessions.invalidate();
                    session = ctx
                        .sessions
                        .ensure_session()
                        .await
                        .map_err(|e| e.into_extraction(&site.name))?;
                    result = self.extract_page(ctx, &session, url).await;
                }
            }

            let records = result.map_err(|e| e.into_extraction(&site.name))?;
            pushed += records.len();
            ctx.pushed.fetch_add(records.len(), Ordering::SeqCst);
            queue.extend(records);
        }

        info!(site = %site.name, "Extracted {} raffles", pushed);
        Ok(pushed)
    }

    /// Records for one listing page.
    ///
    /// Only site-level failures are returned; anything narrower is logged
    /// and yields fewer records.
    async fn extract_page(
        &self,
        ctx: &ExtractContext<'_>,
        session: &SiteSession,
        url: &str,
    ) -> Result<Vec<RaffleRecord>, ScrapeError> {
        let drafts = match self {
            Self::RenderOnly(_) => self
                .render_drafts(ctx, session, url)
                .await?
                .into_iter()
                .map(|d| (d, RecordOrigin::Rendered))
                .collect(),
            Self::EndpointFirst(_) => {
                let structured = self.fetch(ctx, session, url).await?;
                self.complete_with_render(ctx, session, url, structured).await?
            }
        };
        Ok(self.finalize(drafts, ctx.now))
    }

    /// Fetch the raw page and collect structured drafts from its embedded
    /// payloads and discovered endpoints. Never renders.
    pub async fn fetch(
        &self,
        ctx: &ExtractContext<'_>,
        session: &SiteSession,
        url: &str,
    ) -> Result<StructuredPage, ScrapeError> {
        let site = self.config();
        if matches!(self, Self::RenderOnly(_)) {
            return Ok(StructuredPage::default());
        }

        let html = session
            .client()
            .get_text_with_retry(url, ctx.fetch_retries)
            .await?;

        let mut drafts = Vec::new();
        for payload in discovery::embedded_payloads(&html, &site.html.embedded_json_attr) {
            drafts.extend(parse::drafts_from_payload(&payload, &site.json, url, ctx.now));
        }

        let mut candidates = discovery::discover_endpoints(&html, url);
        for known in &site.known_endpoints {
            let resolved = parse::resolve_url(url, known);
            if !candidates.contains(&resolved) {
                candidates.push(resolved);
            }
        }
        if candidates.is_empty() {
            debug!(site = %site.name, url, "{}", ScrapeError::DiscoveryNoop);
        }

        let mut endpoint = None;
        for candidate in candidates {
            let payload: Value = match session.client().get_json(&candidate).await {
                Ok(payload) => payload,
                Err(e) => {
                    debug!(site = %site.name, endpoint = %candidate, "Endpoint unusable: {}", e);
                    continue;
                }
            };
            let found = parse::drafts_from_payload(&payload, &site.json, url, ctx.now);
            if !found.is_empty() {
                debug!(site = %site.name, endpoint = %candidate, "{} structured items", found.len());
                drafts.extend(found);
                endpoint = Some(candidate);
                break;
            }
        }

        Ok(StructuredPage {
            drafts: merge_structured(drafts),
            endpoint,
        })
    }

    /// Parse rendered markup into drafts.
    pub fn parse(&self, html: &str, url: &str, now: DateTime<Utc>) -> Vec<RaffleDraft> {
        parse::drafts_from_html(html, &self.config().html, url, now)
    }

    async fn complete_with_render(
        &self,
        ctx: &ExtractContext<'_>,
        session: &SiteSession,
        url: &str,
        structured: StructuredPage,
    ) -> Result<Vec<(RaffleDraft, RecordOrigin)>, ScrapeError> {
        let site = self.config();

        if structured.drafts.is_empty() {
            debug!(site = %site.name, url, "No structured items, rendering page");
            let rendered = self.render_drafts(ctx, session, url).await?;
            return Ok(rendered
                .into_iter()
                .map(|d| (d, RecordOrigin::Rendered))
                .collect());
        }

        let incomplete = structured.drafts.iter().filter(|d| !d.is_complete()).count();
        if incomplete == 0 {
            debug!(site = %site.name, url, "Structured data complete, skipping render");
            return Ok(structured
                .drafts
                .into_iter()
                .map(|d| (d, RecordOrigin::Structured))
                .collect());
        }

        debug!(
            site = %site.name,
            url,
            "{} of {} structured items incomplete, rendering",
            incomplete,
            structured.drafts.len()
        );
        let rendered = self.render_drafts(ctx, session, url).await?;
        Ok(merge_rendered(structured.drafts, rendered))
    }

    /// Render `url` and parse its cards.
    ///
    /// Render failures (selector timeout, navigation) yield no drafts. When
    /// the markup has cards but none carries an id and title, the entry is
    /// treated as stale and rendered again once, bypassing the cache.
    async fn render_drafts(
        &self,
        ctx: &ExtractContext<'_>,
        session: &SiteSession,
        url: &str,
    ) -> Result<Vec<RaffleDraft>, ScrapeError> {
        let site = self.config();
        let render_session = session.render_session(url);

        let mut force = false;
        loop {
            let html = match ctx.render.render(site, url, &render_session, force).await {
                Ok(html) => html,
                Err(e) if e.is_site_fatal() => return Err(e),
                Err(e) => {
                    warn!(site = %site.name, url, "No data from rendered page: {}", e);
                    return Ok(Vec::new());
                }
            };

            let drafts = self.parse(&html, url, ctx.now);
            let unusable = !drafts.is_empty()
                && drafts
                    .iter()
                    .all(|d| d.raffle_id.is_none() || d.title.is_none());
            if unusable && !force {
                debug!(site = %site.name, url, "Rendered markup unparsable, re-rendering");
                force = true;
                continue;
            }
            return Ok(drafts);
        }
    }

    /// Validate drafts into records, dropping the ones that fail.
    fn finalize(
        &self,
        drafts: Vec<(RaffleDraft, RecordOrigin)>,
        now: DateTime<Utc>,
    ) -> Vec<RaffleRecord> {
        let site = &self.config().name;
        drafts
            .into_iter()
            .filter_map(|(draft, origin)| match draft.into_record(site, origin, now) {
                Ok(record) => Some(record),
                Err(reason) => {
                    let skip = ScrapeError::ParseSkip {
                        site: site.clone(),
                        reason,
                    };
                    warn!("{}", skip);
                    None
                }
            })
            .collect()
    }
}

/// Collapse structured drafts sharing an id; the first seen wins, later
/// ones fill gaps. Drafts without an id cannot be matched or emitted.
fn merge_structured(drafts: Vec<RaffleDraft>) -> Vec<RaffleDraft> {
    let mut merged: Vec<RaffleDraft> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for draft in drafts {
        let Some(id) = draft.raffle_id.clone() else {
            debug!("Ignoring structured item without an id");
            continue;
        };
        match index.get(&id) {
            Some(&i) => merged[i].fill_from(&draft),
            None => {
                index.insert(id, merged.len());
                merged.push(draft);
            }
        }
    }
    merged
}

/// Fill incomplete structured drafts from rendered ones with the same id.
///
/// Structured values always win. Rendered items absent from the structured
/// set are kept as rendered records.
fn merge_rendered(
    structured: Vec<RaffleDraft>,
    rendered: Vec<RaffleDraft>,
) -> Vec<(RaffleDraft, RecordOrigin)> {
    let mut by_id: HashMap<String, RaffleDraft> = HashMap::new();
    let mut rendered_only = Vec::new();
    for draft in rendered {
        match draft.raffle_id.clone() {
            Some(id) => {
                by_id.entry(id).or_insert(draft);
            }
            None => rendered_only.push(draft),
        }
    }

    let mut out = Vec::with_capacity(structured.len() + by_id.len());
    for mut draft in structured {
        let origin = match draft.raffle_id.as_ref().and_then(|id| by_id.remove(id)) {
            Some(rendered) if !draft.is_complete() => {
                let before = draft.clone();
                draft.fill_from(&rendered);
                if draft == before {
                    RecordOrigin::Structured
                } else {
                    RecordOrigin::Merged
                }
            }
            _ => RecordOrigin::Structured,
        };
        out.push((draft, origin));
    }

    let mut extra: Vec<RaffleDraft> = by_id.into_values().collect();
    extra.sort_by(|a, b| a.raffle_id.cmp(&b.raffle_id));
    out.extend(
        extra
            .into_iter()
            .chain(rendered_only)
            .map(|d| (d, RecordOrigin::Rendered)),
    );
    out
}
