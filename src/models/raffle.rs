//! Normalized raffle records emitted by site scrapers.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of a raffle: the configured source name plus the site-local id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RaffleId {
    pub source: String,
    pub raffle_id: String,
}

impl RaffleId {
    pub fn new(source: impl Into<String>, raffle_id: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            raffle_id: raffle_id.into(),
        }
    }
}

impl fmt::Display for RaffleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source, self.raffle_id)
    }
}

/// Where a record's ticket data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOrigin {
    /// Structured JSON (inline payload or discovered endpoint).
    Structured,
    /// DOM text scraped from a rendered page.
    Rendered,
    /// Structured data with gaps filled from a rendered page.
    Merged,
}

/// A normalized raffle, immutable once emitted.
///
/// Superseded by the next ingestion cycle's record with the same
/// [`RaffleId`]; never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaffleRecord {
    #[serde(flatten)]
    pub id: RaffleId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Deadline normalized to UTC.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entries: Option<u64>,
    /// Zero or absent means unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_entries: Option<u64>,
    pub origin: RecordOrigin,
    pub retrieved_at: DateTime<Utc>,
}

impl RaffleRecord {
    /// Whether the raffle has a finite ticket cap.
    pub fn is_bounded(&self) -> bool {
        self.max_entries.is_some_and(|m| m > 0)
    }

    /// Fraction of the cap already taken, when bounded and entries are known.
    pub fn fill_ratio(&self) -> Option<f64> {
        match (self.entries, self.max_entries) {
            (Some(entries), Some(max)) if max > 0 => Some(entries as f64 / max as f64),
            _ => None,
        }
    }

    /// Tickets still available, when bounded and entries are known.
    pub fn remaining(&self) -> Option<u64> {
        match (self.entries, self.max_entries) {
            (Some(entries), Some(max)) if max > 0 => Some(max.saturating_sub(entries)),
            _ => None,
        }
    }
}

/// Partially extracted raffle fields, before validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RaffleDraft {
    pub raffle_id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
    pub entries: Option<u64>,
    pub max_entries: Option<u64>,
    /// Tickets left, when a site reports that instead of entries taken.
    pub remaining: Option<u64>,
}

impl RaffleDraft {
    /// Whether the draft carries everything needed to skip rendering.
    ///
    /// Requires identity, title, a ticket count and a deadline.
    pub fn is_complete(&self) -> bool {
        self.raffle_id.is_some()
            && self.title.is_some()
            && self.deadline.is_some()
            && (self.entries.is_some() || self.max_entries.is_some() || self.remaining.is_some())
    }

    /// Fill fields missing here from `other`. Values already present win.
    pub fn fill_from(&mut self, other: &RaffleDraft) {
        fn fill<T: Clone>(slot: &mut Option<T>, from: &Option<T>) {
            if slot.is_none() {
                slot.clone_from(from);
            }
        }
        fill(&mut self.raffle_id, &other.raffle_id);
        fill(&mut self.title, &other.title);
        fill(&mut self.description, &other.description);
        fill(&mut self.url, &other.url);
        fill(&mut self.deadline, &other.deadline);
        fill(&mut self.entries, &other.entries);
        fill(&mut self.max_entries, &other.max_entries);
        fill(&mut self.remaining, &other.remaining);
    }

    /// Validate and freeze into a record.
    ///
    /// Infers entries from `max_entries - remaining` when only the remainder
    /// is known. Fails with a reason when identity or title is missing or
    /// entries exceed a bounded cap.
    pub fn into_record(
        self,
        source: &str,
        origin: RecordOrigin,
        retrieved_at: DateTime<Utc>,
    ) -> Result<RaffleRecord, String> {
        let raffle_id = self
            .raffle_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| "missing raffle id".to_string())?;
        let title = self
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| format!("raffle {} has no title", raffle_id))?;

        let entries = match (self.entries, self.max_entries, self.remaining) {
            (Some(entries), _, _) => Some(entries),
            (None, Some(max), Some(remaining)) if max > 0 => Some(max.saturating_sub(remaining)),
            _ => None,
        };

        if let (Some(entries), Some(max)) = (entries, self.max_entries) {
            if max > 0 && entries > max {
                return Err(format!(
                    "raffle {} reports {} entries over a cap of {}",
                    raffle_id, entries, max
                ));
            }
        }

        Ok(RaffleRecord {
            id: RaffleId::new(source, raffle_id),
            title,
            description: self
                .description
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty()),
            url: self.url,
            deadline: self.deadline,
            entries,
            max_entries: self.max_entries,
            origin,
            retrieved_at,
        })
    }
}
