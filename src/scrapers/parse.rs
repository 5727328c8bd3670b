//! Field parsing for structured payloads and rendered markup.
//!
//! Everything here produces [`RaffleDraft`]s; validation into records
//! happens in the site scraper so that a single bad item can be dropped
//! without losing the batch.

use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use url::Url;

use super::config::{HtmlExtraction, JsonExtraction};
use crate::models::RaffleDraft;

/// Keys searched for an item array when no `items_path` is configured.
const ITEM_ARRAY_KEYS: &[&str] = &["raffles", "products", "items", "data", "results"];
/// Keys holding a single item when no array is present.
const SINGLE_ITEM_KEYS: &[&str] = &["raffle", "product"];
/// Attributes consulted before element text when reading a field.
const VALUE_ATTRS: &[&str] = &[
    "datetime",
    "data-value",
    "data-entries",
    "data-max-entries",
    "data-remaining",
    "data-deadline",
    "content",
];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

static COUNT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d[\d,]*").unwrap());

static PROGRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d[\d,]*)\s*(?:/|of|out of)\s*(\d[\d,]*)").unwrap()
});

static EMBEDDED_TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{4}-\d{2}-\d{2}(?:[T ]\d{2}:\d{2}(?::\d{2}(?:\.\d+)?)?(?:Z|[+-]\d{2}:?\d{2})?)?")
        .unwrap()
});

static COUNTDOWN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:(?P<days>\d+)\s*(?:days?|d)\b)?\s*(?:(?P<hours>\d+)\s*(?:hours?|hrs?|h)\b)?\s*(?:(?P<minutes>\d+)\s*(?:minutes?|mins?|m)\b)?\s*(?:(?P<seconds>\d+)\s*(?:seconds?|secs?|s)\b)?",
    )
    .unwrap()
});

const MONTH_NAME: &str = r"(?P<month>jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)\b\.?";
const TIME_OF_DAY: &str = r"(?:,?\s+(?:at\s+)?(?P<hour>\d{1,2}):(?P<minute>\d{2})\s*(?P<meridiem>am|pm)?)?";

/// "10 March 2025", "3 Dec", "1st Apr 2025 18:00".
static DAY_MONTH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b(?P<day>\d{{1,2}})(?:st|nd|rd|th)?\s+(?:of\s+)?{MONTH_NAME}(?:,?\s+(?P<year>\d{{4}}))?{TIME_OF_DAY}"
    ))
    .unwrap()
});

/// "March 10, 2025", "Dec 3", "Apr 1 2025 at 6:00 pm".
static MONTH_DAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b{MONTH_NAME}\s+(?P<day>\d{{1,2}})(?:st|nd|rd|th)?\b(?:,?\s+(?P<year>\d{{4}}))?{TIME_OF_DAY}"
    ))
    .unwrap()
});

/// First integer in free text, ignoring thousands separators.
pub fn parse_count(text: &str) -> Option<u64> {
    COUNT
        .find(text)
        .and_then(|m| m.as_str().replace(',', "").parse().ok())
}

/// An `"N of M"` / `"N / M"` pair, as (taken, cap).
pub fn parse_progress(text: &str) -> Option<(u64, u64)> {
    let caps = PROGRESS.captures(text)?;
    let taken = caps.get(1)?.as_str().replace(',', "").parse().ok()?;
    let cap = caps.get(2)?.as_str().replace(',', "").parse().ok()?;
    Some((taken, cap))
}

/// Parse a deadline into UTC.
///
/// Accepts RFC 3339, naive date-times (assumed UTC), bare dates (end of day
/// UTC), timestamps embedded in surrounding text, month-name dates such as
/// `"10 March 2025"` or `"Dec 3"`, and countdowns such as `"2d 4h 30m"`
/// measured from `now`.
pub fn parse_deadline(text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Some(parsed) = parse_timestamp(text) {
        return Some(parsed);
    }

    if let Some(m) = EMBEDDED_TIMESTAMP.find(text) {
        if let Some(parsed) = parse_timestamp(m.as_str()) {
            return Some(parsed);
        }
    }

    if let Some(parsed) = parse_month_date(text, now) {
        return Some(parsed);
    }

    parse_countdown(text, now)
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%z") {
        return Some(dt.with_timezone(&Utc));
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(23, 59, 59))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// A date written with a month name. Without a time it means end of day;
/// without a year it is the next such date not already past.
fn parse_month_date(text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let caps = DAY_MONTH
        .captures(text)
        .or_else(|| MONTH_DAY.captures(text))?;

    let day: u32 = caps.name("day")?.as_str().parse().ok()?;
    // chrono's `%b` takes the three-letter prefix of any spelling we match.
    let month = NaiveDate::parse_from_str(
        &format!("1 {} 2000", caps.name("month")?.as_str().get(..3)?),
        "%d %b %Y",
    )
    .ok()?
    .month();

    let time = match (caps.name("hour"), caps.name("minute")) {
        (Some(hour), Some(minute)) => {
            let mut hour: u32 = hour.as_str().parse().ok()?;
            match caps.name("meridiem").map(|m| m.as_str().to_ascii_lowercase()) {
                Some(m) if m == "pm" && hour < 12 => hour += 12,
                Some(m) if m == "am" && hour == 12 => hour = 0,
                _ => {}
            }
            NaiveTime::from_hms_opt(hour, minute.as_str().parse().ok()?, 0)?
        }
        _ => NaiveTime::from_hms_opt(23, 59, 59)?,
    };

    let at = |year: i32| {
        NaiveDate::from_ymd_opt(year, month, day).map(|d| Utc.from_utc_datetime(&d.and_time(time)))
    };

    match caps.name("year") {
        Some(year) => at(year.as_str().parse().ok()?),
        None => match at(now.year()) {
            Some(this_year) if this_year >= now => Some(this_year),
            _ => at(now.year() + 1),
        },
    }
}

fn parse_countdown(text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    for caps in COUNTDOWN.captures_iter(text) {
        if ["days", "hours", "minutes", "seconds"]
            .iter()
            .all(|n| caps.name(n).is_none())
        {
            continue;
        }
        let part = |name: &str| -> Option<i64> {
            caps.name(name).map_or(Some(0), |m| m.as_str().parse().ok())
        };
        let delta = [
            Duration::try_days(part("days")?)?,
            Duration::try_hours(part("hours")?)?,
            Duration::try_minutes(part("minutes")?)?,
            Duration::try_seconds(part("seconds")?)?,
        ]
        .iter()
        .try_fold(Duration::zero(), |total, d| total.checked_add(d))?;
        return now.checked_add_signed(delta);
    }
    None
}

/// Follow a dot-notation path (`data.items.0.title`) into a JSON value.
/// Missing keys resolve to `Null`.
pub fn extract_path<'a>(data: &'a Value, path: &str) -> &'a Value {
    if path.is_empty() {
        return data;
    }

    let mut current = data;
    for key in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(key).unwrap_or(&Value::Null),
            Value::Array(arr) => match key.parse::<usize>() {
                Ok(idx) => arr.get(idx).unwrap_or(&Value::Null),
                Err(_) => &Value::Null,
            },
            _ => &Value::Null,
        };
    }
    current
}

fn first_present<'a>(item: &'a Value, paths: &[String]) -> Option<&'a Value> {
    paths
        .iter()
        .map(|p| extract_path(item, p))
        .find(|v| !v.is_null())
}

fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn value_as_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => parse_count(s),
        _ => None,
    }
}

fn value_as_deadline(value: &Value, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_deadline(s, now),
        // Epoch seconds, or milliseconds when implausibly large for seconds.
        Value::Number(n) => {
            let raw = n.as_i64()?;
            if raw > 100_000_000_000 {
                Utc.timestamp_millis_opt(raw).single()
            } else {
                Utc.timestamp_opt(raw, 0).single()
            }
        }
        _ => None,
    }
}

/// Sum of Shopify variant `inventory_quantity`, read as tickets remaining.
pub fn shopify_inventory(item: &Value) -> Option<u64> {
    let variants = item.get("variants")?.as_array()?;
    let quantities: Vec<i64> = variants
        .iter()
        .filter_map(|v| v.get("inventory_quantity").and_then(Value::as_i64))
        .collect();
    if quantities.is_empty() {
        return None;
    }
    Some(quantities.iter().map(|q| (*q).max(0) as u64).sum())
}

/// Items in a structured payload.
///
/// Uses `items_path` when set. Otherwise a top-level array, then the first
/// well-known array key, then a single-item key, then the payload itself
/// when it is an object.
pub fn json_items<'a>(payload: &'a Value, config: &JsonExtraction) -> Vec<&'a Value> {
    if !config.items_path.is_empty() {
        return match extract_path(payload, &config.items_path) {
            Value::Array(items) => items.iter().collect(),
            obj @ Value::Object(_) => vec![obj],
            _ => Vec::new(),
        };
    }

    match payload {
        Value::Array(items) => items.iter().filter(|v| v.is_object()).collect(),
        Value::Object(map) => {
            for key in ITEM_ARRAY_KEYS {
                if let Some(Value::Array(items)) = map.get(*key) {
                    return items.iter().filter(|v| v.is_object()).collect();
                }
            }
            for key in SINGLE_ITEM_KEYS {
                if let Some(obj @ Value::Object(_)) = map.get(*key) {
                    return vec![obj];
                }
            }
            vec![payload]
        }
        _ => Vec::new(),
    }
}

/// Build a draft from one structured item.
pub fn draft_from_json(
    item: &Value,
    config: &JsonExtraction,
    base_url: &str,
    now: DateTime<Utc>,
) -> RaffleDraft {
    let text = |paths: &[String]| first_present(item, paths).and_then(value_as_text);
    let count = |paths: &[String]| first_present(item, paths).and_then(value_as_count);

    let mut draft = RaffleDraft {
        raffle_id: text(&config.id),
        title: text(&config.title),
        description: text(&config.description),
        url: text(&config.url).map(|u| resolve_url(base_url, &u)),
        deadline: first_present(item, &config.deadline).and_then(|v| value_as_deadline(v, now)),
        entries: count(&config.entries),
        max_entries: count(&config.max_entries),
        remaining: count(&config.remaining).or_else(|| shopify_inventory(item)),
    };
    infer_cap(&mut draft);
    draft
}

/// Drafts for every item in a structured payload.
pub fn drafts_from_payload(
    payload: &Value,
    config: &JsonExtraction,
    base_url: &str,
    now: DateTime<Utc>,
) -> Vec<RaffleDraft> {
    json_items(payload, config)
        .into_iter()
        .map(|item| draft_from_json(item, config, base_url, now))
        .collect()
}

/// Drafts for every raffle card in rendered markup.
///
/// A card's embedded JSON attribute, when present and valid, wins over the
/// DOM text read from the same card.
pub fn drafts_from_html(
    html: &str,
    config: &HtmlExtraction,
    base_url: &str,
    now: DateTime<Utc>,
) -> Vec<RaffleDraft> {
    let document = Html::parse_document(html);
    let card_selector = match Selector::parse(&config.card_selector) {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };
    let selectors = CardSelectors::new(config);

    document
        .select(&card_selector)
        .map(|card| {
            let mut draft = embedded_card_draft(&card, config, base_url, now).unwrap_or_default();
            draft.fill_from(&selectors.read(&card, config, base_url, now));
            infer_cap(&mut draft);
            draft
        })
        .collect()
}

fn embedded_card_draft(
    card: &ElementRef<'_>,
    config: &HtmlExtraction,
    base_url: &str,
    now: DateTime<Utc>,
) -> Option<RaffleDraft> {
    if config.embedded_json_attr.is_empty() {
        return None;
    }
    let raw = card.value().attr(&config.embedded_json_attr)?;
    let value: Value = serde_json::from_str(raw).ok()?;
    Some(draft_from_json(
        &value,
        &JsonExtraction::default(),
        base_url,
        now,
    ))
}

struct CardSelectors {
    title: Option<Selector>,
    description: Option<Selector>,
    entries: Option<Selector>,
    max_entries: Option<Selector>,
    remaining: Option<Selector>,
    deadline: Option<Selector>,
    link: Option<Selector>,
}

impl CardSelectors {
    fn new(config: &HtmlExtraction) -> Self {
        let parse = |s: &str| {
            if s.is_empty() {
                None
            } else {
                Selector::parse(s).ok()
            }
        };
        Self {
            title: parse(&config.title_selector),
            description: parse(&config.description_selector),
            entries: parse(&config.entries_selector),
            max_entries: parse(&config.max_entries_selector),
            remaining: parse(&config.remaining_selector),
            deadline: parse(&config.deadline_selector),
            link: parse(&config.link_selector),
        }
    }

    fn read(
        &self,
        card: &ElementRef<'_>,
        config: &HtmlExtraction,
        base_url: &str,
        now: DateTime<Utc>,
    ) -> RaffleDraft {
        let field = |selector: &Option<Selector>| -> Option<String> {
            let selector = selector.as_ref()?;
            card.select(selector).find_map(|el| element_value(&el))
        };

        let url = self.link.as_ref().and_then(|sel| {
            card.select(sel)
                .find_map(|el| el.value().attr("href"))
                .map(|href| resolve_url(base_url, href))
        });

        let raffle_id = card
            .value()
            .attr(&config.id_attr)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .or_else(|| url.as_deref().and_then(id_from_url));

        let mut draft = RaffleDraft {
            raffle_id,
            title: self
                .title
                .as_ref()
                .and_then(|sel| card.select(sel).find_map(|el| element_text(&el))),
            description: self
                .description
                .as_ref()
                .and_then(|sel| card.select(sel).find_map(|el| element_text(&el))),
            url,
            deadline: field(&self.deadline).and_then(|t| parse_deadline(&t, now)),
            entries: None,
            max_entries: field(&self.max_entries).and_then(|t| parse_count(&t)),
            remaining: field(&self.remaining).and_then(|t| parse_count(&t)),
        };

        if let Some(text) = field(&self.entries) {
            match parse_progress(&text) {
                Some((taken, cap)) => {
                    draft.entries = Some(taken);
                    draft.max_entries.get_or_insert(cap);
                }
                None => draft.entries = parse_count(&text),
            }
        }

        draft
    }
}

fn element_text(el: &ElementRef<'_>) -> Option<String> {
    let text = el.text().collect::<Vec<_>>().join(" ");
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    Some(text).filter(|t| !t.is_empty())
}

fn element_value(el: &ElementRef<'_>) -> Option<String> {
    VALUE_ATTRS
        .iter()
        .find_map(|attr| el.value().attr(attr))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| element_text(el))
}

/// Resolve `href` against `base_url`, returning `href` unchanged when either is unusable.
pub fn resolve_url(base_url: &str, href: &str) -> String {
    Url::parse(base_url)
        .and_then(|base| base.join(href))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

/// Last non-empty path segment, used as an id for cards that carry none.
fn id_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    parsed
        .path_segments()?
        .filter(|s| !s.is_empty())
        .next_back()
        .map(|s| s.to_string())
}

/// Fill in the cap from taken + remaining when the site omits it. Counts
/// whose sum does not fit leave the cap unknown.
fn infer_cap(draft: &mut RaffleDraft) {
    if draft.max_entries.is_none() {
        if let (Some(entries), Some(remaining)) = (draft.entries, draft.remaining) {
            draft.max_entries = entries.checked_add(remaining);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count("1,234 entries"), Some(1234));
        assert_eq!(parse_count("Only 7 left!"), Some(7));
        assert_eq!(parse_count("sold out"), None);
    }

    #[test]
    fn test_parse_progress() {
        assert_eq!(parse_progress("12 of 100 sold"), Some((12, 100)));
        assert_eq!(parse_progress("1,200 / 5,000"), Some((1200, 5000)));
        assert_eq!(parse_progress("12 sold"), None);
    }

    #[test]
    fn test_parse_deadline_rfc3339_normalized_to_utc() {
        let parsed = parse_deadline("2025-03-10T18:00:00+02:00", now()).unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 3, 10, 16, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_deadline_naive_and_date() {
        assert_eq!(
            parse_deadline("2025-03-10 18:00", now()).unwrap(),
            Utc.with_ymd_and_hms(2025, 3, 10, 18, 0, 0).unwrap()
        );
        assert_eq!(
            parse_deadline("2025-03-10", now()).unwrap(),
            Utc.with_ymd_and_hms(2025, 3, 10, 23, 59, 59).unwrap()
        );
    }

    #[test]
    fn test_parse_deadline_embedded_in_text() {
        assert_eq!(
            parse_deadline("Draw closes 2025-03-10T20:00:00Z sharp", now()).unwrap(),
            Utc.with_ymd_and_hms(2025, 3, 10, 20, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_parse_deadline_countdown() {
        assert_eq!(
            parse_deadline("Ends in 2d 4h 30m", now()).unwrap(),
            Utc.with_ymd_and_hms(2025, 3, 3, 16, 30, 0).unwrap()
        );
        assert_eq!(
            parse_deadline("3 days", now()).unwrap(),
            Utc.with_ymd_and_hms(2025, 3, 4, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_parse_deadline_month_names() {
        assert_eq!(
            parse_deadline("Ends 10 March 2025", now()).unwrap(),
            Utc.with_ymd_and_hms(2025, 3, 10, 23, 59, 59).unwrap()
        );
        assert_eq!(
            parse_deadline("Closes March 10, 2025", now()).unwrap(),
            Utc.with_ymd_and_hms(2025, 3, 10, 23, 59, 59).unwrap()
        );
        assert_eq!(
            parse_deadline("Draw on 3rd Apr 2025 at 6:30 pm", now()).unwrap(),
            Utc.with_ymd_and_hms(2025, 4, 3, 18, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_parse_deadline_month_without_year() {
        assert_eq!(
            parse_deadline("Draw on 3 Dec", now()).unwrap(),
            Utc.with_ymd_and_hms(2025, 12, 3, 23, 59, 59).unwrap()
        );
        // Already past this year, so next year's.
        assert_eq!(
            parse_deadline("Sept 1", Utc.with_ymd_and_hms(2025, 10, 1, 0, 0, 0).unwrap()).unwrap(),
            Utc.with_ymd_and_hms(2026, 9, 1, 23, 59, 59).unwrap()
        );
    }

    #[test]
    fn test_parse_deadline_overflowing_countdown() {
        assert_eq!(parse_deadline("100000000000d 2500000000000h", now()), None);
        assert_eq!(parse_deadline("99999999999999999999 days", now()), None);
    }

    #[test]
    fn test_parse_deadline_garbage() {
        assert_eq!(parse_deadline("soon!", now()), None);
        assert_eq!(parse_deadline("   ", now()), None);
    }

    #[test]
    fn test_extract_path() {
        let data = json!({"data": {"items": [{"title": "A"}, {"title": "B"}]}});
        assert_eq!(extract_path(&data, "data.items.1.title"), "B");
        assert!(extract_path(&data, "data.missing.title").is_null());
        assert_eq!(extract_path(&data, ""), &data);
    }

    #[test]
    fn test_structured_counts_give_quarter_fill() {
        let payload = json!([{
            "id": 42,
            "title": "Gold watch",
            "entries": 5,
            "max_entries": 20,
            "deadline": "2025-03-10T18:00:00Z"
        }]);
        let drafts = drafts_from_payload(&payload, &JsonExtraction::default(), "https://a.example/", now());
        assert_eq!(drafts.len(), 1);
        assert!(drafts[0].is_complete());
        let record = drafts[0]
            .clone()
            .into_record("a", crate::models::RecordOrigin::Structured, now())
            .unwrap();
        assert_eq!(record.id.raffle_id, "42");
        assert!(record.max_entries.unwrap() >= record.entries.unwrap());
        assert_eq!(record.fill_ratio(), Some(0.25));
    }

    #[test]
    fn test_shopify_products_payload() {
        let payload = json!({"products": [{
            "id": 1001,
            "handle": "mega-draw",
            "title": "Mega draw",
            "raffle_deadline": "2025-04-01T00:00:00Z",
            "variants": [
                {"inventory_quantity": 30},
                {"inventory_quantity": -2},
                {"inventory_quantity": 10}
            ]
        }]});
        let drafts = drafts_from_payload(&payload, &JsonExtraction::default(), "https://a.example/", now());
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].remaining, Some(40));
        assert!(drafts[0].deadline.is_some());
        assert!(drafts[0].is_complete());
    }

    #[test]
    fn test_single_raffle_payload() {
        let payload = json!({"tickets": 17, "deadline": "2025-03-05T00:00:00Z", "id": "x", "name": "Car"});
        let drafts = drafts_from_payload(&payload, &JsonExtraction::default(), "https://a.example/", now());
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].remaining, Some(17));
        assert_eq!(drafts[0].title.as_deref(), Some("Car"));
    }

    #[test]
    fn test_configured_items_path() {
        let payload = json!({"result": {"draws": [{"id": "a"}, {"id": "b"}]}});
        let config = JsonExtraction {
            items_path: "result.draws".to_string(),
            ..Default::default()
        };
        assert_eq!(json_items(&payload, &config).len(), 2);
    }

    #[test]
    fn test_epoch_deadline() {
        let payload = json!({"id": "x", "deadline": 1741608000});
        let draft = draft_from_json(&payload, &JsonExtraction::default(), "https://a.example/", now());
        assert_eq!(
            draft.deadline,
            Some(Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_cards_from_rendered_markup() {
        let html = r#"
            <div id="raffles">
              <div class="raffle-card" data-raffle-id="r1">
                <h3> Signed   guitar </h3>
                <span class="entries">12 of 100 entries</span>
                <time datetime="2025-03-10T18:00:00Z">10 March</time>
                <a href="/raffles/r1">Enter</a>
              </div>
              <div class="raffle-card">
                <h3>Weekend away</h3>
                <span class="tickets-remaining">40 left</span>
                <span class="entries">60 sold</span>
                <span class="deadline">Ends in 1d</span>
                <a href="/raffles/weekend-away">Enter</a>
              </div>
            </div>
        "#;
        let drafts = drafts_from_html(html, &HtmlExtraction::default(), "https://a.example/", now());
        assert_eq!(drafts.len(), 2);

        assert_eq!(drafts[0].raffle_id.as_deref(), Some("r1"));
        assert_eq!(drafts[0].title.as_deref(), Some("Signed guitar"));
        assert_eq!(drafts[0].entries, Some(12));
        assert_eq!(drafts[0].max_entries, Some(100));
        assert_eq!(drafts[0].url.as_deref(), Some("https://a.example/raffles/r1"));

        assert_eq!(drafts[1].raffle_id.as_deref(), Some("weekend-away"));
        assert_eq!(drafts[1].entries, Some(60));
        assert_eq!(drafts[1].max_entries, Some(100));
        assert_eq!(
            drafts[1].deadline,
            Some(Utc.with_ymd_and_hms(2025, 3, 2, 12, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_card_embedded_json_wins() {
        let html = r#"
            <div class="raffle-card" data-raffle-id="r9"
                 data-raffle-json='{"id": "r9", "entries": 3, "max_entries": 10}'>
              <h3>Bike</h3>
              <span class="entries">99 entries</span>
            </div>
        "#;
        let drafts = drafts_from_html(html, &HtmlExtraction::default(), "https://a.example/", now());
        assert_eq!(drafts[0].entries, Some(3));
        assert_eq!(drafts[0].title.as_deref(), Some("Bike"));
    }

    #[test]
    fn test_card_with_overflowing_counts_keeps_batch() {
        let html = r#"
            <div class="raffle-card" data-raffle-id="huge">
              <h3>Broken counter</h3>
              <span class="entries">18446744073709551615 sold</span>
              <span class="tickets-remaining">5 left</span>
            </div>
            <div class="raffle-card" data-raffle-id="ok">
              <h3>Normal</h3>
              <span class="entries">3 of 10</span>
            </div>
        "#;
        let drafts = drafts_from_html(html, &HtmlExtraction::default(), "https://a.example/", now());
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].entries, Some(u64::MAX));
        assert_eq!(drafts[0].max_entries, None);
        assert_eq!(drafts[1].max_entries, Some(10));
    }
}
