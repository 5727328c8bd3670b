//! Endpoint discovery over raw listing markup.
//!
//! Everything here is a pure function of the markup: no network access and
//! no errors. Malformed or unrecognized markup yields an empty result, which
//! the site scraper reads as "render instead".

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use url::Url;

/// Bumped whenever the pattern table changes, so cached decisions can be
/// told apart from ones made with an older table.
pub const PATTERN_TABLE_VERSION: u32 = 1;

/// Collections probed on Shopify storefronts, in priority order.
const SHOPIFY_COLLECTIONS: &[&str] = &["draws", "raffles", "products"];

/// Endpoint patterns, most specific first. Capture group 1 is the URL.
static ENDPOINT_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    vec![
        // Explicit endpoint attributes: data-endpoint="/api/raffles"
        (
            "data_endpoint",
            Regex::new(r#"data-(?:raffle-)?endpoint\s*=\s*["']([^"']+)["']"#).unwrap(),
        ),
        // Raffle API paths referenced anywhere: "/raffles/api/current"
        (
            "raffle_api",
            Regex::new(r#"["'(]((?:https?://[^"'\s)]+)?/raffles?/api(?:/[^"'\s)]*)?)["')]"#)
                .unwrap(),
        ),
        // Script or link references to JSON files
        (
            "json_resource",
            Regex::new(r#"(?:src|href)\s*=\s*["']([^"']+\.json(?:\?[^"']*)?)["']"#).unwrap(),
        ),
    ]
});

static SHOPIFY_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)cdn\.shopify\.com|Shopify\.shop|shopify-section|myshopify\.com").unwrap()
});

/// Candidate structured-data endpoints found in `html`, resolved against
/// `base_url`, most specific first and without duplicates.
pub fn discover_endpoints(html: &str, base_url: &str) -> Vec<String> {
    let base = match Url::parse(base_url) {
        Ok(u) => u,
        Err(_) => return Vec::new(),
    };

    let mut seen = HashSet::new();
    let mut endpoints = Vec::new();
    let mut push = |raw: &str| {
        let raw = raw.trim();
        if raw.is_empty() || raw.starts_with("data:") || raw.starts_with("javascript:") {
            return;
        }
        if let Ok(resolved) = base.join(raw) {
            if matches!(resolved.scheme(), "http" | "https") && seen.insert(resolved.to_string()) {
                endpoints.push(resolved.to_string());
            }
        }
    };

    for (_name, pattern) in ENDPOINT_PATTERNS.iter() {
        for caps in pattern.captures_iter(html) {
            if let Some(m) = caps.get(1) {
                push(m.as_str());
            }
        }
    }

    if is_shopify(html) {
        for collection in SHOPIFY_COLLECTIONS {
            push(&format!("/collections/{}/products.json", collection));
        }
        push("/products.json");
    }

    endpoints
}

/// Whether the markup looks like a Shopify storefront.
pub fn is_shopify(html: &str) -> bool {
    SHOPIFY_MARKER.is_match(html)
}

/// Structured payloads embedded directly in the page.
///
/// Covers `attr` attributes holding JSON (e.g. `data-raffle-json`) and
/// `application/json` / `application/ld+json` script blocks. Blocks that do
/// not parse are ignored.
pub fn embedded_payloads(html: &str, attr: &str) -> Vec<Value> {
    let document = Html::parse_document(html);
    let mut payloads = Vec::new();

    if !attr.is_empty() {
        if let Ok(selector) = Selector::parse(&format!("[{}]", attr)) {
            for element in document.select(&selector) {
                if let Some(raw) = element.value().attr(attr) {
                    if let Ok(value) = serde_json::from_str::<Value>(raw) {
                        payloads.push(value);
                    }
                }
            }
        }
    }

    if let Ok(selector) = Selector::parse(
        r#"script[type="application/json"], script[type="application/ld+json"]"#,
    ) {
        for element in document.select(&selector) {
            let raw: String = element.text().collect();
            match serde_json::from_str::<Value>(raw.trim()) {
                Ok(value) if value.is_object() || value.is_array() => payloads.push(value),
                _ => {}
            }
        }
    }

    payloads
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://shop.example/raffles";

    #[test]
    fn test_no_patterns_yields_empty() {
        let html = "<html><body><h1>Win a car</h1><p>Check back soon</p></body></html>";
        assert!(discover_endpoints(html, BASE).is_empty());
    }

    #[test]
    fn test_malformed_markup_yields_empty() {
        assert!(discover_endpoints("<div <<< \"", BASE).is_empty());
        assert!(discover_endpoints("", BASE).is_empty());
        assert!(embedded_payloads("<div data-raffle-json='{not json'>", "data-raffle-json").is_empty());
    }

    #[test]
    fn test_invalid_base_url_yields_empty() {
        let html = r#"<div data-endpoint="/api/raffles"></div>"#;
        assert!(discover_endpoints(html, "not a url").is_empty());
    }

    #[test]
    fn test_ordering_most_specific_first() {
        let html = r#"
            <script src="/static/feed.json"></script>
            <div data-endpoint="/api/raffles"></div>
            <script>fetch("/raffles/api/current")</script>
        "#;
        let endpoints = discover_endpoints(html, BASE);
        assert_eq!(
            endpoints,
            vec![
                "https://shop.example/api/raffles",
                "https://shop.example/raffles/api/current",
                "https://shop.example/static/feed.json",
            ]
        );
    }

    #[test]
    fn test_duplicates_removed() {
        let html = r#"
            <div data-endpoint="/api/raffles"></div>
            <div data-endpoint="https://shop.example/api/raffles"></div>
        "#;
        assert_eq!(discover_endpoints(html, BASE).len(), 1);
    }

    #[test]
    fn test_shopify_conventions() {
        let html = r#"<link rel="stylesheet" href="https://cdn.shopify.com/s/theme.css">"#;
        let endpoints = discover_endpoints(html, BASE);
        assert_eq!(
            endpoints,
            vec![
                "https://shop.example/collections/draws/products.json",
                "https://shop.example/collections/raffles/products.json",
                "https://shop.example/collections/products/products.json",
                "https://shop.example/products.json",
            ]
        );
    }

    #[test]
    fn test_embedded_payloads() {
        let html = r#"
            <div class="raffle" data-raffle-json='{"id": "7", "tickets": 100}'></div>
            <script type="application/json">{"raffles": []}</script>
            <script type="application/ld+json">"just a string"</script>
        "#;
        let payloads = embedded_payloads(html, "data-raffle-json");
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[0]["tickets"], 100);
        assert!(payloads[1]["raffles"].is_array());
    }
}
