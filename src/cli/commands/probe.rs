//! Availability probe command.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use console::style;

use rafflescope::config::Settings;
use rafflescope::scrapers::{probe_all, ProbeStatus};

use super::super::helpers::settings_origin;

/// Probe every configured site and print one classification per site.
pub async fn cmd_probe(settings: Settings, json: bool, json_output: Option<&Path>) -> anyhow::Result<()> {
    if settings.sites.is_empty() {
        println!("{} No sites configured in {}", style("!").yellow(), settings_origin(&settings));
        return Ok(());
    }

    let results = probe_all(&settings.sites, settings.request_timeout()).await;
    let by_site: BTreeMap<&str, ProbeStatus> = results
        .iter()
        .map(|r| (r.site.as_str(), r.status))
        .collect();

    if let Some(path) = json_output {
        let body = serde_json::to_string_pretty(&by_site)?;
        tokio::fs::write(path, body)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    for result in &results {
        let status = match result.status {
            ProbeStatus::Accessible => style(result.status.as_str()).green(),
            ProbeStatus::LoginRequired => style(result.status.as_str()).yellow(),
            _ => style(result.status.as_str()).red(),
        };
        let code = result
            .http_status
            .map(|c| format!(" (HTTP {})", c))
            .unwrap_or_default();
        println!("{}: {}{}", result.site, status, style(code).dim());
    }

    Ok(())
}
