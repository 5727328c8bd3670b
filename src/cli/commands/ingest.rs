//! One-shot ingestion command.

use console::style;
use serde_json::json;

use rafflescope::config::Settings;
use rafflescope::scrapers::{run_ingestion, RunContext, SiteStatus};

use super::super::helpers::{settings_origin, truncate};

/// Run a single ingestion cycle and print what it found.
pub async fn cmd_ingest(mut settings: Settings, json: bool, only: &[String]) -> anyhow::Result<()> {
    if !only.is_empty() {
        settings.sites.retain(|s| only.contains(&s.name));
        for name in only {
            if !settings.sites.iter().any(|s| &s.name == name) {
                anyhow::bail!("site '{}' not found in {}", name, settings_origin(&settings));
            }
        }
    }

    let ctx = RunContext::from_settings(settings);
    let report = run_ingestion(&ctx).await;
    let records = ctx.queue().drain();

    if json {
        let out = json!({ "records": records, "report": report });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("{} No raffles extracted", style("!").yellow());
    } else {
        println!("\n{}", style("Raffles").bold());
        println!("{}", "-".repeat(78));
        println!(
            "{:<28} {:<26} {:>9} {:>6}  Deadline",
            "ID", "Title", "Entries", "Fill"
        );
        println!("{}", "-".repeat(78));
        for record in &records {
            let entries = match (record.entries, record.max_entries) {
                (Some(e), Some(m)) if m > 0 => format!("{}/{}", e, m),
                (Some(e), _) => e.to_string(),
                _ => "-".to_string(),
            };
            let fill = record
                .fill_ratio()
                .map(|r| format!("{:.0}%", r * 100.0))
                .unwrap_or_else(|| "-".to_string());
            let deadline = record
                .deadline
                .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "{:<28} {:<26} {:>9} {:>6}  {}",
                truncate(&record.id.to_string(), 27),
                truncate(&record.title, 25),
                entries,
                fill,
                deadline
            );
        }
    }

    println!();
    for site in &report.sites {
        match &site.status {
            SiteStatus::Completed => println!(
                "{} {}: {} records",
                style("✓").green(),
                site.site,
                site.records
            ),
            SiteStatus::Failed { error, retryable } => println!(
                "{} {}: {}{}",
                style("✗").red(),
                site.site,
                error,
                if *retryable { " (will retry)" } else { "" }
            ),
            SiteStatus::TimedOut => println!(
                "{} {}: timed out after {} records",
                style("!").yellow(),
                site.site,
                site.records
            ),
        }
    }

    Ok(())
}
