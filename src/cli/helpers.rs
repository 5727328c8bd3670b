//! Shared helper functions for CLI commands.

use std::path::Path;

use anyhow::Context;

use rafflescope::config::Settings;

/// Load settings from `path`, or discover them when no path is given, then
/// apply the `--cache-dir` override.
pub async fn load_settings(path: Option<&Path>, cache_dir: Option<&Path>) -> anyhow::Result<Settings> {
    let mut settings = match path {
        Some(path) => Settings::load(path)
            .await
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => Settings::discover().await.context("loading settings")?,
    };
    if let Some(dir) = cache_dir {
        settings.cache_dir = dir.to_path_buf();
    }
    Ok(settings)
}

/// Where the settings came from, for messages.
pub fn settings_origin(settings: &Settings) -> String {
    settings
        .source_path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "settings".to_string())
}

/// Truncate a string to `max` characters, adding an ellipsis when cut.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}
