//! Render cache maintenance.

use console::style;

use rafflescope::config::Settings;
use rafflescope::scrapers::DiskRenderCache;

/// Delete expired entries from the on-disk render cache.
pub async fn cmd_cache_purge(settings: Settings) -> anyhow::Result<()> {
    let cache = DiskRenderCache::new(&settings.cache_dir, settings.cache_ttl());
    let removed = cache.purge_expired().await?;
    println!(
        "{} Removed {} expired entries from {}",
        style("✓").green(),
        removed,
        cache.dir().display()
    );
    Ok(())
}
