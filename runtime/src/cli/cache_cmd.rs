//! `towerline cache` for inspecting and pruning the tile cache.

use crate::cache::DiskCache;
use crate::cli::output::{self, Styled};
use crate::config::Config;
use anyhow::Result;

fn open(config: &Config) -> Result<DiskCache> {
    let path = config
        .imagery
        .cache_path
        .clone()
        .unwrap_or_else(DiskCache::default_path);
    DiskCache::open(&path)
}

/// Entry counts and size.
pub fn run_stats(config: &Config) -> Result<()> {
    let s = Styled::new();
    let cache = open(config)?;
    let stats = cache.stats()?;

    if output::is_json() {
        output::print_json(&serde_json::json!({
            "path": cache.path().display().to_string(),
            "entries": stats.entries,
            "expired": stats.expired,
            "bytes": stats.bytes,
        }));
    } else if !output::is_quiet() {
        output::print_header(&s);
        output::print_check(s.ok_sym(), "Location", &cache.path().display().to_string());
        output::print_check(s.ok_sym(), "Entries", &stats.entries.to_string());
        let sym = if stats.expired > 0 { s.warn_sym() } else { s.ok_sym() };
        output::print_check(sym, "Expired", &stats.expired.to_string());
        output::print_check(s.ok_sym(), "Size", &output::format_size(stats.bytes));
    }
    Ok(())
}

/// Drop expired entries.
pub fn run_purge(config: &Config) -> Result<()> {
    let s = Styled::new();
    let removed = open(config)?.purge_expired()?;
    if output::is_json() {
        output::print_json(&serde_json::json!({ "purged": removed }));
    } else if !output::is_quiet() {
        eprintln!("  {} Purged {removed} expired entr{}.", s.ok_sym(), if removed == 1 { "y" } else { "ies" });
    }
    Ok(())
}

/// Drop every entry.
pub fn run_clear(config: &Config) -> Result<()> {
    let s = Styled::new();
    let cache = open(config)?;
    let before = cache.stats()?;
    let removed = cache.clear()?;

    if output::is_json() {
        output::print_json(&serde_json::json!({
            "cleared_count": removed,
            "cleared_bytes": before.bytes,
        }));
    } else if !output::is_quiet() {
        if removed > 0 {
            eprintln!(
                "  {} Cleared {removed} cached tile(s) ({}).",
                s.ok_sym(),
                output::format_size(before.bytes)
            );
        } else {
            eprintln!("  No cached tiles to clear.");
        }
    }
    Ok(())
}
