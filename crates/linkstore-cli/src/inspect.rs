//! `stats` and `verify`.

use anyhow::{bail, Context, Result};
use linkstore_cas::{DedupStore, LocalBackend};

use crate::gc::{format_bytes, format_number};

pub fn cmd_stats(store: &DedupStore<LocalBackend>, json: bool) -> Result<()> {
    let stats = store.stats().context("Failed to read block store")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!();
    println!("  Block store: {}", store.mapper().root());
    println!();
    println!(
        "    📦 Blobs:         {} ({})",
        format_number(stats.blob_count),
        format_bytes(stats.total_bytes)
    );
    println!("    🔗 Shared:        {}", format_number(stats.shared_blobs));
    println!("    🗑️  Orphaned:      {}", format_number(stats.orphan_blobs));
    println!("    📄 Linked files:  {}", format_number(stats.caller_links));
    println!("    📁 Directories:   {}", format_number(stats.directories));
    if stats.caller_links > stats.blob_count && stats.blob_count > 0 {
        let saved = (stats.caller_links - stats.shared_blobs) * stats.avg_blob_size();
        println!("    💾 Saved (est.):  {}", format_bytes(saved));
    }
    println!();
    Ok(())
}

pub fn cmd_verify(store: &DedupStore<LocalBackend>, json: bool) -> Result<()> {
    let report = store.verify().context("Failed to verify block store")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!();
        println!("  Checked {} blobs", format_number(report.checked));
        for blob in &report.corrupt {
            println!("    ❌ {} (content hashes to {})", blob.key, blob.actual);
        }
        for key in &report.wrong_attribute {
            println!("    ❌ {key} (attribute does not match)");
        }
        for key in &report.missing_attribute {
            println!("    ⚠️  {key} (no hash attribute)");
        }
        for key in &report.foreign {
            println!("    ⚠️  {key} (not a blob)");
        }
        println!();
    }

    if !report.is_clean() {
        bail!(
            "{} corrupt blobs, {} with a mismatched attribute",
            report.corrupt.len(),
            report.wrong_attribute.len()
        );
    }
    Ok(())
}
