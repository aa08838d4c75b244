//! # Garbage Collection
//!
//! Sweeps orphaned blobs (link count 1) and the shard directories they
//! leave empty. Blobs that still back a file are never touched.

use anyhow::{Context, Result};
use clap::Args;
use linkstore_cas::{DedupStore, LocalBackend};
use linkstore_config::log_gc_info;

#[derive(Args, Debug)]
pub struct GcArgs {
    /// Directory inside the block store to sweep (the whole store by default)
    #[arg(value_name = "DIR")]
    dir: Option<String>,

    /// Machine-readable output
    #[arg(long)]
    json: bool,
}

pub fn run(store: &DedupStore<LocalBackend>, args: GcArgs) -> Result<()> {
    let report = store
        .collect_garbage(args.dir.as_deref())
        .context("Garbage collection failed")?;
    log_gc_info!(
        "sweep finished",
        blobs_removed = report.blobs_removed,
        directories_removed = report.directories_removed
    );

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!();
    println!("  Linkstore Garbage Collection");
    println!("  ============================");
    println!();
    println!("    📦 Blobs kept:      {}", format_number(report.blobs_kept));
    println!(
        "    🗑️  Blobs removed:   {} ({})",
        format_number(report.blobs_removed),
        format_bytes(report.bytes_reclaimed)
    );
    println!("    📁 Dirs removed:    {}", format_number(report.directories_removed));
    println!();
    if report.blobs_removed == 0 {
        println!("  ✨ No orphaned blobs.");
    } else {
        println!("  ✅ Reclaimed {}.", format_bytes(report.bytes_reclaimed));
    }
    println!();
    Ok(())
}

/// Format bytes in human-readable form
pub(crate) fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Format number with comma separators
pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}
