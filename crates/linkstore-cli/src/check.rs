//! # linkstore check
//!
//! Diagnostic checks: config files, backend root, block store and what the
//! filesystem supports (exclusive create, hard links, user xattrs).

use std::path::Path;

use anyhow::{bail, Result};
use console::{style, Emoji};
use linkstore_cas::{Capabilities, StorageBackend};
use linkstore_config::Config;
use serde::Serialize;

use crate::gc::{format_bytes, format_number};

static CHECK: Emoji<'_, '_> = Emoji("✔ ", "[ok] ");
static CROSS: Emoji<'_, '_> = Emoji("✘ ", "[!!] ");
static WARN_ICON: Emoji<'_, '_> = Emoji("⚠ ", "[??] ");
static DOT: Emoji<'_, '_> = Emoji("● ", "[-] ");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum Status {
    Pass,
    Warn,
    Fail,
    Info,
}

#[derive(Debug, Serialize)]
struct Finding {
    status: Status,
    message: String,
}

#[derive(Debug, Default, Serialize)]
struct DiagResult {
    passed: u32,
    warned: u32,
    failed: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    capabilities: Option<Capabilities>,
    findings: Vec<Finding>,
    #[serde(skip)]
    quiet: bool,
}

impl DiagResult {
    fn record(&mut self, status: Status, msg: String) {
        if !self.quiet {
            match status {
                Status::Pass => eprintln!("  {} {}", CHECK, style(&msg).green()),
                Status::Warn => eprintln!("  {} {}", WARN_ICON, style(&msg).yellow()),
                Status::Fail => eprintln!("  {} {}", CROSS, style(&msg).red()),
                Status::Info => eprintln!("  {} {}", DOT, style(&msg).dim()),
            }
        }
        self.findings.push(Finding {
            status,
            message: msg,
        });
    }

    fn pass(&mut self, msg: impl Into<String>) {
        self.passed += 1;
        self.record(Status::Pass, msg.into());
    }

    fn warn(&mut self, msg: impl Into<String>) {
        self.warned += 1;
        self.record(Status::Warn, msg.into());
    }

    fn fail(&mut self, msg: impl Into<String>) {
        self.failed += 1;
        self.record(Status::Fail, msg.into());
    }

    fn info(&mut self, msg: impl Into<String>) {
        self.record(Status::Info, msg.into());
    }

    fn section(&self, title: &str) {
        if !self.quiet {
            eprintln!();
            eprintln!("{}", style(title).bold());
        }
    }
}

pub fn cmd_check(config: &Config, root: &Path, json: bool) -> Result<()> {
    let mut d = DiagResult {
        quiet: json,
        ..DiagResult::default()
    };

    if !json {
        eprintln!();
        eprintln!("{}", style("🩺 Linkstore Check").bold().cyan());
        eprintln!("{}", style("─".repeat(40)).dim());
    }

    d.section("Config");
    check_config(&mut d);

    d.section("Backend");
    let root_ok = check_root(root, &mut d);

    if root_ok {
        d.section("Block store");
        check_store(config, root, &mut d)?;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&d)?);
    } else {
        eprintln!();
        eprintln!("{}", style("─".repeat(40)).dim());
        eprintln!(
            "  {} passed, {} warnings, {} errors",
            style(d.passed).green().bold(),
            style(d.warned).yellow().bold(),
            style(d.failed).red().bold(),
        );
        eprintln!();
    }

    if d.failed > 0 {
        bail!("{} checks failed", d.failed);
    }
    Ok(())
}

fn check_config(d: &mut DiagResult) {
    match Config::global_config_path() {
        Some(path) if path.exists() => d.pass(format!("Global config: {}", path.display())),
        Some(path) => d.info(format!("No global config at {}", path.display())),
        None => d.warn("Cannot determine home directory"),
    }

    let project = Path::new(".linkstore/config.toml");
    if project.exists() {
        d.pass("Project config: .linkstore/config.toml");
    }

    match Config::load() {
        Ok(_) => d.pass("Config loads successfully"),
        Err(e) => d.fail(format!("Config load failed: {e}")),
    }
}

fn check_root(root: &Path, d: &mut DiagResult) -> bool {
    if !root.is_dir() {
        d.fail(format!("Backend root not found: {}", root.display()));
        d.info("Run 'linkstore init' to create it");
        return false;
    }
    d.pass(format!("Backend root: {}", root.display()));

    use std::os::unix::fs::MetadataExt;
    match std::fs::metadata(root) {
        Ok(meta) if meta.mode() & 0o200 != 0 => {
            d.pass("Backend root is writable");
            true
        }
        Ok(meta) => {
            d.fail(format!("Backend root not writable (mode {:o})", meta.mode() & 0o777));
            false
        }
        Err(e) => {
            d.fail(format!("Cannot stat backend root: {e}"));
            false
        }
    }
}

fn check_store(config: &Config, root: &Path, d: &mut DiagResult) -> Result<()> {
    let store = crate::open_store(config, root)?;

    match store.stats() {
        Ok(stats) if stats.blob_count > 0 || stats.directories > 0 => d.pass(format!(
            "{}: {} blobs ({}), {} orphaned",
            store.mapper().root(),
            format_number(stats.blob_count),
            format_bytes(stats.total_bytes),
            format_number(stats.orphan_blobs),
        )),
        Ok(_) => d.info(format!("{} is empty", store.mapper().root())),
        Err(e) => d.fail(format!("Cannot read block store: {e}")),
    }

    let caps = store.check_support();
    if caps.exclusive_create {
        d.pass("Exclusive create");
    } else {
        d.fail("No exclusive create: concurrent writers are unsafe");
    }
    if caps.dedup {
        d.pass(format!(
            "Hard links and {} attributes ({} backend)",
            config.dedup.hash.attribute_name(),
            store.backend().name()
        ));
    } else {
        d.warn("Deduplication unavailable: hard links or user xattrs missing");
        d.info("Deduplicated writes fall back to plain files");
    }
    d.capabilities = Some(caps);
    Ok(())
}
