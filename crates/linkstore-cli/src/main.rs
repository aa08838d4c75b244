//! # linkstore CLI
//!
//! Maintenance and scripting entry points for a hard-link deduplicating
//! block store.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use linkstore_cas::{DedupStore, LocalBackend, WriteOptions};
use linkstore_config::logging::{init_logging, LogLevel};
use linkstore_config::path::key_for_path;
use linkstore_config::{log_cli_debug, log_cli_info, log_store_info, log_store_warn, Config};

mod check;
mod gc;
mod inspect;

/// Linkstore - hard-link deduplicating file storage
#[derive(Parser)]
#[command(name = "linkstore")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Backend root directory (overrides `storage.root`)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// More logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the block store and report what the filesystem supports
    Init,

    /// Write a file, deduplicated or plain
    Put {
        /// Destination key, relative to the root
        #[arg(value_name = "FILE")]
        file: String,

        /// Read content from this path instead of stdin
        #[arg(long, value_name = "PATH")]
        from: Option<PathBuf>,

        /// Deduplicate through the block store
        #[arg(long, conflicts_with = "no_dedup")]
        dedup: bool,

        /// Write a plain file
        #[arg(long)]
        no_dedup: bool,

        /// Fail if the file already exists
        #[arg(long)]
        exclusive: bool,
    },

    /// Print a file to stdout
    Cat {
        #[arg(value_name = "FILE")]
        file: String,
    },

    /// Delete a file, reclaiming its blob if it was the last reference
    Rm {
        #[arg(value_name = "FILE")]
        file: String,
    },

    /// Remove orphaned blobs and empty shard directories
    Gc(gc::GcArgs),

    /// Diagnose configuration and filesystem support
    Check {
        /// Machine-readable output
        #[arg(long)]
        json: bool,
    },

    /// Block store statistics
    Stats {
        /// Machine-readable output
        #[arg(long)]
        json: bool,
    },

    /// Re-hash every blob and check it against its address
    Verify {
        /// Machine-readable output
        #[arg(long)]
        json: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,
    /// Print the config file locations
    Path,
}

fn main() -> Result<()> {
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

    let cli = Cli::parse();
    init_logging(LogLevel::from_verbosity(cli.verbose));

    linkstore_config::reload().context("Failed to load configuration")?;
    let mut config = linkstore_config::config().clone();
    if let Some(root) = &cli.root {
        config.storage.root = root.clone();
    }
    let root = config.backend_root();
    log_cli_debug!("configuration loaded", root = root.display().to_string());

    match cli.command {
        Commands::Init => cmd_init(&config, &root),
        Commands::Put {
            file,
            from,
            dedup,
            no_dedup,
            exclusive,
        } => {
            let options = WriteOptions {
                dedup: if dedup || no_dedup { dedup } else { config.dedup.default },
                exclusive,
            };
            cmd_put(&config, &root, &file, from.as_deref(), options)
        }
        Commands::Cat { file } => {
            let store = open_store(&config, &root)?;
            let data = store
                .read(&file_key(&file, &root)?)
                .with_context(|| format!("Failed to read {file}"))?;
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&data)?;
            stdout.flush()?;
            Ok(())
        }
        Commands::Rm { file } => {
            let store = open_store(&config, &root)?;
            store
                .delete(&file_key(&file, &root)?)
                .with_context(|| format!("Failed to delete {file}"))?;
            log_cli_info!("deleted", file = file.as_str());
            Ok(())
        }
        Commands::Gc(args) => gc::run(&open_store(&config, &root)?, args),
        Commands::Check { json } => check::cmd_check(&config, &root, json),
        Commands::Stats { json } => inspect::cmd_stats(&open_store(&config, &root)?, json),
        Commands::Verify { json } => inspect::cmd_verify(&open_store(&config, &root)?, json),
        Commands::Config { command } => cmd_config(&config, command),
    }
}

/// Open the store rooted at `root`.
pub(crate) fn open_store(config: &Config, root: &Path) -> Result<DedupStore<LocalBackend>> {
    let backend = LocalBackend::new(root)
        .with_context(|| format!("Failed to open backend at {}", root.display()))?;
    Ok(DedupStore::new(backend, config.store_options()))
}

fn file_key(arg: &str, root: &Path) -> Result<String> {
    match key_for_path(arg, root) {
        Some(key) => Ok(key),
        None => bail!("{arg} is not inside the store root {}", root.display()),
    }
}

fn cmd_init(config: &Config, root: &Path) -> Result<()> {
    std::fs::create_dir_all(root)
        .with_context(|| format!("Failed to create {}", root.display()))?;
    let store = open_store(config, root)?;
    store.sync().context("Failed to create the block store")?;
    let capabilities = store.check_support();

    println!("Initialised {}", root.join(config.storage.block_store.trim_start_matches('/')).display());
    println!("  hash:             {}", config.dedup.hash);
    println!("  exclusive create: {}", yes_no(capabilities.exclusive_create));
    println!("  atomic replace:   {}", yes_no(capabilities.atomic_replace));
    println!("  deduplication:    {}", yes_no(capabilities.dedup));
    if capabilities.dedup {
        log_store_info!("block store ready", hash = config.dedup.hash.name());
    } else {
        println!("  (deduplicated writes will fall back to plain files)");
        log_store_warn!("deduplication unavailable", root = root.display().to_string());
    }
    Ok(())
}

fn cmd_put(
    config: &Config,
    root: &Path,
    file: &str,
    from: Option<&Path>,
    options: WriteOptions,
) -> Result<()> {
    let content = match from {
        Some(path) => {
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?
        }
        None => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .context("Failed to read stdin")?;
            buf
        }
    };

    let store = open_store(config, root)?;
    let key = file_key(file, root)?;
    if options.dedup {
        store.sync().context("Failed to prepare the block store")?;
    }
    match store
        .write(&key, &content, options)
        .with_context(|| format!("Failed to write {file}"))?
    {
        Some(hash) => println!("{hash}  {key}"),
        None => println!("{}  {key}", "-".repeat(config.dedup.hash.hex_len())),
    }
    log_cli_info!("stored", file = key.as_str(), bytes = content.len(), dedup = options.dedup);
    Ok(())
}

fn cmd_config(config: &Config, command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Show => print!("{}", config.to_toml()),
        ConfigCommands::Path => {
            match Config::global_config_path() {
                Some(path) => println!("Global:  {}", path.display()),
                None => println!("Global:  (no home directory)"),
            }
            println!("Project: .linkstore/config.toml");
        }
    }
    Ok(())
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}
