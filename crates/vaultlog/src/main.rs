//! vaultlog - Vault file diagnostics
//!
//! Commands:
//! - check: Verify every hash and signature, report all failures
//! - stats: Show fragmentation of each vault
//! - defrag: Drop orphaned lines
//! - version: Show the format version of each vault file
//! - upgrade: Migrate vault files to the latest format version
//! - list: List secrets across all vaults

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use vaultlog::{
    report, Crypto, LocalKeyring, ManagerOptions, MultiVault, SecretResolver, Settings, VaultManager,
    LATEST_FORMAT_VERSION,
};

#[derive(Parser)]
#[command(name = "vaultlog")]
#[command(about = "Inspect and maintain vaultlog secret vault files")]
#[command(version)]
#[command(after_help = r#"CONFIGURATION:
    VAULTLOG_VAULTS             Vault files in resolution order (separated like PATH)
    VAULTLOG_STRICT             1/0 - strict or permissive access to older values
    VAULTLOG_DEFRAG_THRESHOLD   Orphan ratio above which defrag is recommended
    VAULTLOG_KEY_DIR            Directory holding local keys

    Logging is controlled with RUST_LOG (e.g. RUST_LOG=vaultlog=debug)."#)]
struct Cli {
    /// Vault file to operate on (repeatable; overrides VAULTLOG_VAULTS)
    #[arg(long = "vault", global = true)]
    vaults: Vec<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify structure, hashes and signatures of every entry
    Check {
        /// Output as JSON for scripting
        #[arg(long)]
        json: bool,
    },

    /// Show referenced vs orphaned lines
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Remove orphaned lines and renumber the header
    Defrag {
        /// Defragment even when below the threshold
        #[arg(long)]
        force: bool,
    },

    /// Print the format version of each vault file
    Version,

    /// Rewrite vault files in the latest format version
    Upgrade,

    /// List secret keys across all vaults
    List {
        /// Filter by prefix (e.g., "api" to list api/*)
        prefix: Option<String>,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut settings = Settings::from_env().context("Invalid vaultlog environment")?;
    if !cli.vaults.is_empty() {
        settings.vaults = cli.vaults.clone();
    }
    let crypto: Arc<dyn Crypto> = Arc::new(LocalKeyring::new(settings.keyring.clone()));

    match cli.command {
        Commands::Check { json } => cmd_check(&settings, crypto, json),
        Commands::Stats { json } => cmd_stats(&settings, crypto, json),
        Commands::Defrag { force } => cmd_defrag(&settings, crypto, force),
        Commands::Version => cmd_version(&settings),
        Commands::Upgrade => cmd_upgrade(&settings, crypto),
        Commands::List { prefix, json } => cmd_list(&settings, crypto, prefix.as_deref(), json),
    }
}

/// Options for commands that must not create missing vaults
fn existing_only(settings: &Settings) -> ManagerOptions {
    ManagerOptions {
        create: false,
        ..settings.manager_options()
    }
}

fn open(path: &Path, settings: &Settings, crypto: Arc<dyn Crypto>) -> Result<VaultManager> {
    VaultManager::open(path, crypto, existing_only(settings))
        .with_context(|| format!("Failed to open vault {}", path.display()))
}

/// Verify every configured vault
fn cmd_check(settings: &Settings, crypto: Arc<dyn Crypto>, json: bool) -> Result<()> {
    let mut reports = vec![];
    for path in &settings.vaults {
        let report = report::validate(path, crypto.clone())
            .with_context(|| format!("Vault {} failed structural validation", path.display()))?;
        reports.push(report);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            println!("{} (version {})", report.path.display(), report.version);
            println!(
                "  {} identities, {} secrets, {} values",
                report.identities, report.secrets, report.values
            );
            if report.is_valid() {
                println!("  ok: all entries verified");
            }
            for finding in &report.findings {
                println!("  FAIL {}: {}", finding.entity, finding.error);
            }
        }
    }

    let failures: usize = reports.iter().map(|r| r.findings.len()).sum();
    if failures > 0 {
        bail!("{} integrity failure(s) found", failures);
    }
    Ok(())
}

/// Show fragmentation statistics
fn cmd_stats(settings: &Settings, crypto: Arc<dyn Crypto>, json: bool) -> Result<()> {
    let mut all = vec![];
    for path in &settings.vaults {
        let mut manager = VaultManager::with_options(path, crypto.clone(), existing_only(settings));
        manager.open_and_lock()?;
        manager.load_parse_only()?;
        all.push((path.clone(), manager.fragmentation_stats()?));
        manager.unlock()?;
    }

    if json {
        let entries: Vec<_> = all
            .iter()
            .map(|(path, stats)| serde_json::json!({ "path": path, "stats": stats }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    for (path, stats) in &all {
        println!("{}", path.display());
        println!(
            "  lines: {} total, {} referenced, {} orphaned ({:.1}%)",
            stats.total_lines,
            stats.referenced_lines,
            stats.orphaned_lines,
            stats.ratio * 100.0
        );
        if stats.recommend_defrag {
            println!("  defragmentation recommended: vaultlog defrag --vault {}", path.display());
        }
    }
    Ok(())
}

/// Defragment vaults above the threshold (or all with --force)
fn cmd_defrag(settings: &Settings, crypto: Arc<dyn Crypto>, force: bool) -> Result<()> {
    for path in &settings.vaults {
        let mut manager = open(path, settings, crypto.clone())?;
        let stats = manager.fragmentation_stats()?;

        if !stats.recommend_defrag && !force {
            println!("{}: {:.1}% orphaned, nothing to do", path.display(), stats.ratio * 100.0);
        } else {
            let removed = manager.defragment()?;
            println!("success: {}: removed {} orphaned line(s)", path.display(), removed);
        }
        manager.unlock()?;
    }
    Ok(())
}

/// Print format versions without loading the vaults
fn cmd_version(settings: &Settings) -> Result<()> {
    for path in &settings.vaults {
        let version = VaultManager::detect_version(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if version < LATEST_FORMAT_VERSION {
            println!(
                "{}: version {} (upgrade available to {})",
                path.display(),
                version,
                LATEST_FORMAT_VERSION
            );
        } else {
            println!("{}: version {}", path.display(), version);
        }
    }
    Ok(())
}

/// Migrate vaults to the latest format version
fn cmd_upgrade(settings: &Settings, crypto: Arc<dyn Crypto>) -> Result<()> {
    for path in &settings.vaults {
        let mut manager = open(path, settings, crypto.clone())?;
        let from = manager.version()?;
        if manager.upgrade()? {
            println!(
                "success: {}: upgraded from version {} to {}",
                path.display(),
                from,
                LATEST_FORMAT_VERSION
            );
        } else {
            println!("{}: already at version {}", path.display(), from);
        }
        manager.unlock()?;
    }
    Ok(())
}

/// List secret keys with the vault that defines them
fn cmd_list(settings: &Settings, crypto: Arc<dyn Crypto>, prefix: Option<&str>, json: bool) -> Result<()> {
    let mut vaults = MultiVault::open(&settings.vaults, crypto, &existing_only(settings));
    for (index, path, error) in vaults.errors() {
        eprintln!("warning: vault {} ({}) unavailable: {}", index, path.display(), error);
    }

    let keys: Vec<String> = vaults
        .secret_keys()
        .into_iter()
        .filter(|k| prefix.map_or(true, |p| k.starts_with(p)))
        .collect();

    if json {
        let entries: Vec<_> = keys
            .iter()
            .filter_map(|key| vaults.find_secret(key))
            .map(|found| {
                serde_json::json!({
                    "key": found.item.key,
                    "vault": found.vault,
                    "values": found.item.values.len(),
                    "deleted": found.item.is_deleted(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else if keys.is_empty() {
        match prefix {
            Some(prefix) => println!("No secrets found with prefix: {}", prefix),
            None => println!("No secrets stored."),
        }
    } else {
        println!("Stored Secrets");
        println!();
        for key in &keys {
            if let Some(found) = vaults.find_secret(key) {
                let marker = if found.item.is_deleted() { " (deleted)" } else { "" };
                println!(
                    "  {}  [vault {}, {} value(s)]{}",
                    key,
                    found.vault,
                    found.item.values.len(),
                    marker
                );
            }
        }
    }

    vaults.unlock_all()?;
    Ok(())
}
