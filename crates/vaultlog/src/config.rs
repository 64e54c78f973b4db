//! Settings
//!
//! Defaults follow the usual data/config directory layout; environment
//! variables override them:
//!
//! - `VAULTLOG_VAULTS` - vault files, separated like `PATH`
//! - `VAULTLOG_STRICT` - `1`/`true` for strict access, `0`/`false` for permissive
//! - `VAULTLOG_DEFRAG_THRESHOLD` - orphan ratio in `[0, 1]`
//! - `VAULTLOG_KEY_DIR` - keyring directory

use crate::access::AccessMode;
use crate::error::{Result, VaultError};
use crate::keyring::KeyringConfig;
use crate::manager::{ManagerOptions, DEFAULT_DEFRAG_THRESHOLD};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const ENV_VAULTS: &str = "VAULTLOG_VAULTS";
pub const ENV_STRICT: &str = "VAULTLOG_STRICT";
pub const ENV_DEFRAG_THRESHOLD: &str = "VAULTLOG_DEFRAG_THRESHOLD";
pub const ENV_KEY_DIR: &str = "VAULTLOG_KEY_DIR";

/// Default vault file: `<data dir>/vaultlog/vault.log`
pub fn default_vault_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("~/.local/share"))
        .join("vaultlog")
        .join("vault.log")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Vault files in resolution order
    pub vaults: Vec<PathBuf>,
    pub access_mode: AccessMode,
    pub defrag_threshold: f64,
    pub autosave: bool,
    pub create: bool,
    pub keyring: KeyringConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            vaults: vec![default_vault_path()],
            access_mode: AccessMode::Strict,
            defrag_threshold: DEFAULT_DEFRAG_THRESHOLD,
            autosave: true,
            create: true,
            keyring: KeyringConfig::default(),
        }
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(VaultError::Config(format!("{} must be a boolean, got '{}'", name, other))),
    }
}

impl Settings {
    /// Defaults with process environment overrides applied
    pub fn from_env() -> Result<Self> {
        let mut settings = Self::default();
        settings.apply_env(|name| std::env::var(name).ok())?;
        Ok(settings)
    }

    /// Apply overrides read through `lookup`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(paths) = lookup(ENV_VAULTS) {
            let vaults: Vec<PathBuf> = std::env::split_paths(&paths)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
            if vaults.is_empty() {
                return Err(VaultError::Config(format!("{} lists no vaults", ENV_VAULTS)));
            }
            self.vaults = vaults;
        }

        if let Some(strict) = lookup(ENV_STRICT) {
            self.access_mode = AccessMode::from_strict(parse_bool(ENV_STRICT, &strict)?);
        }

        if let Some(threshold) = lookup(ENV_DEFRAG_THRESHOLD) {
            let value: f64 = threshold.trim().parse().map_err(|_| {
                VaultError::Config(format!("{} must be a number, got '{}'", ENV_DEFRAG_THRESHOLD, threshold))
            })?;
            if !(0.0..=1.0).contains(&value) {
                return Err(VaultError::Config(format!(
                    "{} must be between 0 and 1, got {}",
                    ENV_DEFRAG_THRESHOLD, value
                )));
            }
            self.defrag_threshold = value;
        }

        if let Some(dir) = lookup(ENV_KEY_DIR) {
            self.keyring.key_dir = PathBuf::from(dir);
        }

        Ok(())
    }

    pub fn manager_options(&self) -> ManagerOptions {
        ManagerOptions {
            create: self.create,
            autosave: self.autosave,
            defrag_threshold: self.defrag_threshold,
        }
    }
}
