//! Vault validation report
//!
//! Unlike `load()`, which refuses a vault at the first bad entity, the report
//! checks every identity, secret and value and lists all failures.

use crate::crypto::Crypto;
use crate::error::Result;
use crate::integrity;
use crate::manager::{FragmentationStats, ManagerOptions, VaultManager};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// One entity that failed verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub entity: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub path: PathBuf,
    pub version: u32,
    pub identities: usize,
    pub secrets: usize,
    pub values: usize,
    pub fragmentation: FragmentationStats,
    pub findings: Vec<Finding>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.findings.is_empty()
    }
}

/// Validate the vault at `path`.
///
/// Structural problems (bad markers, header, layout) are returned as errors;
/// integrity problems become findings.
pub fn validate(path: &Path, crypto: Arc<dyn Crypto>) -> Result<ValidationReport> {
    let options = ManagerOptions {
        create: false,
        autosave: false,
        ..ManagerOptions::default()
    };
    let mut manager = VaultManager::with_options(path, crypto.clone(), options);
    manager.open_and_lock()?;
    manager.load_parse_only()?;

    let vault = manager.vault()?;
    let mut findings = Vec::new();
    let mut record = |entity: String, result: Result<()>| {
        if let Err(e) = result {
            findings.push(Finding {
                entity,
                error: e.to_string(),
            });
        }
    };

    for identity in &vault.identities {
        record(
            format!("identity {}", identity.fingerprint),
            integrity::verify_identity(crypto.as_ref(), identity, vault),
        );
    }
    for secret in &vault.secrets {
        record(
            format!("secret {}", secret.key),
            integrity::verify_secret(crypto.as_ref(), secret, vault),
        );
        for (i, value) in secret.values.iter().enumerate() {
            record(
                format!("value #{} of {}", i, secret.key),
                integrity::verify_value(crypto.as_ref(), &secret.key, value, vault),
            );
        }
    }

    let report = ValidationReport {
        path: path.to_path_buf(),
        version: manager.version()?,
        identities: vault.identities.len(),
        secrets: vault.secrets.len(),
        values: vault.value_count(),
        fragmentation: manager.fragmentation_stats()?,
        findings,
    };
    manager.unlock()?;

    debug!(path = %path.display(), findings = report.findings.len(), "validated vault");
    Ok(report)
}
