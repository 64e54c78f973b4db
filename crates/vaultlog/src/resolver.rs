//! Multi-vault resolution
//!
//! Several vault files behave as one ordered secret space. Lookups walk the
//! vaults in configured order; nothing is merged or de-duplicated across
//! vaults. Writes are routed explicitly by vault index.

use crate::access::{self, Access, AccessMode};
use crate::crypto::Crypto;
use crate::error::{Result, VaultError};
use crate::manager::{ManagerOptions, VaultManager};
use crate::model::{Identity, Secret, SecretValue, Vault};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// An item together with the index of the vault it came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Located<T> {
    pub vault: usize,
    pub item: T,
}

/// Read and write access to an ordered list of vaults.
///
/// Implementors provide slot access and write routing; lookups are derived.
pub trait SecretResolver {
    /// Number of configured vaults, including ones that failed to open
    fn vault_count(&self) -> usize;

    /// Loaded content of vault `index`; `None` when it failed to open
    fn vault(&self, index: usize) -> Option<&Vault>;

    fn add_identity(&mut self, index: usize, identity: Identity) -> Result<()>;

    fn append_secret(&mut self, index: usize, secret: Secret) -> Result<()>;

    fn append_secret_value(&mut self, index: usize, key: &str, value: SecretValue) -> Result<()>;

    /// Persist staged writes of vault `index`
    fn save(&mut self, index: usize) -> Result<()>;

    fn save_all(&mut self) -> Result<()> {
        for index in 0..self.vault_count() {
            if self.vault(index).is_some() {
                self.save(index)?;
            }
        }
        Ok(())
    }

    /// Loaded vaults in configured order
    fn vaults(&self) -> Vec<Located<&Vault>> {
        (0..self.vault_count())
            .filter_map(|vault| self.vault(vault).map(|item| Located { vault, item }))
            .collect()
    }

    /// First secret named `key` in configured order
    fn find_secret(&self, key: &str) -> Option<Located<&Secret>> {
        self.vaults().into_iter().find_map(|v| {
            v.item.secret(key).map(|item| Located { vault: v.vault, item })
        })
    }

    /// The value of `key` with the latest `added_at` across all vaults.
    /// Ties go to the earlier vault.
    fn find_latest_value(&self, key: &str) -> Option<Located<&SecretValue>> {
        let mut best: Option<Located<&SecretValue>> = None;
        for v in self.vaults() {
            let Some(secret) = v.item.secret(key) else {
                continue;
            };
            for value in &secret.values {
                if best.map_or(true, |b| value.added_at > b.item.added_at) {
                    best = Some(Located {
                        vault: v.vault,
                        item: value,
                    });
                }
            }
        }
        best
    }

    /// Resolve what `fingerprint` may read of `key`, using the first vault
    /// that defines it
    fn resolve_access(&self, fingerprint: &str, key: &str, mode: AccessMode) -> Result<Located<Access<'_>>> {
        let found = self
            .find_secret(key)
            .ok_or_else(|| VaultError::SecretNotFound(key.to_string()))?;
        let access = access::resolve(found.item, fingerprint, mode)?;
        Ok(Located {
            vault: found.vault,
            item: access,
        })
    }

    fn identity(&self, fingerprint: &str) -> Option<Located<&Identity>> {
        self.vaults().into_iter().find_map(|v| {
            v.item
                .identity(fingerprint)
                .map(|item| Located { vault: v.vault, item })
        })
    }

    fn has_identity(&self, fingerprint: &str) -> bool {
        self.identity(fingerprint).is_some()
    }

    /// Sorted union of secret keys across loaded vaults
    fn secret_keys(&self) -> Vec<String> {
        let keys: BTreeSet<&str> = self
            .vaults()
            .into_iter()
            .flat_map(|v| v.item.secrets.iter().map(|s| s.key.as_str()))
            .collect();
        keys.into_iter().map(String::from).collect()
    }
}

/// One configured vault
#[derive(Debug)]
pub enum Slot {
    Open(VaultManager),
    /// The vault could not be opened; the error is kept for reporting
    Failed { path: PathBuf, error: VaultError },
}

impl Slot {
    pub fn path(&self) -> &Path {
        match self {
            Slot::Open(manager) => manager.path(),
            Slot::Failed { path, .. } => path,
        }
    }
}

/// Production resolver over vault files
#[derive(Debug)]
pub struct MultiVault {
    slots: Vec<Slot>,
}

impl MultiVault {
    /// Open, lock and load every path. A vault that fails is recorded in its
    /// slot and does not prevent the others from loading.
    pub fn open<P: AsRef<Path>>(paths: &[P], crypto: Arc<dyn Crypto>, options: &ManagerOptions) -> Self {
        let slots = paths
            .iter()
            .map(|path| {
                let path = path.as_ref();
                match VaultManager::open(path, crypto.clone(), options.clone()) {
                    Ok(manager) => {
                        debug!(path = %path.display(), "opened vault");
                        Slot::Open(manager)
                    }
                    Err(error) => {
                        warn!(path = %path.display(), error = %error, "failed to open vault");
                        Slot::Failed {
                            path: path.to_path_buf(),
                            error,
                        }
                    }
                }
            })
            .collect();
        Self { slots }
    }

    pub fn from_managers(managers: Vec<VaultManager>) -> Self {
        Self {
            slots: managers.into_iter().map(Slot::Open).collect(),
        }
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slots that failed to open, with their index
    pub fn errors(&self) -> Vec<(usize, &Path, &VaultError)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| match slot {
                Slot::Failed { path, error } => Some((i, path.as_path(), error)),
                Slot::Open(_) => None,
            })
            .collect()
    }

    fn slot(&self, index: usize) -> Result<&Slot> {
        self.slots.get(index).ok_or(VaultError::NoSuchVault {
            index,
            count: self.slots.len(),
        })
    }

    pub fn manager(&self, index: usize) -> Result<&VaultManager> {
        match self.slot(index)? {
            Slot::Open(manager) => Ok(manager),
            Slot::Failed { .. } => Err(VaultError::NotOpen),
        }
    }

    pub fn manager_mut(&mut self, index: usize) -> Result<&mut VaultManager> {
        let count = self.slots.len();
        match self.slots.get_mut(index) {
            Some(Slot::Open(manager)) => Ok(manager),
            Some(Slot::Failed { .. }) => Err(VaultError::NotOpen),
            None => Err(VaultError::NoSuchVault { index, count }),
        }
    }

    /// Unlock every open vault. All vaults are attempted; the first error is
    /// returned.
    pub fn unlock_all(&mut self) -> Result<()> {
        let mut first = None;
        for slot in &mut self.slots {
            if let Slot::Open(manager) = slot {
                if !manager.is_open() {
                    continue;
                }
                if let Err(e) = manager.unlock() {
                    warn!(path = %manager.path().display(), error = %e, "failed to unlock vault");
                    first.get_or_insert(e);
                }
            }
        }
        first.map_or(Ok(()), Err)
    }
}

impl SecretResolver for MultiVault {
    fn vault_count(&self) -> usize {
        self.slots.len()
    }

    fn vault(&self, index: usize) -> Option<&Vault> {
        match self.slots.get(index) {
            Some(Slot::Open(manager)) => manager.vault().ok(),
            _ => None,
        }
    }

    fn add_identity(&mut self, index: usize, identity: Identity) -> Result<()> {
        self.manager_mut(index)?.append_identity(identity)
    }

    fn append_secret(&mut self, index: usize, secret: Secret) -> Result<()> {
        self.manager_mut(index)?.append_secret(secret)
    }

    fn append_secret_value(&mut self, index: usize, key: &str, value: SecretValue) -> Result<()> {
        self.manager_mut(index)?.append_secret_value(key, value)
    }

    fn save(&mut self, index: usize) -> Result<()> {
        self.manager_mut(index)?.save()
    }
}
