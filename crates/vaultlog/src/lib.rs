//! vaultlog - Append-only, signed secrets vault
//!
//! "Every change is a new line; nothing is ever edited in place."
//!
//! A vault is a single text file: a marker line, a JSON header that indexes
//! every entity by line number, and one self-describing entry per line.
//! Identities, secret definitions and secret values each carry a hash of
//! their canonical form and a signature from a known identity, so any edit
//! made outside the engine is detected on load.
//!
//! Secret values carry their own recipient list. Sharing and revocation
//! append new values; history stays readable by whoever could read it, and
//! strict or permissive access decides whether older values may be used.
//!
//! Several vault files can be combined with [`MultiVault`], which resolves
//! lookups in configured order.
//!
//! Encryption and signatures are delegated to a [`Crypto`] implementation;
//! [`LocalKeyring`] provides one backed by age and Ed25519 key files.

pub mod access;
pub mod canonical;
pub mod config;
pub mod crypto;
pub mod entry;
pub mod error;
pub mod header;
pub mod integrity;
pub mod keyring;
pub mod lock;
pub mod manager;
pub mod model;
pub mod ops;
pub mod report;
pub mod resolver;
pub mod seal;

#[cfg(test)]
mod proptests;
#[cfg(test)]
mod testutil;

pub use access::{Access, AccessMode};
pub use config::Settings;
pub use crypto::{Crypto, KeyInfo};
pub use entry::{Entry, EntryKind};
pub use error::{Result, VaultError};
pub use header::{Header, LATEST_FORMAT_VERSION, MIN_SUPPORTED_VERSION};
pub use keyring::{KeyringConfig, LocalKeyring};
pub use manager::{FragmentationStats, LoadMode, ManagerOptions, VaultManager};
pub use model::{Identity, Secret, SecretValue, Vault};
pub use report::ValidationReport;
pub use resolver::{Located, MultiVault, SecretResolver};
