//! Vault data model
//!
//! A vault is an ordered list of identities and an ordered list of secrets.
//! Secrets never change their key; their history only grows. The last value
//! of a secret is the current one, and a deleted secret ends in a tombstone.

use crate::error::{Result, VaultError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A public key that may sign entries and receive secrets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Unique key fingerprint (upper-case hex)
    pub fingerprint: String,
    /// User id attached to the key (e.g. "Jane <jane@example.com>")
    pub uid: String,
    /// Public key algorithm name
    pub algorithm: String,
    /// Key strength in bits
    pub bit_length: u32,
    /// Curve name for elliptic-curve keys
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub curve: Option<String>,
    /// When the key itself was created
    #[serde(with = "crate::canonical::ts")]
    pub created_at: DateTime<Utc>,
    /// When the key expires, if ever
    #[serde(default, with = "crate::canonical::ts_option", skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Opaque public key material
    #[serde(with = "hex")]
    pub public_key: Vec<u8>,
    /// When the identity was added to this vault
    #[serde(with = "crate::canonical::ts")]
    pub added_at: DateTime<Utc>,
    pub hash: String,
    pub signature: String,
    /// Fingerprint of the signing identity (equal to `fingerprint` when self-signed)
    pub signed_by: String,
}

impl Identity {
    pub fn is_self_signed(&self) -> bool {
        self.signed_by == self.fingerprint
    }
}

/// One entry in a secret's history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretValue {
    pub added_at: DateTime<Utc>,
    /// Fingerprints that can decrypt this value, sorted and de-duplicated
    pub available_to: Vec<String>,
    /// Ciphertext produced by the crypto collaborator (empty for tombstones)
    pub payload: Vec<u8>,
    pub deleted: bool,
    pub hash: String,
    pub signature: String,
    pub signed_by: String,
}

impl SecretValue {
    /// Whether `fingerprint` is one of this value's recipients
    pub fn is_available_to(&self, fingerprint: &str) -> bool {
        self.available_to.iter().any(|fp| fp == fingerprint)
    }
}

/// A named secret and its value history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Secret {
    /// Normalized key (e.g. "db/password")
    pub key: String,
    pub added_at: DateTime<Utc>,
    pub hash: String,
    pub signature: String,
    pub signed_by: String,
    /// Values ordered by `added_at`; the last one is current
    pub values: Vec<SecretValue>,
}

impl Secret {
    /// The authoritative value, if any
    pub fn current(&self) -> Option<&SecretValue> {
        self.values.last()
    }

    /// A secret is deleted iff its current value is a tombstone
    pub fn is_deleted(&self) -> bool {
        self.current().map_or(false, |v| v.deleted)
    }
}

/// The logical content of one vault file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vault {
    /// Identities ordered by `added_at`, oldest first
    pub identities: Vec<Identity>,
    /// Secrets in the order they were defined
    pub secrets: Vec<Secret>,
}

impl Vault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn identity(&self, fingerprint: &str) -> Option<&Identity> {
        self.identities.iter().find(|i| i.fingerprint == fingerprint)
    }

    /// Look up a secret. Absent secrets return `None`; tombstoned secrets are
    /// returned and must be checked with [`Secret::is_deleted`].
    pub fn secret(&self, key: &str) -> Option<&Secret> {
        self.secrets.iter().find(|s| s.key == key)
    }

    pub(crate) fn secret_mut(&mut self, key: &str) -> Option<&mut Secret> {
        self.secrets.iter_mut().find(|s| s.key == key)
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty() && self.secrets.is_empty()
    }

    /// Total number of stored values across all secrets
    pub fn value_count(&self) -> usize {
        self.secrets.iter().map(|s| s.values.len()).sum()
    }
}

/// Normalize and validate a secret key.
///
/// Keys are path-like (`api/openai`, `db/prod`). Surrounding whitespace is
/// trimmed; the remaining text must be a valid key.
pub fn normalize_key(key: &str) -> Result<String> {
    let key = key.trim();

    if key.is_empty() {
        return Err(VaultError::InvalidKey("Key cannot be empty".to_string()));
    }

    if key.contains("..") || key.starts_with('/') || key.ends_with('/') {
        return Err(VaultError::InvalidKey(format!("Invalid key format: {}", key)));
    }

    for c in key.chars() {
        if !c.is_alphanumeric() && c != '/' && c != '_' && c != '-' && c != '.' {
            return Err(VaultError::InvalidKey(format!(
                "Invalid character '{}' in key",
                c
            )));
        }
    }

    Ok(key.to_string())
}

/// Normalize a fingerprint: strip whitespace, upper-case, require hex
pub fn normalize_fingerprint(fingerprint: &str) -> Result<String> {
    let fp: String = fingerprint
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase();

    if fp.is_empty() || !fp.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(VaultError::InvalidFingerprint(fingerprint.to_string()));
    }

    Ok(fp)
}

/// Normalize a recipient list: each fingerprint normalized, then sorted and
/// de-duplicated
pub fn normalize_recipients<S: AsRef<str>>(fingerprints: &[S]) -> Result<Vec<String>> {
    let mut out = fingerprints
        .iter()
        .map(|fp| normalize_fingerprint(fp.as_ref()))
        .collect::<Result<Vec<_>>>()?;
    out.sort();
    out.dedup();
    Ok(out)
}
