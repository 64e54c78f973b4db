//! Access resolution
//!
//! Decides which value of a secret a fingerprint may read. Strict mode only
//! considers the current value, so revocation takes effect immediately.
//! Permissive mode falls back to the newest older value the requester can
//! still decrypt and tells the caller it did so.

use crate::error::{Result, VaultError};
use crate::model::{Secret, SecretValue};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether older values may be returned when the current one is not readable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    /// Only the newest value is eligible
    #[default]
    Strict,
    /// Walk back through history to the newest readable value
    Permissive,
}

impl AccessMode {
    pub fn from_strict(strict: bool) -> Self {
        if strict {
            AccessMode::Strict
        } else {
            AccessMode::Permissive
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMode::Strict => "strict",
            AccessMode::Permissive => "permissive",
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A value a requester is allowed to read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Access<'a> {
    pub key: &'a str,
    pub value: &'a SecretValue,
    /// Position of `value` in the secret's history
    pub value_index: usize,
    /// False when permissive mode returned an older value
    pub is_latest: bool,
}

/// Pick the value of `secret` that `fingerprint` may read under `mode`
pub fn resolve<'a>(secret: &'a Secret, fingerprint: &str, mode: AccessMode) -> Result<Access<'a>> {
    let Some(current) = secret.current() else {
        return Err(VaultError::NoValues(secret.key.clone()));
    };

    if current.deleted {
        return Err(VaultError::SecretDeleted(secret.key.clone()));
    }

    let last = secret.values.len() - 1;
    let candidates: &[SecretValue] = match mode {
        AccessMode::Strict => &secret.values[last..],
        AccessMode::Permissive => &secret.values,
    };

    let offset = secret.values.len() - candidates.len();
    candidates
        .iter()
        .enumerate()
        .rev()
        .find(|(_, v)| !v.deleted && v.is_available_to(fingerprint))
        .map(|(i, value)| Access {
            key: &secret.key,
            value,
            value_index: offset + i,
            is_latest: offset + i == last,
        })
        .ok_or_else(|| VaultError::AccessDenied {
            key: secret.key.clone(),
            fingerprint: fingerprint.to_string(),
        })
}
