//! Vault errors
//!
//! One error enum for the whole engine. Integrity failures are always
//! returned to the caller; nothing in the engine logs-and-continues.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the engine
pub type Result<T> = std::result::Result<T, VaultError>;

/// Vault-specific errors
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Vault file {} is corrupt: {reason}", path.display())]
    StructuralCorruption { path: PathBuf, reason: String },

    #[error("Tampered data: stored hash of {entity} does not match its contents")]
    TamperedData { entity: String },

    #[error("Invalid signature on {entity}")]
    InvalidSignature { entity: String },

    #[error("Unknown signer {signer} for {entity}")]
    UnknownSigner { entity: String, signer: String },

    #[error("Vault {} is locked by another process", .0.display())]
    VaultLocked(PathBuf),

    #[error("Vault {} does not exist", .0.display())]
    VaultNotFound(PathBuf),

    #[error("Unsupported vault format version {found} (supported: {min}..={max})")]
    UnsupportedVersion { found: u32, min: u32, max: u32 },

    #[error("Vault is at format version {found}; upgrade to version {latest} before writing")]
    UpgradeRequired { found: u32, latest: u32 },

    #[error("Access denied: {fingerprint} cannot read {key}")]
    AccessDenied { key: String, fingerprint: String },

    #[error("Secret not found: {0}")]
    SecretNotFound(String),

    #[error("Secret {0} has no values")]
    NoValues(String),

    #[error("Secret {0} has been deleted")]
    SecretDeleted(String),

    #[error("Secret {0} is deleted and cannot receive new values")]
    SecretAlreadyDeleted(String),

    #[error("Secret already exists: {0}")]
    SecretExists(String),

    #[error("Identity already exists: {0}")]
    IdentityExists(String),

    #[error("Unknown identity: {0}")]
    UnknownIdentity(String),

    #[error("Invalid key name: {0}")]
    InvalidKey(String),

    #[error("Invalid fingerprint: {0}")]
    InvalidFingerprint(String),

    #[error("Invalid secret value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("{entity} was added before the entry it follows")]
    OutOfOrder { entity: String },

    #[error("Vault is not open")]
    NotOpen,

    #[error("Vault is open but has not been loaded")]
    NotLoaded,

    #[error("No vault at index {index} (configured: {count})")]
    NoSuchVault { index: usize, count: usize },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl VaultError {
    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::StructuralCorruption {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Hash, signature or trust-anchor failures
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            Self::TamperedData { .. } | Self::InvalidSignature { .. } | Self::UnknownSigner { .. }
        )
    }

    /// Lookups that found nothing readable (missing secret or empty history)
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::SecretNotFound(_) | Self::NoValues(_))
    }
}
