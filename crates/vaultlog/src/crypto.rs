//! Crypto collaborator contract
//!
//! The engine never builds ciphertext or signatures itself. It decides which
//! canonical bytes get signed and verified and how results are stored; the
//! actual primitives live behind this trait.

use crate::error::Result;
use chrono::{DateTime, Utc};

/// Public information about a key held by the collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInfo {
    pub fingerprint: String,
    pub uid: String,
    pub algorithm: String,
    pub bit_length: u32,
    pub curve: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Whether the key can be used as an encryption recipient
    pub can_encrypt: bool,
    /// Opaque public key material, stored verbatim in identity entries
    pub public_key: Vec<u8>,
}

/// Encryption and signing service consumed by the engine.
///
/// Implementations may block (hardware tokens, passphrase prompts); the
/// engine treats every call as an ordinary synchronous call.
pub trait Crypto: Send + Sync {
    /// Encrypt `plaintext` so that each holder of a recipient public key can decrypt it
    fn encrypt(&self, plaintext: &[u8], recipients: &[&[u8]]) -> Result<Vec<u8>>;

    /// Decrypt with the private key of `fingerprint`
    fn decrypt(&self, ciphertext: &[u8], fingerprint: &str) -> Result<Vec<u8>>;

    /// Produce a detached signature over `data` with the private key of `fingerprint`
    fn sign(&self, fingerprint: &str, data: &[u8]) -> Result<Vec<u8>>;

    /// Check a detached signature. `Ok(false)` means the signature is wrong;
    /// `Err` is reserved for collaborator failures.
    fn verify(&self, public_key: &[u8], data: &[u8], signature: &[u8]) -> Result<bool>;

    /// Look up public information about a key
    fn public_key_info(&self, fingerprint: &str) -> Result<KeyInfo>;
}
