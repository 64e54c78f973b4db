//! Local keyring
//!
//! A file-backed [`Crypto`] implementation. Each key is an age X25519
//! identity stored as `<FINGERPRINT>.json` in the key directory; the Ed25519
//! signing key is derived from it, so one secret covers both encryption and
//! signatures.
//!
//! Public key blob: 32-byte Ed25519 verifying key followed by the age
//! recipient string (`age1...`). The fingerprint is the upper-case hex of the
//! first 20 bytes of SHA-256 over the blob.

use crate::canonical::ts;
use crate::crypto::{Crypto, KeyInfo};
use crate::error::{Result, VaultError};
use crate::model::normalize_fingerprint;
use age::secrecy::ExposeSecret;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions, Permissions};
use std::io::{Read, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const SIGNING_KEY_DOMAIN: &[u8] = b"vaultlog-ed25519-v1:";
const FINGERPRINT_BYTES: usize = 20;
const VERIFYING_KEY_LEN: usize = 32;

/// Where the keyring keeps its key files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyringConfig {
    pub key_dir: PathBuf,
}

impl Default for KeyringConfig {
    fn default() -> Self {
        let key_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("vaultlog")
            .join("keys");
        Self { key_dir }
    }
}

#[derive(Serialize, Deserialize)]
struct KeyFile {
    uid: String,
    #[serde(with = "ts")]
    created_at: DateTime<Utc>,
    age_identity: String,
}

struct LoadedKey {
    uid: String,
    created_at: DateTime<Utc>,
    age: age::x25519::Identity,
    signing: SigningKey,
    public_key: Vec<u8>,
}

fn crypto_err(e: impl std::fmt::Display) -> VaultError {
    VaultError::Crypto(e.to_string())
}

fn derive_signing_key(age_secret: &str) -> SigningKey {
    let mut hasher = Sha256::new();
    hasher.update(SIGNING_KEY_DOMAIN);
    hasher.update(age_secret.as_bytes());
    let seed: [u8; 32] = hasher.finalize().into();
    SigningKey::from_bytes(&seed)
}

fn public_blob(verifying: &VerifyingKey, recipient: &age::x25519::Recipient) -> Vec<u8> {
    let mut blob = verifying.to_bytes().to_vec();
    blob.extend_from_slice(recipient.to_string().as_bytes());
    blob
}

/// Fingerprint of a public key blob
pub fn fingerprint_of(public_key: &[u8]) -> String {
    hex::encode_upper(&Sha256::digest(public_key)[..FINGERPRINT_BYTES])
}

fn split_blob(public_key: &[u8]) -> Option<([u8; VERIFYING_KEY_LEN], &str)> {
    if public_key.len() <= VERIFYING_KEY_LEN {
        return None;
    }
    let (vk, recipient) = public_key.split_at(VERIFYING_KEY_LEN);
    let vk: [u8; VERIFYING_KEY_LEN] = vk.try_into().ok()?;
    let recipient = std::str::from_utf8(recipient).ok()?;
    Some((vk, recipient))
}

/// File-backed keyring
#[derive(Debug, Clone)]
pub struct LocalKeyring {
    config: KeyringConfig,
}

impl LocalKeyring {
    pub fn new(config: KeyringConfig) -> Self {
        Self { config }
    }

    pub fn key_dir(&self) -> &Path {
        &self.config.key_dir
    }

    fn key_path(&self, fingerprint: &str) -> PathBuf {
        self.config.key_dir.join(format!("{}.json", fingerprint))
    }

    /// Generate a new key for `uid` and return its fingerprint
    pub fn generate(&self, uid: &str) -> Result<String> {
        fs::create_dir_all(&self.config.key_dir)?;
        fs::set_permissions(&self.config.key_dir, Permissions::from_mode(0o700))?;

        let identity = age::x25519::Identity::generate();
        let secret = identity.to_string();
        let signing = derive_signing_key(secret.expose_secret());
        let fingerprint = fingerprint_of(&public_blob(&signing.verifying_key(), &identity.to_public()));

        let file = KeyFile {
            uid: uid.to_string(),
            created_at: Utc::now(),
            age_identity: secret.expose_secret().to_string(),
        };

        let mut out = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(self.key_path(&fingerprint))?;
        out.write_all(serde_json::to_string_pretty(&file)?.as_bytes())?;
        out.sync_all()?;

        info!(fingerprint = %fingerprint, uid, "generated key");
        Ok(fingerprint)
    }

    /// Fingerprints of all keys in the key directory, sorted
    pub fn fingerprints(&self) -> Result<Vec<String>> {
        if !self.config.key_dir.exists() {
            return Ok(vec![]);
        }

        let mut out = vec![];
        for entry in fs::read_dir(&self.config.key_dir)? {
            let name = entry?.file_name().to_string_lossy().to_string();
            if let Some(fp) = name.strip_suffix(".json") {
                if let Ok(fp) = normalize_fingerprint(fp) {
                    out.push(fp);
                }
            }
        }
        out.sort();
        Ok(out)
    }

    fn load(&self, fingerprint: &str) -> Result<LoadedKey> {
        let fingerprint = normalize_fingerprint(fingerprint)?;
        let path = self.key_path(&fingerprint);
        if !path.exists() {
            return Err(VaultError::Crypto(format!("no private key for {}", fingerprint)));
        }

        let file: KeyFile = serde_json::from_str(&fs::read_to_string(&path)?)?;
        let age = file
            .age_identity
            .parse::<age::x25519::Identity>()
            .map_err(|e| VaultError::Crypto(format!("failed to parse key {}: {}", fingerprint, e)))?;
        let signing = derive_signing_key(&file.age_identity);
        let public_key = public_blob(&signing.verifying_key(), &age.to_public());

        if fingerprint_of(&public_key) != fingerprint {
            return Err(VaultError::Crypto(format!(
                "key file {} does not match its fingerprint",
                path.display()
            )));
        }

        debug!(fingerprint = %fingerprint, "loaded key");
        Ok(LoadedKey {
            uid: file.uid,
            created_at: file.created_at,
            age,
            signing,
            public_key,
        })
    }
}

impl Crypto for LocalKeyring {
    fn encrypt(&self, plaintext: &[u8], recipients: &[&[u8]]) -> Result<Vec<u8>> {
        let mut boxed: Vec<Box<dyn age::Recipient + Send>> = Vec::with_capacity(recipients.len());
        for blob in recipients {
            let (_, recipient) =
                split_blob(blob).ok_or_else(|| crypto_err("malformed recipient public key"))?;
            let recipient = recipient
                .parse::<age::x25519::Recipient>()
                .map_err(|e| VaultError::Crypto(format!("invalid recipient: {}", e)))?;
            boxed.push(Box::new(recipient));
        }

        let encryptor =
            age::Encryptor::with_recipients(boxed).ok_or_else(|| crypto_err("no recipients"))?;

        let mut encrypted = vec![];
        let mut writer = encryptor.wrap_output(&mut encrypted).map_err(crypto_err)?;
        writer.write_all(plaintext).map_err(crypto_err)?;
        writer.finish().map_err(crypto_err)?;

        Ok(encrypted)
    }

    fn decrypt(&self, ciphertext: &[u8], fingerprint: &str) -> Result<Vec<u8>> {
        let key = self.load(fingerprint)?;

        let decryptor = match age::Decryptor::new(ciphertext).map_err(crypto_err)? {
            age::Decryptor::Recipients(d) => d,
            _ => return Err(crypto_err("unexpected passphrase encryption")),
        };

        let mut decrypted = vec![];
        let mut reader = decryptor
            .decrypt(std::iter::once(&key.age as &dyn age::Identity))
            .map_err(crypto_err)?;
        reader.read_to_end(&mut decrypted).map_err(crypto_err)?;

        Ok(decrypted)
    }

    fn sign(&self, fingerprint: &str, data: &[u8]) -> Result<Vec<u8>> {
        let key = self.load(fingerprint)?;
        Ok(key.signing.sign(data).to_bytes().to_vec())
    }

    fn verify(&self, public_key: &[u8], data: &[u8], signature: &[u8]) -> Result<bool> {
        let Some((vk, _)) = split_blob(public_key) else {
            return Ok(false);
        };
        let Ok(signature) = <[u8; 64]>::try_from(signature) else {
            return Ok(false);
        };
        let Ok(verifying) = VerifyingKey::from_bytes(&vk) else {
            return Ok(false);
        };

        Ok(verifying.verify(data, &Signature::from_bytes(&signature)).is_ok())
    }

    fn public_key_info(&self, fingerprint: &str) -> Result<KeyInfo> {
        let key = self.load(fingerprint)?;
        Ok(KeyInfo {
            fingerprint: fingerprint_of(&key.public_key),
            uid: key.uid,
            algorithm: "ed25519".to_string(),
            bit_length: 256,
            curve: Some("curve25519".to_string()),
            created_at: key.created_at,
            expires_at: None,
            can_encrypt: true,
            public_key: key.public_key,
        })
    }
}
