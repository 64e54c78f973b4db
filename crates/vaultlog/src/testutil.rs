//! Test helpers: a deterministic crypto collaborator and a vault builder

use crate::crypto::{Crypto, KeyInfo};
use crate::error::{Result, VaultError};
use crate::model::{Identity, Secret, SecretValue, Vault};
use crate::resolver::SecretResolver;
use crate::seal::{seal_identity, seal_secret, seal_tombstone, seal_value};
use chrono::{DateTime, Duration, TimeZone, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Fixed timestamp `n` seconds after 2024-01-01T00:00:00Z
pub fn ts(n: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(n)
}

/// Insecure stand-in for a real keyring. Signatures are SHA-256 over the
/// public key and data; ciphertext lists its recipients in the clear.
#[derive(Debug, Default, Clone)]
pub struct MockCrypto {
    bit_lengths: HashMap<String, u32>,
}

impl MockCrypto {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bit_length(mut self, fingerprint: &str, bits: u32) -> Self {
        self.bit_lengths.insert(fingerprint.to_string(), bits);
        self
    }

    pub fn public_key(fingerprint: &str) -> Vec<u8> {
        format!("mock-pk:{}", fingerprint).into_bytes()
    }

    fn mac(public_key: &[u8], data: &[u8]) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(public_key);
        hasher.update(data);
        hasher.finalize().to_vec()
    }
}

impl Crypto for MockCrypto {
    fn encrypt(&self, plaintext: &[u8], recipients: &[&[u8]]) -> Result<Vec<u8>> {
        let keys: Vec<String> = recipients.iter().map(hex::encode).collect();
        Ok(format!("mock\n{}\n{}", keys.join(","), hex::encode(plaintext)).into_bytes())
    }

    fn decrypt(&self, ciphertext: &[u8], fingerprint: &str) -> Result<Vec<u8>> {
        let text = String::from_utf8_lossy(ciphertext);
        let mut parts = text.split('\n');
        let (Some("mock"), Some(keys), Some(body)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(VaultError::Crypto("not a mock ciphertext".to_string()));
        };
        let mine = hex::encode(Self::public_key(fingerprint));
        if !keys.split(',').any(|k| k == mine) {
            return Err(VaultError::Crypto(format!("{} is not a recipient", fingerprint)));
        }
        hex::decode(body).map_err(|e| VaultError::Crypto(e.to_string()))
    }

    fn sign(&self, fingerprint: &str, data: &[u8]) -> Result<Vec<u8>> {
        Ok(Self::mac(&Self::public_key(fingerprint), data))
    }

    fn verify(&self, public_key: &[u8], data: &[u8], signature: &[u8]) -> Result<bool> {
        Ok(Self::mac(public_key, data) == signature)
    }

    fn public_key_info(&self, fingerprint: &str) -> Result<KeyInfo> {
        Ok(KeyInfo {
            fingerprint: fingerprint.to_string(),
            uid: format!("User {}", fingerprint),
            algorithm: "mock".to_string(),
            bit_length: self.bit_lengths.get(fingerprint).copied().unwrap_or(256),
            curve: None,
            created_at: ts(-3600),
            expires_at: None,
            can_encrypt: true,
            public_key: Self::public_key(fingerprint),
        })
    }
}

/// Builds signed in-memory vaults with a monotonic clock.
///
/// Secrets and values are signed by the first identity.
pub struct VaultBuilder<'a> {
    crypto: &'a MockCrypto,
    vault: Vault,
    clock: i64,
}

impl<'a> VaultBuilder<'a> {
    pub fn new(crypto: &'a MockCrypto) -> Self {
        Self {
            crypto,
            vault: Vault::new(),
            clock: 0,
        }
    }

    fn tick(&mut self) -> DateTime<Utc> {
        self.clock += 1;
        ts(self.clock)
    }

    fn signer(&self) -> Identity {
        self.vault.identities[0].clone()
    }

    fn recipients(&self, fingerprints: &[&str]) -> Vec<Identity> {
        fingerprints
            .iter()
            .map(|fp| self.vault.identity(fp).expect("recipient must be added first").clone())
            .collect()
    }

    pub fn identity(mut self, fingerprint: &str) -> Self {
        let at = self.tick();
        let identity = seal_identity(self.crypto, fingerprint, None, at).unwrap();
        self.vault.identities.push(identity);
        self
    }

    pub fn identity_signed_by(mut self, fingerprint: &str, signer: &str) -> Self {
        let at = self.tick();
        let signer = self.vault.identity(signer).unwrap().clone();
        let identity = seal_identity(self.crypto, fingerprint, Some(&signer), at).unwrap();
        self.vault.identities.push(identity);
        self
    }

    pub fn secret(mut self, key: &str, recipients: &[&str]) -> Self {
        let at = self.tick();
        let secret = seal_secret(self.crypto, key, &self.signer(), at).unwrap();
        self.vault.secrets.push(secret);
        self.value(key, recipients)
    }

    /// A secret definition with no values
    pub fn empty_secret(mut self, key: &str) -> Self {
        let at = self.tick();
        let secret = seal_secret(self.crypto, key, &self.signer(), at).unwrap();
        self.vault.secrets.push(secret);
        self
    }

    pub fn value(mut self, key: &str, recipients: &[&str]) -> Self {
        let at = self.tick();
        let signer = self.signer();
        let recipients = self.recipients(recipients);
        let refs: Vec<&Identity> = recipients.iter().collect();
        let plaintext = format!("{}@{}", key, self.clock);
        let value = seal_value(self.crypto, key, &signer, &refs, plaintext.as_bytes(), at).unwrap();
        self.vault.secret_mut(key).unwrap().values.push(value);
        self
    }

    pub fn tombstone(mut self, key: &str) -> Self {
        let at = self.tick();
        let value = seal_tombstone(self.crypto, key, &self.signer(), at).unwrap();
        self.vault.secret_mut(key).unwrap().values.push(value);
        self
    }

    pub fn build(self) -> Vault {
        self.vault
    }
}

/// Resolver over in-memory vaults. `None` slots behave like vaults that
/// failed to open. Writes are applied without validation.
#[derive(Debug, Default)]
pub struct MemoryResolver {
    pub vaults: Vec<Option<Vault>>,
    pub saves: Vec<usize>,
}

impl MemoryResolver {
    pub fn new(vaults: Vec<Option<Vault>>) -> Self {
        Self {
            vaults,
            saves: Vec::new(),
        }
    }

    fn slot(&mut self, index: usize) -> Result<&mut Vault> {
        let count = self.vaults.len();
        match self.vaults.get_mut(index) {
            Some(Some(vault)) => Ok(vault),
            Some(None) => Err(VaultError::NotOpen),
            None => Err(VaultError::NoSuchVault { index, count }),
        }
    }
}

impl SecretResolver for MemoryResolver {
    fn vault_count(&self) -> usize {
        self.vaults.len()
    }

    fn vault(&self, index: usize) -> Option<&Vault> {
        self.vaults.get(index).and_then(Option::as_ref)
    }

    fn add_identity(&mut self, index: usize, identity: Identity) -> Result<()> {
        self.slot(index)?.identities.push(identity);
        Ok(())
    }

    fn append_secret(&mut self, index: usize, secret: Secret) -> Result<()> {
        self.slot(index)?.secrets.push(secret);
        Ok(())
    }

    fn append_secret_value(&mut self, index: usize, key: &str, value: SecretValue) -> Result<()> {
        self.slot(index)?
            .secret_mut(key)
            .ok_or_else(|| VaultError::SecretNotFound(key.to_string()))?
            .values
            .push(value);
        Ok(())
    }

    fn save(&mut self, index: usize) -> Result<()> {
        self.slot(index)?;
        self.saves.push(index);
        Ok(())
    }
}
