//! Sealing - building signed entities
//!
//! These helpers ask the crypto collaborator for key info, ciphertext and
//! signatures, and assemble entities whose hash and signature match their
//! canonical encoding.

use crate::canonical;
use crate::crypto::Crypto;
use crate::error::{Result, VaultError};
use crate::integrity::hash_and_sign;
use crate::model::{normalize_fingerprint, normalize_key, Identity, Secret, SecretValue};
use chrono::{DateTime, Utc};

/// Build an identity entry for `fingerprint`.
///
/// With `signer = None` the identity is self-signed.
pub fn seal_identity(
    crypto: &dyn Crypto,
    fingerprint: &str,
    signer: Option<&Identity>,
    added_at: DateTime<Utc>,
) -> Result<Identity> {
    let fingerprint = normalize_fingerprint(fingerprint)?;
    let info = crypto.public_key_info(&fingerprint)?;
    if normalize_fingerprint(&info.fingerprint)? != fingerprint {
        return Err(VaultError::Crypto(format!(
            "key info for {} reports fingerprint {}",
            fingerprint, info.fingerprint
        )));
    }

    let mut identity = Identity {
        fingerprint: fingerprint.clone(),
        uid: info.uid,
        algorithm: info.algorithm,
        bit_length: info.bit_length,
        curve: info.curve,
        created_at: info.created_at,
        expires_at: info.expires_at,
        public_key: info.public_key,
        added_at,
        hash: String::new(),
        signature: String::new(),
        signed_by: signer.map_or(fingerprint, |s| s.fingerprint.clone()),
    };

    let bit_length = signer.map_or(identity.bit_length, |s| s.bit_length);
    let (hash, signature) = hash_and_sign(
        crypto,
        &canonical::identity(&identity),
        &identity.signed_by,
        bit_length,
    )?;
    identity.hash = hash;
    identity.signature = signature;
    Ok(identity)
}

/// Build a secret definition with an empty value history
pub fn seal_secret(
    crypto: &dyn Crypto,
    key: &str,
    signer: &Identity,
    added_at: DateTime<Utc>,
) -> Result<Secret> {
    let key = normalize_key(key)?;
    let (hash, signature) = hash_and_sign(
        crypto,
        &canonical::secret_definition(&key, &added_at, &signer.fingerprint),
        &signer.fingerprint,
        signer.bit_length,
    )?;

    Ok(Secret {
        key,
        added_at,
        hash,
        signature,
        signed_by: signer.fingerprint.clone(),
        values: Vec::new(),
    })
}

/// Encrypt `plaintext` for `recipients` and build a signed value of secret `key`
pub fn seal_value(
    crypto: &dyn Crypto,
    key: &str,
    signer: &Identity,
    recipients: &[&Identity],
    plaintext: &[u8],
    added_at: DateTime<Utc>,
) -> Result<SecretValue> {
    let key = normalize_key(key)?;
    if recipients.is_empty() {
        return Err(VaultError::InvalidValue {
            key,
            reason: "a value needs at least one recipient".to_string(),
        });
    }

    let public_keys: Vec<&[u8]> = recipients.iter().map(|r| r.public_key.as_slice()).collect();
    let payload = crypto.encrypt(plaintext, &public_keys)?;

    let mut available_to: Vec<String> = recipients.iter().map(|r| r.fingerprint.clone()).collect();
    available_to.sort();
    available_to.dedup();

    sign_value(
        crypto,
        &key,
        signer,
        SecretValue {
            added_at,
            available_to,
            payload,
            deleted: false,
            hash: String::new(),
            signature: String::new(),
            signed_by: signer.fingerprint.clone(),
        },
    )
}

/// Build the terminal tombstone value of secret `key`
pub fn seal_tombstone(
    crypto: &dyn Crypto,
    key: &str,
    signer: &Identity,
    added_at: DateTime<Utc>,
) -> Result<SecretValue> {
    let key = normalize_key(key)?;
    sign_value(
        crypto,
        &key,
        signer,
        SecretValue {
            added_at,
            available_to: Vec::new(),
            payload: Vec::new(),
            deleted: true,
            hash: String::new(),
            signature: String::new(),
            signed_by: signer.fingerprint.clone(),
        },
    )
}

fn sign_value(
    crypto: &dyn Crypto,
    key: &str,
    signer: &Identity,
    mut value: SecretValue,
) -> Result<SecretValue> {
    let (hash, signature) = hash_and_sign(
        crypto,
        &canonical::value(key, &value),
        &signer.fingerprint,
        signer.bit_length,
    )?;
    value.hash = hash;
    value.signature = signature;
    Ok(value)
}

/// Decrypt a value as `fingerprint`
pub fn reveal(crypto: &dyn Crypto, key: &str, value: &SecretValue, fingerprint: &str) -> Result<Vec<u8>> {
    if value.deleted {
        return Err(VaultError::SecretDeleted(key.to_string()));
    }
    if !value.is_available_to(fingerprint) {
        return Err(VaultError::AccessDenied {
            key: key.to_string(),
            fingerprint: fingerprint.to_string(),
        });
    }
    crypto.decrypt(&value.payload, fingerprint)
}
