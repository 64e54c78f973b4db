//! Integrity chain
//!
//! Every entity stores a hash of its canonical string and a detached
//! signature over the raw hash bytes. Verification always runs in the same
//! order: resolve the signer, recompute the hash, then check the signature.
//! The signer comes first because its key strength selects the digest.

use crate::canonical;
use crate::crypto::Crypto;
use crate::error::{Result, VaultError};
use crate::model::{Identity, Secret, SecretValue, Vault};
use sha2::{Digest, Sha256, Sha512};

/// Digest used for an entity, chosen by the signer's key strength
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha256,
    Sha512,
}

impl HashAlgorithm {
    /// Keys below 256 bits get SHA-256; stronger keys get SHA-512
    pub fn for_bit_length(bit_length: u32) -> Self {
        if bit_length < 256 {
            HashAlgorithm::Sha256
        } else {
            HashAlgorithm::Sha512
        }
    }

    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            HashAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
            HashAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
        }
    }
}

/// Hex-encoded hash of a canonical string for a signer of `bit_length` bits
pub fn compute_hash(canonical: &str, bit_length: u32) -> String {
    hex::encode(HashAlgorithm::for_bit_length(bit_length).digest(canonical.as_bytes()))
}

/// Hash `canonical` and have the collaborator sign the hash bytes.
///
/// Returns `(hash_hex, signature_hex)`.
pub fn hash_and_sign(
    crypto: &dyn Crypto,
    canonical: &str,
    signer_fingerprint: &str,
    signer_bit_length: u32,
) -> Result<(String, String)> {
    let digest = HashAlgorithm::for_bit_length(signer_bit_length).digest(canonical.as_bytes());
    let signature = crypto.sign(signer_fingerprint, &digest)?;
    Ok((hex::encode(digest), hex::encode(signature)))
}

/// Check one entity's stored hash and signature against its signer
pub fn verify_entity(
    crypto: &dyn Crypto,
    entity: &str,
    canonical: &str,
    stored_hash: &str,
    stored_signature: &str,
    signer: &Identity,
) -> Result<()> {
    let expected = compute_hash(canonical, signer.bit_length);
    if !expected.eq_ignore_ascii_case(stored_hash) {
        return Err(VaultError::TamperedData {
            entity: entity.to_string(),
        });
    }

    let invalid = || VaultError::InvalidSignature {
        entity: entity.to_string(),
    };
    let hash_bytes = hex::decode(stored_hash).map_err(|_| invalid())?;
    let signature = hex::decode(stored_signature).map_err(|_| invalid())?;

    if crypto.verify(&signer.public_key, &hash_bytes, &signature)? {
        Ok(())
    } else {
        Err(invalid())
    }
}

fn signer<'a>(vault: &'a Vault, entity: &str, signed_by: &str) -> Result<&'a Identity> {
    vault
        .identity(signed_by)
        .ok_or_else(|| VaultError::UnknownSigner {
            entity: entity.to_string(),
            signer: signed_by.to_string(),
        })
}

/// Verify an identity. Self-signed identities are checked against their own
/// key; others against the vault identity named in `signed_by`.
pub fn verify_identity(crypto: &dyn Crypto, identity: &Identity, vault: &Vault) -> Result<()> {
    let entity = format!("identity {}", identity.fingerprint);
    let signer = if identity.is_self_signed() {
        identity
    } else {
        signer(vault, &entity, &identity.signed_by)?
    };

    verify_entity(
        crypto,
        &entity,
        &canonical::identity(identity),
        &identity.hash,
        &identity.signature,
        signer,
    )
}

/// Verify a secret definition (not its values)
pub fn verify_secret(crypto: &dyn Crypto, secret: &Secret, vault: &Vault) -> Result<()> {
    let entity = format!("secret {}", secret.key);
    let signer = signer(vault, &entity, &secret.signed_by)?;

    verify_entity(
        crypto,
        &entity,
        &canonical::secret(secret),
        &secret.hash,
        &secret.signature,
        signer,
    )
}

/// Verify one value of the secret `key`
pub fn verify_value(
    crypto: &dyn Crypto,
    key: &str,
    value: &SecretValue,
    vault: &Vault,
) -> Result<()> {
    let entity = format!("value of {} added {}", key, canonical::format_timestamp(&value.added_at));
    let signer = signer(vault, &entity, &value.signed_by)?;

    verify_entity(
        crypto,
        &entity,
        &canonical::value(key, value),
        &value.hash,
        &value.signature,
        signer,
    )
}

/// Verify every identity, secret and value; stops at the first failure
pub fn verify_vault(crypto: &dyn Crypto, vault: &Vault) -> Result<()> {
    for identity in &vault.identities {
        verify_identity(crypto, identity, vault)?;
    }
    for secret in &vault.secrets {
        verify_secret(crypto, secret, vault)?;
        for value in &secret.values {
            verify_value(crypto, &secret.key, value, vault)?;
        }
    }
    Ok(())
}
