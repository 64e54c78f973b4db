//! Secret operations
//!
//! High-level writes on top of a [`SecretResolver`]. Sharing and revocation
//! never edit history: they append a new value encrypted for the new
//! recipient set. Old values stay readable by whoever could read them
//! before, which is what permissive access relies on.

use crate::access::AccessMode;
use crate::crypto::Crypto;
use crate::error::{Result, VaultError};
use crate::model::{normalize_key, normalize_recipients, Identity, Secret, SecretValue, Vault};
use crate::resolver::SecretResolver;
use crate::seal::{reveal, seal_identity, seal_secret, seal_tombstone, seal_value};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

/// Who writes, where, and when
#[derive(Clone, Copy)]
pub struct Author<'a> {
    pub crypto: &'a dyn Crypto,
    /// Index of the target vault
    pub vault: usize,
    /// Fingerprint of the signing identity
    pub signer: &'a str,
    pub at: DateTime<Utc>,
}

impl<'a> Author<'a> {
    pub fn new(crypto: &'a dyn Crypto, vault: usize, signer: &'a str) -> Self {
        Self {
            crypto,
            vault,
            signer,
            at: Utc::now(),
        }
    }

    /// Use a fixed timestamp instead of the current time
    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.at = at;
        self
    }
}

/// A decrypted secret
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revealed {
    pub key: String,
    pub vault: usize,
    pub plaintext: Vec<u8>,
    pub added_at: DateTime<Utc>,
    /// False when an older value was returned in permissive mode
    pub is_latest: bool,
}

fn target_vault<'r, R: SecretResolver + ?Sized>(resolver: &'r R, author: &Author<'_>) -> Result<&'r Vault> {
    resolver.vault(author.vault).ok_or(VaultError::NoSuchVault {
        index: author.vault,
        count: resolver.vault_count(),
    })
}

fn lookup<'v>(vault: &'v Vault, fingerprint: &str) -> Result<&'v Identity> {
    vault
        .identity(fingerprint)
        .ok_or_else(|| VaultError::UnknownIdentity(fingerprint.to_string()))
}

fn resolve_recipients<'v, S: AsRef<str>>(vault: &'v Vault, fingerprints: &[S]) -> Result<Vec<&'v Identity>> {
    normalize_recipients(fingerprints)?
        .iter()
        .map(|fp| lookup(vault, fp))
        .collect()
}

/// The current, readable value of `key` in the author's vault, decrypted
/// with the author's key
fn current_plaintext<R: SecretResolver + ?Sized>(
    resolver: &R,
    author: &Author<'_>,
    key: &str,
) -> Result<(Vec<u8>, Vec<String>)> {
    let vault = target_vault(resolver, author)?;
    let secret = vault
        .secret(key)
        .ok_or_else(|| VaultError::SecretNotFound(key.to_string()))?;
    let current = secret
        .current()
        .ok_or_else(|| VaultError::NoValues(key.to_string()))?;
    let plaintext = reveal(author.crypto, key, current, author.signer)?;
    Ok((plaintext, current.available_to.clone()))
}

/// Add `fingerprint` to the author's vault. The author's own fingerprint is
/// added self-signed; anyone else is signed by the author.
pub fn add_identity<R: SecretResolver + ?Sized>(
    resolver: &mut R,
    author: &Author<'_>,
    fingerprint: &str,
) -> Result<Identity> {
    let vault = target_vault(resolver, author)?;
    let signer = if fingerprint == author.signer {
        None
    } else {
        Some(lookup(vault, author.signer)?)
    };

    let identity = seal_identity(author.crypto, fingerprint, signer, author.at)?;
    resolver.add_identity(author.vault, identity.clone())?;
    info!(fingerprint = %identity.fingerprint, vault = author.vault, "added identity");
    Ok(identity)
}

/// Store `plaintext` under `key` for `recipients`. Creates the secret when it
/// does not exist yet, otherwise appends a new value.
pub fn set_secret<R: SecretResolver + ?Sized, S: AsRef<str>>(
    resolver: &mut R,
    author: &Author<'_>,
    key: &str,
    plaintext: &[u8],
    recipients_fps: &[S],
) -> Result<()> {
    let key = normalize_key(key)?;
    let vault = target_vault(resolver, author)?;
    let signer = lookup(vault, author.signer)?;
    let recipients = resolve_recipients(vault, recipients_fps)?;

    let value = seal_value(author.crypto, &key, signer, &recipients, plaintext, author.at)?;

    match vault.secret(&key).map(Secret::is_deleted) {
        Some(true) => Err(VaultError::SecretAlreadyDeleted(key)),
        Some(false) => {
            resolver.append_secret_value(author.vault, &key, value)?;
            info!(key = %key, vault = author.vault, "updated secret");
            Ok(())
        }
        None => {
            let mut secret = seal_secret(author.crypto, &key, signer, author.at)?;
            secret.values.push(value);
            resolver.append_secret(author.vault, secret)?;
            info!(key = %key, vault = author.vault, "created secret");
            Ok(())
        }
    }
}

/// Re-encrypt the current value of `key` for its recipients plus `add`
pub fn share_secret<R: SecretResolver + ?Sized, S: AsRef<str>>(
    resolver: &mut R,
    author: &Author<'_>,
    key: &str,
    add: &[S],
) -> Result<()> {
    let key = normalize_key(key)?;
    let (plaintext, mut fps) = current_plaintext(resolver, author, &key)?;
    fps.extend(normalize_recipients(add)?);

    set_secret(resolver, author, &key, &plaintext, &fps)
}

/// Re-encrypt the current value of `key` for its recipients minus `remove`.
/// Older values remain readable by the removed recipients.
pub fn revoke_secret<R: SecretResolver + ?Sized, S: AsRef<str>>(
    resolver: &mut R,
    author: &Author<'_>,
    key: &str,
    remove: &[S],
) -> Result<()> {
    let key = normalize_key(key)?;
    let remove = normalize_recipients(remove)?;
    let (plaintext, fps) = current_plaintext(resolver, author, &key)?;

    let remaining: Vec<String> = fps.into_iter().filter(|fp| !remove.contains(fp)).collect();
    if remaining.is_empty() {
        return Err(VaultError::InvalidValue {
            key,
            reason: "revocation would leave no recipients; delete the secret instead".to_string(),
        });
    }

    set_secret(resolver, author, &key, &plaintext, &remaining)
}

/// Append a tombstone to `key`
pub fn delete_secret<R: SecretResolver + ?Sized>(resolver: &mut R, author: &Author<'_>, key: &str) -> Result<()> {
    let key = normalize_key(key)?;
    let vault = target_vault(resolver, author)?;
    let signer = lookup(vault, author.signer)?;
    let secret = vault
        .secret(&key)
        .ok_or_else(|| VaultError::SecretNotFound(key.clone()))?;
    if secret.is_deleted() {
        return Err(VaultError::SecretAlreadyDeleted(key));
    }

    let tombstone: SecretValue = seal_tombstone(author.crypto, &key, signer, author.at)?;
    resolver.append_secret_value(author.vault, &key, tombstone)?;
    info!(key = %key, vault = author.vault, "deleted secret");
    Ok(())
}

/// Resolve and decrypt `key` as `fingerprint`
pub fn get_secret<R: SecretResolver + ?Sized>(
    resolver: &R,
    crypto: &dyn Crypto,
    fingerprint: &str,
    key: &str,
    mode: AccessMode,
) -> Result<Revealed> {
    let key = normalize_key(key)?;
    let access = resolver.resolve_access(fingerprint, &key, mode)?;
    let plaintext = reveal(crypto, &key, access.item.value, fingerprint)?;

    if !access.item.is_latest {
        warn!(key = %key, fingerprint, "returning an older value; current value is not readable");
    }

    Ok(Revealed {
        key,
        vault: access.vault,
        plaintext,
        added_at: access.item.value.added_at,
        is_latest: access.item.is_latest,
    })
}

/// Environment variable name for a key: `api/openai` -> `API_OPENAI`
pub fn env_var_name(key: &str) -> String {
    key.replace(['/', '-', '.'], "_").to_uppercase()
}

/// Every secret `fingerprint` can read, as environment assignments.
/// Secrets that cannot be read are skipped.
pub fn env_vars<R: SecretResolver + ?Sized>(
    resolver: &R,
    crypto: &dyn Crypto,
    fingerprint: &str,
    mode: AccessMode,
) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for key in resolver.secret_keys() {
        match get_secret(resolver, crypto, fingerprint, &key, mode) {
            Ok(revealed) => match String::from_utf8(revealed.plaintext) {
                Ok(value) => out.push((env_var_name(&key), value)),
                Err(_) => warn!(key = %key, "skipping secret that is not valid UTF-8"),
            },
            Err(VaultError::AccessDenied { .. }) | Err(VaultError::SecretDeleted(_)) => {}
            Err(e) => warn!(key = %key, error = %e, "failed to read secret"),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{ts, MemoryResolver, MockCrypto};

    fn setup(crypto: &MockCrypto) -> MemoryResolver {
        let mut r = MemoryResolver::new(vec![Some(Vault::new())]);
        add_identity(&mut r, &Author::new(crypto, 0, "AAA").at(ts(0)), "AAA").unwrap();
        add_identity(&mut r, &Author::new(crypto, 0, "AAA").at(ts(1)), "BBB").unwrap();
        add_identity(&mut r, &Author::new(crypto, 0, "AAA").at(ts(2)), "CCC").unwrap();
        r
    }

    fn author(crypto: &MockCrypto, n: i64) -> Author<'_> {
        Author::new(crypto, 0, "AAA").at(ts(n))
    }

    #[test]
    fn test_set_and_get() {
        let crypto = MockCrypto::new();
        let mut r = setup(&crypto);

        set_secret(&mut r, &author(&crypto, 10), "db/password", b"hunter2", &["AAA"]).unwrap();
        let got = get_secret(&r, &crypto, "AAA", "db/password", AccessMode::Strict).unwrap();
        assert_eq!(got.plaintext, b"hunter2");
        assert!(got.is_latest);
        assert_eq!(got.vault, 0);

        set_secret(&mut r, &author(&crypto, 11), "db/password", b"correct horse", &["aaa"]).unwrap();
        let secret = r.find_secret("db/password").unwrap().item;
        assert_eq!(secret.values.len(), 2);
        let got = get_secret(&r, &crypto, "AAA", "db/password", AccessMode::Strict).unwrap();
        assert_eq!(got.plaintext, b"correct horse");
    }

    #[test]
    fn test_set_unknown_recipient() {
        let crypto = MockCrypto::new();
        let mut r = setup(&crypto);

        let err = set_secret(&mut r, &author(&crypto, 10), "k", b"v", &["AAA", "DDD"]).unwrap_err();
        assert!(matches!(err, VaultError::UnknownIdentity(ref fp) if fp == "DDD"));
        assert!(r.find_secret("k").is_none());
    }

    #[test]
    fn test_share_then_revoke() {
        let crypto = MockCrypto::new();
        let mut r = setup(&crypto);

        set_secret(&mut r, &author(&crypto, 10), "db/password", b"pw", &["AAA"]).unwrap();
        share_secret(&mut r, &author(&crypto, 11), "db/password", &["BBB", "CCC"]).unwrap();

        let latest = r.find_latest_value("db/password").unwrap().item;
        assert_eq!(latest.available_to, vec!["AAA", "BBB", "CCC"]);
        let got = get_secret(&r, &crypto, "CCC", "db/password", AccessMode::Strict).unwrap();
        assert_eq!(got.plaintext, b"pw");

        revoke_secret(&mut r, &author(&crypto, 12), "db/password", &["CCC"]).unwrap();
        assert!(matches!(
            get_secret(&r, &crypto, "CCC", "db/password", AccessMode::Strict),
            Err(VaultError::AccessDenied { .. })
        ));

        // the previous value is still readable in permissive mode
        let got = get_secret(&r, &crypto, "CCC", "db/password", AccessMode::Permissive).unwrap();
        assert!(!got.is_latest);
        assert_eq!(got.added_at, ts(11));
        assert_eq!(got.plaintext, b"pw");
    }

    #[test]
    fn test_revoke_everyone_rejected() {
        let crypto = MockCrypto::new();
        let mut r = setup(&crypto);

        set_secret(&mut r, &author(&crypto, 10), "k", b"v", &["AAA"]).unwrap();
        let err = revoke_secret(&mut r, &author(&crypto, 11), "k", &["AAA"]).unwrap_err();
        assert!(matches!(err, VaultError::InvalidValue { .. }));
    }

    #[test]
    fn test_share_requires_author_access() {
        let crypto = MockCrypto::new();
        let mut r = setup(&crypto);

        set_secret(&mut r, &author(&crypto, 10), "k", b"v", &["BBB"]).unwrap();
        let err = share_secret(&mut r, &author(&crypto, 11), "k", &["CCC"]).unwrap_err();
        assert!(matches!(err, VaultError::AccessDenied { .. }));
    }

    #[test]
    fn test_delete() {
        let crypto = MockCrypto::new();
        let mut r = setup(&crypto);

        set_secret(&mut r, &author(&crypto, 10), "k", b"v", &["AAA"]).unwrap();
        delete_secret(&mut r, &author(&crypto, 11), "k").unwrap();

        assert!(matches!(
            get_secret(&r, &crypto, "AAA", "k", AccessMode::Permissive),
            Err(VaultError::SecretDeleted(_))
        ));
        assert!(matches!(
            delete_secret(&mut r, &author(&crypto, 12), "k"),
            Err(VaultError::SecretAlreadyDeleted(_))
        ));
        assert!(matches!(
            set_secret(&mut r, &author(&crypto, 12), "k", b"again", &["AAA"]),
            Err(VaultError::SecretAlreadyDeleted(_))
        ));
        assert!(matches!(
            delete_secret(&mut r, &author(&crypto, 12), "missing"),
            Err(VaultError::SecretNotFound(_))
        ));
    }

    #[test]
    fn test_env_vars() {
        let crypto = MockCrypto::new();
        let mut r = setup(&crypto);

        set_secret(&mut r, &author(&crypto, 10), "api/open-ai", b"sk-1", &["AAA", "BBB"]).unwrap();
        set_secret(&mut r, &author(&crypto, 11), "db/password", b"pw", &["AAA"]).unwrap();
        set_secret(&mut r, &author(&crypto, 12), "old", b"x", &["BBB"]).unwrap();
        delete_secret(&mut r, &author(&crypto, 13), "old").unwrap();

        let vars = env_vars(&r, &crypto, "BBB", AccessMode::Strict);
        assert_eq!(vars, vec![("API_OPEN_AI".to_string(), "sk-1".to_string())]);

        let vars = env_vars(&r, &crypto, "AAA", AccessMode::Strict);
        assert_eq!(vars.len(), 2);
    }

    #[test]
    fn test_env_var_name() {
        assert_eq!(env_var_name("api/openai"), "API_OPENAI");
        assert_eq!(env_var_name("db/prod.main"), "DB_PROD_MAIN");
    }
}
