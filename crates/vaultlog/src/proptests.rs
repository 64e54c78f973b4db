//! Property-based tests for the vault file format.
//!
//! - Writing a vault and loading it back yields an equal vault, in every
//!   supported format version
//! - Orphaned lines never change the logical content, and defragmentation
//!   removes exactly them
//! - After any sequence of appends every header reference points at an entry
//!   of the expected type and subject

use proptest::prelude::*;

use crate::entry::Entry;
use crate::error::VaultError;
use crate::header::{Header, LATEST_FORMAT_VERSION, MIN_SUPPORTED_VERSION};
use crate::manager::{ManagerOptions, VaultManager};
use crate::model::{Identity, Vault};
use crate::seal::{seal_identity, seal_secret, seal_tombstone, seal_value};
use crate::testutil::{ts, MockCrypto, VaultBuilder};
use proptest::test_runner::TestCaseError;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

#[derive(Debug, Clone)]
struct SecretPlan {
    /// Recipient bitmask over the vault's identities, one per value
    values: Vec<u8>,
    tombstone: bool,
}

fn secret_plan() -> impl Strategy<Value = SecretPlan> {
    (prop::collection::vec(any::<u8>(), 0..4), any::<bool>())
        .prop_map(|(values, tombstone)| SecretPlan { values, tombstone })
}

fn vault_plan() -> impl Strategy<Value = (usize, Vec<SecretPlan>)> {
    (0usize..4).prop_flat_map(|identities| {
        let max_secrets = if identities == 0 { 0 } else { 4 };
        (
            Just(identities),
            prop::collection::vec(secret_plan(), 0..=max_secrets),
        )
    })
}

fn build(crypto: &MockCrypto, identities: usize, secrets: &[SecretPlan]) -> Vault {
    let fps: Vec<String> = (0..identities).map(|i| format!("{:04X}", 0xA000 + i)).collect();
    let mut builder = VaultBuilder::new(crypto);
    for fp in &fps {
        builder = builder.identity(fp);
    }

    for (i, plan) in secrets.iter().enumerate() {
        let key = format!("ns{}/secret-{}", i % 2, i);
        builder = builder.empty_secret(&key);
        for mask in &plan.values {
            let mut recipients: Vec<&str> = fps
                .iter()
                .enumerate()
                .filter(|(bit, _)| mask & (1 << bit) != 0)
                .map(|(_, fp)| fp.as_str())
                .collect();
            if recipients.is_empty() {
                recipients.push(&fps[0]);
            }
            builder = builder.value(&key, &recipients);
        }
        if plan.tombstone {
            builder = builder.tombstone(&key);
        }
    }
    builder.build()
}

fn write(path: &Path, crypto: &Arc<MockCrypto>, vault: &Vault, version: u32) {
    let mut m = VaultManager::new(path, crypto.clone());
    m.open_and_lock().unwrap();
    m.load().unwrap();
    m.rewrite_from_vault_with_version(vault, version).unwrap();
}

fn reload(path: &Path, crypto: &Arc<MockCrypto>) -> VaultManager {
    VaultManager::open(path, crypto.clone(), ManagerOptions::default()).unwrap()
}

/// Insert junk lines at the given entry positions and shift the header
fn inject_orphans(path: &Path, positions: &[usize]) {
    let content = fs::read_to_string(path).unwrap();
    let lines: Vec<&str> = content.lines().collect();

    let mut entries: Vec<Option<usize>> = (4..=lines.len()).map(Some).collect();
    for &pos in positions {
        let at = pos % (entries.len() + 1);
        entries.insert(at, None);
    }

    let mut map = HashMap::new();
    let mut body = Vec::new();
    for (i, entry) in entries.iter().enumerate() {
        match entry {
            Some(old) => {
                map.insert(*old, 4 + i);
                body.push(lines[old - 1].to_string());
            }
            None => body.push(format!("orphan {}", i)),
        }
    }

    let header = Header::parse(lines[1]).unwrap().renumbered(&map);
    let mut out = vec![lines[0].to_string(), header.encode().unwrap(), lines[2].to_string()];
    out.extend(body);
    fs::write(path, out.join("\n") + "\n").unwrap();
}

#[derive(Debug, Clone)]
enum Step {
    Identity,
    Secret,
    /// Secret selector and recipient bitmask
    Value(usize, u8),
    Tombstone(usize),
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        Just(Step::Identity),
        Just(Step::Secret),
        (any::<usize>(), any::<u8>()).prop_map(|(s, mask)| Step::Value(s, mask)),
        any::<usize>().prop_map(Step::Tombstone),
    ]
}

/// Apply one step through the manager. Steps that need an identity or a
/// secret are skipped when there is none.
fn apply(m: &mut VaultManager, crypto: &MockCrypto, step: &Step, at: i64) -> Result<(), TestCaseError> {
    let vault = m.vault().unwrap().clone();
    let signer: Option<Identity> = vault.identities.first().cloned();
    let at = ts(at);

    match step {
        Step::Identity => {
            let fp = format!("{:04X}", 0xB000 + vault.identities.len());
            let identity = seal_identity(crypto, &fp, signer.as_ref(), at).unwrap();
            m.append_identity(identity).unwrap();
        }
        Step::Secret => {
            let Some(signer) = signer else { return Ok(()) };
            let key = format!("steps/secret-{}", vault.secrets.len());
            m.append_secret(seal_secret(crypto, &key, &signer, at).unwrap()).unwrap();
        }
        Step::Value(pick, _) | Step::Tombstone(pick) => {
            let Some(signer) = signer else { return Ok(()) };
            if vault.secrets.is_empty() {
                return Ok(());
            }
            let secret = &vault.secrets[pick % vault.secrets.len()];
            let value = match step {
                Step::Value(_, mask) => {
                    let mut recipients: Vec<&Identity> = vault
                        .identities
                        .iter()
                        .enumerate()
                        .filter(|(bit, _)| *bit < 8 && mask & (1 << bit) != 0)
                        .map(|(_, identity)| identity)
                        .collect();
                    if recipients.is_empty() {
                        recipients.push(&signer);
                    }
                    seal_value(crypto, &secret.key, &signer, &recipients, b"v", at).unwrap()
                }
                _ => seal_tombstone(crypto, &secret.key, &signer, at).unwrap(),
            };

            let result = m.append_secret_value(&secret.key, value);
            if secret.is_deleted() {
                prop_assert!(matches!(result, Err(VaultError::SecretAlreadyDeleted(_))));
            } else {
                prop_assert!(result.is_ok());
            }
        }
    }
    Ok(())
}

/// Every header reference is in range, unique, ascending for values, and
/// points at an entry of the expected type and subject
fn check_header(path: &Path) -> Result<(), TestCaseError> {
    let content = fs::read_to_string(path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    let header = Header::parse(lines[1]).map_err(|e| TestCaseError::fail(e.to_string()))?;
    header
        .validate_layout(lines.len())
        .map_err(|e| TestCaseError::fail(e.to_string()))?;

    for (line_no, (kind, subject)) in header.expectations() {
        let entry = Entry::parse(lines[line_no - 1], header.version)
            .map_err(|e| TestCaseError::fail(format!("line {}: {}", line_no, e)))?;
        prop_assert_eq!(entry.kind(), kind);
        prop_assert_eq!(entry.subject(), subject);
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Any vault survives a write/load cycle unchanged, in every version.
    #[test]
    fn write_then_load_round_trips((identities, secrets) in vault_plan()) {
        let crypto = Arc::new(MockCrypto::new());
        let vault = build(&crypto, identities, &secrets);

        for version in MIN_SUPPORTED_VERSION..=LATEST_FORMAT_VERSION {
            let dir = tempdir().unwrap();
            let path = dir.path().join("prop.vault");
            write(&path, &crypto, &vault, version);

            prop_assert_eq!(VaultManager::detect_version(&path).unwrap(), version);
            let m = reload(&path, &crypto);
            prop_assert_eq!(m.vault().unwrap(), &vault);
            prop_assert_eq!(m.fragmentation_stats().unwrap().orphaned_lines, 0);
        }
    }

    /// Orphans are invisible to readers and defragmentation removes exactly them.
    #[test]
    fn defragment_removes_only_orphans(
        (identities, secrets) in vault_plan(),
        positions in prop::collection::vec(0usize..64, 0..6)
    ) {
        let crypto = Arc::new(MockCrypto::new());
        let vault = build(&crypto, identities, &secrets);

        let dir = tempdir().unwrap();
        let path = dir.path().join("prop.vault");
        write(&path, &crypto, &vault, LATEST_FORMAT_VERSION);
        let clean = fs::read(&path).unwrap();

        inject_orphans(&path, &positions);

        let mut m = reload(&path, &crypto);
        prop_assert_eq!(m.vault().unwrap(), &vault);
        prop_assert_eq!(m.fragmentation_stats().unwrap().orphaned_lines, positions.len());

        prop_assert_eq!(m.defragment().unwrap(), positions.len());
        prop_assert_eq!(fs::read(&path).unwrap(), clean);
        prop_assert_eq!(m.vault().unwrap(), &vault);
    }

    /// Appends on top of a fragmented file keep the header consistent and
    /// leave the orphans in place.
    #[test]
    fn header_stays_consistent_across_appends(
        (identities, secrets) in vault_plan(),
        positions in prop::collection::vec(0usize..64, 0..4),
        steps in prop::collection::vec(step(), 1..12)
    ) {
        let crypto = Arc::new(MockCrypto::new());
        let vault = build(&crypto, identities, &secrets);

        let dir = tempdir().unwrap();
        let path = dir.path().join("prop.vault");
        write(&path, &crypto, &vault, LATEST_FORMAT_VERSION);
        inject_orphans(&path, &positions);

        let mut m = reload(&path, &crypto);
        for (i, step) in steps.iter().enumerate() {
            apply(&mut m, &crypto, step, 1000 + i as i64)?;
            check_header(&path)?;
        }
        prop_assert_eq!(m.fragmentation_stats().unwrap().orphaned_lines, positions.len());

        let expected = m.vault().unwrap().clone();
        m.unlock().unwrap();
        let m = reload(&path, &crypto);
        prop_assert_eq!(m.vault().unwrap(), &expected);
    }
}
