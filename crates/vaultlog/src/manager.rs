//! Vault manager - owns one vault file
//!
//! Lifecycle: `Unopened -> Open (locked, loaded) -> Closed`. Every write is an
//! atomic rewrite of the whole file: the new content goes to a temporary file
//! in the same directory, is synced, then renamed over the vault. Readers
//! never see a half-written file.

use crate::access::{self, Access, AccessMode};
use crate::crypto::Crypto;
use crate::entry::{Entry, EntryKind, SecretDefinition};
use crate::error::{Result, VaultError};
use crate::header::{
    check_supported, probe_version, Header, SecretIndex, DATA_MARKER, FILE_MARKER,
    FIRST_ENTRY_LINE, LATEST_FORMAT_VERSION,
};
use crate::integrity;
use crate::lock::VaultLock;
use crate::model::{normalize_fingerprint, normalize_key, normalize_recipients, Identity, Secret, SecretValue, Vault};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Orphan ratio above which defragmentation is recommended
pub const DEFAULT_DEFRAG_THRESHOLD: f64 = 0.25;

/// How a manager opens and persists its vault
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerOptions {
    /// Start an empty vault when the file does not exist
    pub create: bool,
    /// Persist every append immediately; otherwise stage until `save()`
    pub autosave: bool,
    pub defrag_threshold: f64,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            create: true,
            autosave: true,
            defrag_threshold: DEFAULT_DEFRAG_THRESHOLD,
        }
    }
}

/// Whether `load` verifies hashes and signatures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    Verify,
    /// Structure and parsing only, for diagnostics
    ParseOnly,
}

/// Orphaned vs referenced entry lines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentationStats {
    pub total_lines: usize,
    pub referenced_lines: usize,
    pub orphaned_lines: usize,
    pub ratio: f64,
    pub recommend_defrag: bool,
}

/// What a referenced entry line holds
#[derive(Debug, Clone, PartialEq, Eq)]
enum Referent {
    Identity(String),
    Secret(String),
    /// A value of the named secret
    Value(String),
}

impl Referent {
    fn new(kind: EntryKind, subject: &str) -> Self {
        match kind {
            EntryKind::Identity => Referent::Identity(subject.to_string()),
            EntryKind::Secret => Referent::Secret(subject.to_string()),
            EntryKind::Value => Referent::Value(subject.to_string()),
        }
    }
}

/// One physical entry line; orphans have no referent
#[derive(Debug, Clone)]
struct Line {
    text: String,
    referent: Option<Referent>,
}

/// In-memory image of a vault file
#[derive(Debug, Clone)]
struct Document {
    version: u32,
    /// Entry lines; index `i` is physical line `FIRST_ENTRY_LINE + i`
    lines: Vec<Line>,
    vault: Vault,
}

impl Document {
    fn empty(version: u32) -> Self {
        Self {
            version,
            lines: Vec::new(),
            vault: Vault::new(),
        }
    }

    fn version(&self) -> u32 {
        self.version
    }

    /// Encode `entry` at the end of the file
    fn push(&mut self, path: &Path, entry: &Entry) -> Result<()> {
        let text = entry.encode(self.version).map_err(|e| {
            VaultError::corrupt(path, format!("cannot encode {} {}: {}", entry.kind(), entry.subject(), e))
        })?;
        self.lines.push(Line {
            text,
            referent: Some(Referent::new(entry.kind(), entry.subject())),
        });
        Ok(())
    }

    fn push_value(&mut self, path: &Path, key: &str, value: &SecretValue) -> Result<()> {
        self.push(
            path,
            &Entry::Value {
                secret: key.to_string(),
                value: value.clone(),
            },
        )
    }

    fn push_secret(&mut self, path: &Path, secret: &Secret) -> Result<()> {
        self.push(path, &Entry::Secret(definition_of(secret)))?;
        for value in &secret.values {
            self.push_value(path, &secret.key, value)?;
        }
        Ok(())
    }

    fn push_identity(&mut self, path: &Path, identity: &Identity) -> Result<()> {
        self.push(path, &Entry::Identity(identity.clone()))
    }

    /// Index every referenced line, computed from the lines on each call
    fn header(&self) -> Header {
        let mut header = Header::new(self.version);
        for (i, line) in self.lines.iter().enumerate() {
            let line_no = FIRST_ENTRY_LINE + i;
            match &line.referent {
                Some(Referent::Identity(fp)) => {
                    header.identities.insert(fp.clone(), line_no);
                }
                Some(Referent::Secret(key)) => {
                    header.secrets.entry(key.clone()).or_default().definition = line_no;
                }
                Some(Referent::Value(key)) => {
                    header.secrets.entry(key.clone()).or_default().values.push(line_no);
                }
                None => {}
            }
        }
        header
    }

    /// Lay out `vault` from scratch: identities first, then each secret's
    /// definition followed by its values.
    fn from_vault(path: &Path, vault: &Vault, version: u32) -> Result<Self> {
        let mut doc = Self::empty(version);
        let mut fingerprints = HashSet::new();
        for (i, identity) in vault.identities.iter().enumerate() {
            if !fingerprints.insert(identity.fingerprint.as_str()) {
                return Err(VaultError::IdentityExists(identity.fingerprint.clone()));
            }
            if i > 0 && identity.added_at < vault.identities[i - 1].added_at {
                return Err(VaultError::OutOfOrder {
                    entity: format!("identity {}", identity.fingerprint),
                });
            }
            doc.push_identity(path, identity)?;
        }
        let mut keys = HashSet::new();
        for secret in &vault.secrets {
            if !keys.insert(secret.key.as_str()) {
                return Err(VaultError::SecretExists(secret.key.clone()));
            }
            doc.push_secret(path, secret)?;
        }
        doc.vault = vault.clone();
        Ok(doc)
    }

    /// Validate and decode file content
    fn parse(path: &Path, content: &str) -> Result<Self> {
        let all: Vec<&str> = content.lines().collect();

        if all.first() != Some(&FILE_MARKER) {
            return Err(VaultError::corrupt(path, "missing vault file marker on line 1"));
        }
        let header_line = all
            .get(1)
            .ok_or_else(|| VaultError::corrupt(path, "missing header on line 2"))?;
        let version = probe_version(header_line).map_err(|e| VaultError::corrupt(path, e.to_string()))?;
        check_supported(version)?;
        let header = Header::parse(header_line).map_err(|e| VaultError::corrupt(path, e.to_string()))?;

        if all.get(2) != Some(&DATA_MARKER) {
            return Err(VaultError::corrupt(path, "missing data marker on line 3"));
        }

        header
            .validate_layout(all.len())
            .map_err(|e| VaultError::corrupt(path, e.to_string()))?;

        let expectations = header.expectations();
        let mut identities: Vec<Identity> = Vec::new();
        let mut definitions: HashMap<String, SecretDefinition> = HashMap::new();
        let mut values: HashMap<String, Vec<SecretValue>> = HashMap::new();

        for (&line_no, &(kind, subject)) in &expectations {
            let entry = Entry::parse(all[line_no - 1], version)
                .map_err(|e| VaultError::corrupt(path, format!("line {}: {}", line_no, e)))?;

            if entry.kind() != kind || entry.subject() != subject {
                return Err(VaultError::corrupt(
                    path,
                    format!(
                        "line {}: header expects {} {}, found {} {}",
                        line_no,
                        kind,
                        subject,
                        entry.kind(),
                        entry.subject()
                    ),
                ));
            }

            // expectations iterate in line order, so values arrive ascending
            match entry {
                Entry::Identity(identity) => {
                    if let Some(previous) = identities.last() {
                        if identity.added_at < previous.added_at {
                            return Err(VaultError::corrupt(
                                path,
                                format!(
                                    "line {}: identity {} predates identity {}",
                                    line_no, identity.fingerprint, previous.fingerprint
                                ),
                            ));
                        }
                    }
                    identities.push(identity);
                }
                Entry::Secret(def) => {
                    definitions.insert(def.key.clone(), def);
                }
                Entry::Value { secret, value } => {
                    if value.available_to.windows(2).any(|w| w[0] >= w[1]) {
                        return Err(VaultError::corrupt(
                            path,
                            format!("line {}: available_to of {} is not sorted and unique", line_no, secret),
                        ));
                    }
                    values.entry(secret).or_default().push(value);
                }
            }
        }

        let mut by_definition: Vec<(&String, &SecretIndex)> = header.secrets.iter().collect();
        by_definition.sort_by_key(|(_, index)| index.definition);

        let mut secrets = Vec::with_capacity(by_definition.len());
        for (key, _) in by_definition {
            let def = definitions
                .remove(key)
                .ok_or_else(|| VaultError::corrupt(path, format!("secret {} has no definition", key)))?;
            secrets.push(Secret {
                key: def.key,
                added_at: def.added_at,
                hash: def.hash,
                signature: def.signature,
                signed_by: def.signed_by,
                values: values.remove(key).unwrap_or_default(),
            });
        }

        let lines = all
            .iter()
            .enumerate()
            .skip(FIRST_ENTRY_LINE - 1)
            .map(|(i, text)| Line {
                text: text.to_string(),
                referent: expectations
                    .get(&(i + 1))
                    .map(|&(kind, subject)| Referent::new(kind, subject)),
            })
            .collect();

        Ok(Self {
            version,
            lines,
            vault: Vault { identities, secrets },
        })
    }

    fn render(&self) -> Result<String> {
        let header = self.header().encode()?;
        let size = self.lines.iter().map(|l| l.text.len() + 1).sum::<usize>() + header.len() + 32;
        let mut out = String::with_capacity(size);
        out.push_str(FILE_MARKER);
        out.push('\n');
        out.push_str(&header);
        out.push('\n');
        out.push_str(DATA_MARKER);
        out.push('\n');
        for line in &self.lines {
            out.push_str(&line.text);
            out.push('\n');
        }
        Ok(out)
    }

    fn fragmentation(&self, threshold: f64) -> FragmentationStats {
        let total_lines = self.lines.len();
        let referenced_lines = self.lines.iter().filter(|l| l.referent.is_some()).count();
        let orphaned_lines = total_lines - referenced_lines;
        let ratio = if total_lines == 0 {
            0.0
        } else {
            orphaned_lines as f64 / total_lines as f64
        };
        FragmentationStats {
            total_lines,
            referenced_lines,
            orphaned_lines,
            ratio,
            recommend_defrag: ratio > threshold,
        }
    }
}

fn definition_of(secret: &Secret) -> SecretDefinition {
    SecretDefinition {
        key: secret.key.clone(),
        added_at: secret.added_at,
        hash: secret.hash.clone(),
        signature: secret.signature.clone(),
        signed_by: secret.signed_by.clone(),
    }
}

/// Write `content` to a temp file next to `path`, sync, and rename it over `path`
fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "vault".to_string());
    let tmp_path = dir.join(format!(".{}.tmp.{}", name, std::process::id()));

    let result = (|| -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&tmp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp_path, path)?;
        File::open(&dir)?.sync_all()?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

enum Stage {
    Unopened,
    Open {
        _lock: VaultLock,
        doc: Option<Document>,
    },
    Closed,
}

/// Owner of a single vault file
pub struct VaultManager {
    path: PathBuf,
    crypto: Arc<dyn Crypto>,
    options: ManagerOptions,
    stage: Stage,
    dirty: bool,
}

impl VaultManager {
    /// Create an unopened manager for `path`
    pub fn new(path: impl Into<PathBuf>, crypto: Arc<dyn Crypto>) -> Self {
        Self::with_options(path, crypto, ManagerOptions::default())
    }

    pub fn with_options(path: impl Into<PathBuf>, crypto: Arc<dyn Crypto>, options: ManagerOptions) -> Self {
        Self {
            path: path.into(),
            crypto,
            options,
            stage: Stage::Unopened,
            dirty: false,
        }
    }

    /// Lock and fully load (with verification) in one step
    pub fn open(path: impl Into<PathBuf>, crypto: Arc<dyn Crypto>, options: ManagerOptions) -> Result<Self> {
        let mut manager = Self::with_options(path, crypto, options);
        manager.open_and_lock()?;
        manager.load()?;
        Ok(manager)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &ManagerOptions {
        &self.options
    }

    /// Take the exclusive lock. A missing file becomes an empty vault at the
    /// latest version (unless `create` is off).
    pub fn open_and_lock(&mut self) -> Result<()> {
        match self.stage {
            Stage::Unopened => {}
            Stage::Open { .. } => return Ok(()),
            Stage::Closed => return Err(VaultError::NotOpen),
        }

        let lock = VaultLock::acquire(&self.path)?;
        let doc = if self.path.exists() {
            None
        } else if self.options.create {
            debug!(path = %self.path.display(), "vault does not exist yet, starting empty");
            Some(Document::empty(LATEST_FORMAT_VERSION))
        } else {
            return Err(VaultError::VaultNotFound(self.path.clone()));
        };

        self.stage = Stage::Open { _lock: lock, doc };
        Ok(())
    }

    /// Read, validate and verify the whole file
    pub fn load(&mut self) -> Result<()> {
        self.load_with(LoadMode::Verify)
    }

    /// Read and validate structure without checking hashes or signatures
    pub fn load_parse_only(&mut self) -> Result<()> {
        self.load_with(LoadMode::ParseOnly)
    }

    pub fn load_with(&mut self, mode: LoadMode) -> Result<()> {
        let Stage::Open { doc, .. } = &mut self.stage else {
            return Err(VaultError::NotOpen);
        };

        if !self.path.exists() {
            if doc.is_none() {
                *doc = Some(Document::empty(LATEST_FORMAT_VERSION));
            }
            return Ok(());
        }

        let content = fs::read_to_string(&self.path)?;
        let parsed = Document::parse(&self.path, &content)?;

        if mode == LoadMode::Verify {
            integrity::verify_vault(self.crypto.as_ref(), &parsed.vault)?;
        }

        debug!(
            path = %self.path.display(),
            version = parsed.version(),
            identities = parsed.vault.identities.len(),
            secrets = parsed.vault.secrets.len(),
            verified = mode == LoadMode::Verify,
            "loaded vault"
        );

        *doc = Some(parsed);
        self.dirty = false;
        Ok(())
    }

    fn doc(&self) -> Result<&Document> {
        match &self.stage {
            Stage::Open { doc: Some(doc), .. } => Ok(doc),
            Stage::Open { doc: None, .. } => Err(VaultError::NotLoaded),
            Stage::Unopened | Stage::Closed => Err(VaultError::NotOpen),
        }
    }

    fn writable_doc(&self) -> Result<&Document> {
        let doc = self.doc()?;
        if doc.version() != LATEST_FORMAT_VERSION {
            return Err(VaultError::UpgradeRequired {
                found: doc.version(),
                latest: LATEST_FORMAT_VERSION,
            });
        }
        Ok(doc)
    }

    /// The materialized vault
    pub fn vault(&self) -> Result<&Vault> {
        Ok(&self.doc()?.vault)
    }

    /// Format version of the loaded file
    pub fn version(&self) -> Result<u32> {
        Ok(self.doc()?.version())
    }

    /// Header as it would be written for the current document
    pub fn header(&self) -> Result<Header> {
        Ok(self.doc()?.header())
    }

    pub fn needs_upgrade(&self) -> Result<bool> {
        Ok(self.version()? < LATEST_FORMAT_VERSION)
    }

    pub fn is_open(&self) -> bool {
        matches!(self.stage, Stage::Open { .. })
    }

    /// Whether staged appends have not been written yet
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn identity(&self, fingerprint: &str) -> Result<Option<&Identity>> {
        Ok(self.vault()?.identity(fingerprint))
    }

    /// `None` when absent; tombstoned secrets are returned as-is
    pub fn secret(&self, key: &str) -> Result<Option<&Secret>> {
        Ok(self.vault()?.secret(key))
    }

    /// The value `fingerprint` may read from `key` under `mode`
    pub fn accessible_value(&self, key: &str, fingerprint: &str, mode: AccessMode) -> Result<Access<'_>> {
        let secret = self
            .secret(key)?
            .ok_or_else(|| VaultError::SecretNotFound(key.to_string()))?;
        access::resolve(secret, fingerprint, mode)
    }

    pub fn set_autosave(&mut self, autosave: bool) {
        self.options.autosave = autosave;
    }

    /// Add a new identity. It must verify against the vault (or itself when
    /// self-signed) and must not predate the newest identity.
    pub fn append_identity(&mut self, identity: Identity) -> Result<()> {
        let doc = self.writable_doc()?;

        if normalize_fingerprint(&identity.fingerprint)? != identity.fingerprint {
            return Err(VaultError::InvalidFingerprint(identity.fingerprint));
        }
        if doc.vault.identity(&identity.fingerprint).is_some() {
            return Err(VaultError::IdentityExists(identity.fingerprint));
        }
        if let Some(last) = doc.vault.identities.last() {
            if identity.added_at < last.added_at {
                return Err(VaultError::OutOfOrder {
                    entity: format!("identity {}", identity.fingerprint),
                });
            }
        }
        integrity::verify_identity(self.crypto.as_ref(), &identity, &doc.vault)?;

        let mut next = doc.clone();
        next.push_identity(&self.path, &identity)?;
        info!(path = %self.path.display(), fingerprint = %identity.fingerprint, "appended identity");
        next.vault.identities.push(identity);
        self.commit(next)
    }

    /// Add a new secret together with its initial values
    pub fn append_secret(&mut self, secret: Secret) -> Result<()> {
        let doc = self.writable_doc()?;

        if normalize_key(&secret.key)? != secret.key {
            return Err(VaultError::InvalidKey(secret.key));
        }
        if doc.vault.secret(&secret.key).is_some() {
            return Err(VaultError::SecretExists(secret.key));
        }
        integrity::verify_secret(self.crypto.as_ref(), &secret, &doc.vault)?;

        let mut previous: Option<&SecretValue> = None;
        for value in &secret.values {
            self.check_value(&doc.vault, &secret.key, previous, value)?;
            previous = Some(value);
        }

        let mut next = doc.clone();
        next.push_secret(&self.path, &secret)?;
        info!(
            path = %self.path.display(),
            key = %secret.key,
            values = secret.values.len(),
            "appended secret"
        );
        next.vault.secrets.push(secret);
        self.commit(next)
    }

    /// Append a value to an existing, non-deleted secret
    pub fn append_secret_value(&mut self, key: &str, value: SecretValue) -> Result<()> {
        let doc = self.writable_doc()?;

        let secret = doc
            .vault
            .secret(key)
            .ok_or_else(|| VaultError::SecretNotFound(key.to_string()))?;
        self.check_value(&doc.vault, key, secret.current(), &value)?;

        let mut next = doc.clone();
        next.push_value(&self.path, key, &value)?;
        info!(
            path = %self.path.display(),
            key = %key,
            deleted = value.deleted,
            recipients = value.available_to.len(),
            "appended secret value"
        );
        next.vault
            .secret_mut(key)
            .ok_or_else(|| VaultError::SecretNotFound(key.to_string()))?
            .values
            .push(value);
        self.commit(next)
    }

    fn check_value(
        &self,
        vault: &Vault,
        key: &str,
        previous: Option<&SecretValue>,
        value: &SecretValue,
    ) -> Result<()> {
        let invalid = |reason: &str| VaultError::InvalidValue {
            key: key.to_string(),
            reason: reason.to_string(),
        };

        if let Some(previous) = previous {
            if previous.deleted {
                return Err(VaultError::SecretAlreadyDeleted(key.to_string()));
            }
            if value.added_at < previous.added_at {
                return Err(VaultError::OutOfOrder {
                    entity: format!("value of {}", key),
                });
            }
        }

        if normalize_recipients(&value.available_to)? != value.available_to {
            return Err(invalid("available_to must be normalized, sorted and unique"));
        }

        if value.deleted {
            if !value.available_to.is_empty() || !value.payload.is_empty() {
                return Err(invalid("a tombstone carries no recipients and no payload"));
            }
        } else if value.available_to.is_empty() {
            return Err(invalid("a value needs at least one recipient"));
        }

        for fp in &value.available_to {
            if vault.identity(fp).is_none() {
                return Err(VaultError::UnknownIdentity(fp.clone()));
            }
        }

        integrity::verify_value(self.crypto.as_ref(), key, value, vault)
    }

    /// Install `next` as the current document, writing it first when autosave is on
    fn commit(&mut self, next: Document) -> Result<()> {
        if self.options.autosave {
            self.persist(next)
        } else {
            self.replace(next)?;
            self.dirty = true;
            Ok(())
        }
    }

    /// Write `next` to disk, then install it. On failure the current
    /// document is left untouched.
    fn persist(&mut self, next: Document) -> Result<()> {
        write_atomic(&self.path, next.render()?.as_bytes())?;
        debug!(path = %self.path.display(), lines = next.lines.len(), "wrote vault");
        self.replace(next)?;
        self.dirty = false;
        Ok(())
    }

    fn replace(&mut self, next: Document) -> Result<()> {
        match &mut self.stage {
            Stage::Open { doc, .. } => {
                *doc = Some(next);
                Ok(())
            }
            _ => Err(VaultError::NotOpen),
        }
    }

    /// Write staged appends
    pub fn save(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let doc = self.doc()?.clone();
        self.persist(doc)
    }

    pub fn fragmentation_stats(&self) -> Result<FragmentationStats> {
        Ok(self.doc()?.fragmentation(self.options.defrag_threshold))
    }

    /// Drop every line the header does not reference and renumber the rest
    /// contiguously. Returns the number of lines removed.
    pub fn defragment(&mut self) -> Result<usize> {
        let mut next = self.doc()?.clone();
        let before = next.lines.len();
        next.lines.retain(|line| line.referent.is_some());
        let removed = before - next.lines.len();

        self.persist(next)?;
        info!(path = %self.path.display(), removed, "defragmented vault");
        Ok(removed)
    }

    /// Replace the file with `vault` laid out in the format of `version`.
    /// Used for migration; stored hashes and signatures are written as they are.
    pub fn rewrite_from_vault_with_version(&mut self, vault: &Vault, version: u32) -> Result<()> {
        check_supported(version)?;
        if !self.is_open() {
            return Err(VaultError::NotOpen);
        }

        let next = Document::from_vault(&self.path, vault, version)?;
        self.persist(next)?;
        info!(path = %self.path.display(), version, "rewrote vault");
        Ok(())
    }

    /// Migrate the file to the latest format version. Never called implicitly.
    /// Returns whether anything was rewritten.
    pub fn upgrade(&mut self) -> Result<bool> {
        let doc = self.doc()?;
        if doc.version() >= LATEST_FORMAT_VERSION {
            return Ok(false);
        }

        let from = doc.version();
        let vault = doc.vault.clone();
        self.rewrite_from_vault_with_version(&vault, LATEST_FORMAT_VERSION)?;
        info!(path = %self.path.display(), from, to = LATEST_FORMAT_VERSION, "upgraded vault");
        Ok(true)
    }

    /// Read only the header line of `path` and return its version.
    /// Does not take the lock or validate the rest of the file.
    pub fn detect_version(path: &Path) -> Result<u32> {
        let file = File::open(path)?;
        let mut lines = BufReader::new(file).lines();

        let marker = lines.next().transpose()?;
        if marker.as_deref() != Some(FILE_MARKER) {
            return Err(VaultError::corrupt(path, "missing vault file marker on line 1"));
        }
        let header = lines
            .next()
            .transpose()?
            .ok_or_else(|| VaultError::corrupt(path, "missing header on line 2"))?;

        probe_version(&header).map_err(|e| VaultError::corrupt(path, e.to_string()))
    }

    /// Flush staged appends and release the lock. The manager cannot be
    /// reopened afterwards.
    pub fn unlock(&mut self) -> Result<()> {
        if !self.is_open() {
            return Err(VaultError::NotOpen);
        }
        if self.dirty {
            self.save()?;
        }
        self.stage = Stage::Closed;
        debug!(path = %self.path.display(), "closed vault");
        Ok(())
    }

    /// Raw entry lines keyed by physical line number, for diagnostics
    pub fn raw_lines(&self) -> Result<BTreeMap<usize, &str>> {
        Ok(self
            .doc()?
            .lines
            .iter()
            .enumerate()
            .map(|(i, l)| (FIRST_ENTRY_LINE + i, l.text.as_str()))
            .collect())
    }
}

impl std::fmt::Debug for VaultManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stage = match &self.stage {
            Stage::Unopened => "unopened",
            Stage::Open { doc: None, .. } => "open",
            Stage::Open { doc: Some(_), .. } => "loaded",
            Stage::Closed => "closed",
        };
        f.debug_struct("VaultManager")
            .field("path", &self.path)
            .field("stage", &stage)
            .field("dirty", &self.dirty)
            .finish()
    }
}
