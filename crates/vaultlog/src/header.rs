//! Header index
//!
//! File layout:
//!
//! ```text
//! line 1   #!vaultlog
//! line 2   {"version":2,"identities":{FP:line},"secrets":{KEY:{"definition":line,"values":[line,..]}}}
//! line 3   #---
//! line 4+  one entry per line
//! ```
//!
//! The header is the only place that knows where an entity lives; entries
//! never record their own line number. Lines the header does not reference
//! are orphans and are dropped by defragmentation.

use crate::entry::EntryKind;
use crate::error::{Result, VaultError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;

/// First line of every vault file
pub const FILE_MARKER: &str = "#!vaultlog";

/// Line separating the header from the entries
pub const DATA_MARKER: &str = "#---";

/// Oldest format version readers accept
pub const MIN_SUPPORTED_VERSION: u32 = 1;

/// Format version writers emit by default
pub const LATEST_FORMAT_VERSION: u32 = 2;

/// Physical (1-based) line number of the first entry
pub const FIRST_ENTRY_LINE: usize = 4;

/// A header that does not describe a well-formed file
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct HeaderError(String);

/// Where one secret lives
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretIndex {
    pub definition: usize,
    #[serde(default)]
    pub values: Vec<usize>,
}

/// The index line of a vault file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub version: u32,
    #[serde(default)]
    pub identities: BTreeMap<String, usize>,
    #[serde(default)]
    pub secrets: BTreeMap<String, SecretIndex>,
}

#[derive(Deserialize)]
struct VersionProbe {
    version: u32,
}

/// Fail with `UnsupportedVersion` outside `[MIN_SUPPORTED_VERSION, LATEST_FORMAT_VERSION]`
pub fn check_supported(version: u32) -> Result<()> {
    if (MIN_SUPPORTED_VERSION..=LATEST_FORMAT_VERSION).contains(&version) {
        Ok(())
    } else {
        Err(VaultError::UnsupportedVersion {
            found: version,
            min: MIN_SUPPORTED_VERSION,
            max: LATEST_FORMAT_VERSION,
        })
    }
}

/// Read only the version field of a header line
pub fn probe_version(line: &str) -> std::result::Result<u32, HeaderError> {
    serde_json::from_str::<VersionProbe>(line)
        .map(|p| p.version)
        .map_err(|e| HeaderError(format!("unreadable header: {}", e)))
}

impl Header {
    pub fn new(version: u32) -> Self {
        Self {
            version,
            identities: BTreeMap::new(),
            secrets: BTreeMap::new(),
        }
    }

    pub fn parse(line: &str) -> std::result::Result<Self, HeaderError> {
        serde_json::from_str(line).map_err(|e| HeaderError(format!("unreadable header: {}", e)))
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// What each referenced line must contain: entry type and subject
    /// (fingerprint or owning secret key)
    pub fn expectations(&self) -> BTreeMap<usize, (EntryKind, &str)> {
        let mut out = BTreeMap::new();
        for (fp, &line) in &self.identities {
            out.insert(line, (EntryKind::Identity, fp.as_str()));
        }
        for (key, index) in &self.secrets {
            out.insert(index.definition, (EntryKind::Secret, key.as_str()));
            for &line in &index.values {
                out.insert(line, (EntryKind::Value, key.as_str()));
            }
        }
        out
    }

    /// Check line references against a file of `total_lines` physical lines:
    /// every reference in range and unique, value lines strictly ascending.
    pub fn validate_layout(&self, total_lines: usize) -> std::result::Result<(), HeaderError> {
        let mut seen = BTreeSet::new();
        let mut claim = |line: usize, what: &str| -> std::result::Result<(), HeaderError> {
            if line < FIRST_ENTRY_LINE || line > total_lines {
                return Err(HeaderError(format!(
                    "{} references line {} outside {}..={}",
                    what, line, FIRST_ENTRY_LINE, total_lines
                )));
            }
            if !seen.insert(line) {
                return Err(HeaderError(format!("line {} is referenced twice ({})", line, what)));
            }
            Ok(())
        };

        for (fp, &line) in &self.identities {
            claim(line, &format!("identity {}", fp))?;
        }

        for (key, index) in &self.secrets {
            claim(index.definition, &format!("secret {}", key))?;
            for &line in &index.values {
                claim(line, &format!("value of {}", key))?;
            }
            if index.values.windows(2).any(|w| w[0] >= w[1]) {
                return Err(HeaderError(format!(
                    "value lines of {} are not strictly ascending: {:?}",
                    key, index.values
                )));
            }
        }

        Ok(())
    }

    /// Copy of this header with every line number passed through `map`.
    /// Lines missing from `map` are kept as they are.
    pub fn renumbered(&self, map: &HashMap<usize, usize>) -> Self {
        let re = |line: usize| map.get(&line).copied().unwrap_or(line);
        Self {
            version: self.version,
            identities: self
                .identities
                .iter()
                .map(|(fp, &line)| (fp.clone(), re(line)))
                .collect(),
            secrets: self
                .secrets
                .iter()
                .map(|(key, index)| {
                    (
                        key.clone(),
                        SecretIndex {
                            definition: re(index.definition),
                            values: index.values.iter().map(|&l| re(l)).collect(),
                        },
                    )
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> Header {
        let mut h = Header::new(LATEST_FORMAT_VERSION);
        h.identities.insert("AAA".to_string(), 4);
        h.secrets.insert(
            "db/password".to_string(),
            SecretIndex {
                definition: 5,
                values: vec![6, 8],
            },
        );
        h
    }

    #[test]
    fn test_encode_parse() {
        let h = header();
        let line = h.encode().unwrap();
        assert_eq!(
            line,
            r#"{"version":2,"identities":{"AAA":4},"secrets":{"db/password":{"definition":5,"values":[6,8]}}}"#
        );
        assert_eq!(Header::parse(&line).unwrap(), h);
        assert_eq!(probe_version(&line).unwrap(), 2);
    }

    #[test]
    fn test_probe_ignores_rest() {
        assert_eq!(probe_version(r#"{"version":7,"whatever":[1,2]}"#).unwrap(), 7);
        assert!(probe_version("not json").is_err());
        assert!(probe_version(r#"{"identities":{}}"#).is_err());
    }

    #[test]
    fn test_check_supported() {
        assert!(check_supported(MIN_SUPPORTED_VERSION).is_ok());
        assert!(check_supported(LATEST_FORMAT_VERSION).is_ok());
        assert!(matches!(
            check_supported(LATEST_FORMAT_VERSION + 1),
            Err(VaultError::UnsupportedVersion { found: 3, .. })
        ));
        assert!(check_supported(0).is_err());
    }

    #[test]
    fn test_valid_layout() {
        let h = header();
        h.validate_layout(8).unwrap();
        assert_eq!(h.expectations().into_keys().collect::<Vec<_>>(), vec![4, 5, 6, 8]);
    }

    #[test]
    fn test_out_of_range() {
        let h = header();
        assert!(h.validate_layout(7).is_err());

        let mut h = header();
        h.identities.insert("BBB".to_string(), 3);
        assert!(h.validate_layout(8).is_err());
    }

    #[test]
    fn test_duplicate_reference() {
        let mut h = header();
        h.identities.insert("BBB".to_string(), 6);
        let err = h.validate_layout(8).unwrap_err();
        assert!(err.to_string().contains("referenced twice"));
    }

    #[test]
    fn test_values_must_ascend() {
        let mut h = header();
        h.secrets.get_mut("db/password").unwrap().values = vec![8, 6];
        let err = h.validate_layout(8).unwrap_err();
        assert!(err.to_string().contains("strictly ascending"));
    }

    #[test]
    fn test_expectations() {
        let h = header();
        let exp = h.expectations();
        assert_eq!(exp[&4], (EntryKind::Identity, "AAA"));
        assert_eq!(exp[&5], (EntryKind::Secret, "db/password"));
        assert_eq!(exp[&8], (EntryKind::Value, "db/password"));
    }

    #[test]
    fn test_renumbered() {
        let h = header();
        let map: HashMap<usize, usize> = [(8, 7)].into_iter().collect();
        let r = h.renumbered(&map);
        assert_eq!(r.secrets["db/password"].values, vec![6, 7]);
        assert_eq!(r.identities["AAA"], 4);
    }
}
