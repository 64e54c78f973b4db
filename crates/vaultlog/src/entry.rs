//! Entry codec
//!
//! Every line after the header holds exactly one entry: an identity, a secret
//! definition, or a secret value. A line is self-describing and can be parsed
//! on its own, without looking at its neighbours.
//!
//! Layouts:
//! - version 1: `<tag> <subject> <json>`; the subject is the fingerprint or
//!   secret key and is not repeated in the JSON body; `available_to` is one
//!   comma-joined string
//! - version 2: one JSON object with a `"type"` field; values carry their
//!   owning key in `"secret"`

use crate::canonical::ts;
use crate::model::{Identity, SecretValue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Why a line could not be decoded
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct EntryError(String);

impl EntryError {
    fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Entry type marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Identity,
    Secret,
    Value,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Identity => "identity",
            EntryKind::Secret => "secret",
            EntryKind::Value => "value",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "identity" => Some(EntryKind::Identity),
            "secret" => Some(EntryKind::Secret),
            "value" => Some(EntryKind::Value),
            _ => None,
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The signed part of a secret, without its values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretDefinition {
    pub key: String,
    #[serde(with = "ts")]
    pub added_at: DateTime<Utc>,
    pub hash: String,
    pub signature: String,
    pub signed_by: String,
}

/// One decoded line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Identity(Identity),
    Secret(SecretDefinition),
    Value { secret: String, value: SecretValue },
}

#[derive(Serialize, Deserialize)]
struct ValueRecord {
    secret: String,
    #[serde(with = "ts")]
    added_at: DateTime<Utc>,
    available_to: Vec<String>,
    #[serde(with = "hex")]
    payload: Vec<u8>,
    #[serde(default)]
    deleted: bool,
    hash: String,
    signature: String,
    signed_by: String,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Record {
    Identity(Identity),
    Secret(SecretDefinition),
    Value(ValueRecord),
}

impl Entry {
    pub fn kind(&self) -> EntryKind {
        match self {
            Entry::Identity(_) => EntryKind::Identity,
            Entry::Secret(_) => EntryKind::Secret,
            Entry::Value { .. } => EntryKind::Value,
        }
    }

    /// Fingerprint for identities, secret key for definitions and values
    pub fn subject(&self) -> &str {
        match self {
            Entry::Identity(identity) => &identity.fingerprint,
            Entry::Secret(def) => &def.key,
            Entry::Value { secret, .. } => secret,
        }
    }

    fn to_record(&self) -> Record {
        match self {
            Entry::Identity(identity) => Record::Identity(identity.clone()),
            Entry::Secret(def) => Record::Secret(def.clone()),
            Entry::Value { secret, value } => Record::Value(ValueRecord {
                secret: secret.clone(),
                added_at: value.added_at,
                available_to: value.available_to.clone(),
                payload: value.payload.clone(),
                deleted: value.deleted,
                hash: value.hash.clone(),
                signature: value.signature.clone(),
                signed_by: value.signed_by.clone(),
            }),
        }
    }

    fn from_record(record: Record) -> Self {
        match record {
            Record::Identity(identity) => Entry::Identity(identity),
            Record::Secret(def) => Entry::Secret(def),
            Record::Value(r) => Entry::Value {
                secret: r.secret,
                value: SecretValue {
                    added_at: r.added_at,
                    available_to: r.available_to,
                    payload: r.payload,
                    deleted: r.deleted,
                    hash: r.hash,
                    signature: r.signature,
                    signed_by: r.signed_by,
                },
            },
        }
    }

    /// Encode as a single line (no trailing newline) in the layout of `version`
    pub fn encode(&self, version: u32) -> Result<String, EntryError> {
        let record = self.to_record();
        let line = match version {
            1 => encode_v1(self.kind(), self.subject(), &record)?,
            2 => serde_json::to_string(&record).map_err(|e| EntryError::new(e.to_string()))?,
            v => return Err(EntryError::new(format!("no entry layout for version {}", v))),
        };
        debug_assert!(!line.contains('\n'));
        Ok(line)
    }

    /// Decode one line written in the layout of `version`
    pub fn parse(line: &str, version: u32) -> Result<Self, EntryError> {
        let record = match version {
            1 => parse_v1(line)?,
            2 => parse_v2(line)?,
            v => return Err(EntryError::new(format!("no entry layout for version {}", v))),
        };
        Ok(Self::from_record(record))
    }
}

fn parse_v2(line: &str) -> Result<Record, EntryError> {
    let object: Map<String, Value> =
        serde_json::from_str(line).map_err(|e| EntryError::new(format!("invalid entry: {}", e)))?;

    match object.get("type").and_then(Value::as_str) {
        Some(tag) if EntryKind::from_str(tag).is_some() => {}
        Some(tag) => return Err(EntryError::new(format!("unknown entry type '{}'", tag))),
        None => return Err(EntryError::new("entry has no type")),
    }

    serde_json::from_value(Value::Object(object))
        .map_err(|e| EntryError::new(format!("invalid entry: {}", e)))
}

fn subject_field(kind: EntryKind) -> &'static str {
    match kind {
        EntryKind::Identity => "fingerprint",
        EntryKind::Secret => "key",
        EntryKind::Value => "secret",
    }
}

fn encode_v1(kind: EntryKind, subject: &str, record: &Record) -> Result<String, EntryError> {
    if subject.is_empty() || subject.contains(char::is_whitespace) {
        return Err(EntryError::new(format!("subject '{}' cannot be written in version 1", subject)));
    }

    let Value::Object(mut body) =
        serde_json::to_value(record).map_err(|e| EntryError::new(e.to_string()))?
    else {
        return Err(EntryError::new("entry did not encode to an object"));
    };
    body.remove("type");
    body.remove(subject_field(kind));

    if let Some(Value::Array(list)) = body.remove("available_to") {
        let joined: Vec<&str> = list.iter().filter_map(Value::as_str).collect();
        body.insert("available_to".to_string(), Value::String(joined.join(",")));
    }

    let json = serde_json::to_string(&body).map_err(|e| EntryError::new(e.to_string()))?;
    Ok(format!("{} {} {}", kind, subject, json))
}

fn parse_v1(line: &str) -> Result<Record, EntryError> {
    let mut parts = line.splitn(3, ' ');
    let (Some(tag), Some(subject), Some(json)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(EntryError::new("expected '<type> <subject> <json>'"));
    };

    let kind = EntryKind::from_str(tag)
        .ok_or_else(|| EntryError::new(format!("unknown entry type '{}'", tag)))?;

    let mut body: Map<String, Value> =
        serde_json::from_str(json).map_err(|e| EntryError::new(format!("invalid entry: {}", e)))?;

    body.insert("type".to_string(), Value::String(kind.as_str().to_string()));
    body.insert(subject_field(kind).to_string(), Value::String(subject.to_string()));

    if kind == EntryKind::Value {
        let joined = match body.remove("available_to") {
            Some(Value::String(s)) => s,
            None => String::new(),
            Some(_) => return Err(EntryError::new("available_to must be a string")),
        };
        let list: Vec<Value> = joined
            .split(',')
            .filter(|fp| !fp.is_empty())
            .map(|fp| Value::String(fp.to_string()))
            .collect();
        body.insert("available_to".to_string(), Value::Array(list));
    }

    serde_json::from_value(Value::Object(body))
        .map_err(|e| EntryError::new(format!("invalid entry: {}", e)))
}
