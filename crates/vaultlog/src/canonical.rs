//! Canonical encoding
//!
//! The canonical string of an entity is what gets hashed and signed. It is a
//! type tag followed by a fixed list of fields joined by the ASCII unit
//! separator. It never depends on the on-disk format version, so migrating a
//! vault keeps every hash and signature valid.

use crate::model::{Identity, Secret, SecretValue};
use chrono::{DateTime, SecondsFormat, Utc};

const SEP: char = '\u{1f}';

/// Fixed-precision UTC timestamp form, e.g. `2024-01-02T03:04:05.000000000Z`
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Parse a timestamp written by [`format_timestamp`] (any RFC 3339 form is accepted)
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Serde adapter writing timestamps in the canonical form
pub(crate) mod ts {
    use chrono::{DateTime, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_timestamp(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(d)?;
        super::parse_timestamp(&s)
            .ok_or_else(|| de::Error::custom(format!("invalid timestamp: {}", s)))
    }
}

/// Same as [`ts`] for optional timestamps
pub(crate) mod ts_option {
    use chrono::{DateTime, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
        match ts {
            Some(ts) => s.serialize_str(&super::format_timestamp(ts)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<String>::deserialize(d)? {
            Some(s) => super::parse_timestamp(&s)
                .map(Some)
                .ok_or_else(|| de::Error::custom(format!("invalid timestamp: {}", s))),
            None => Ok(None),
        }
    }
}

fn join(tag: &str, fields: &[&str]) -> String {
    let mut out = String::with_capacity(tag.len() + fields.iter().map(|f| f.len() + 1).sum::<usize>());
    out.push_str(tag);
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(SEP);
        }
        out.push_str(field);
    }
    out
}

pub fn identity(identity: &Identity) -> String {
    let bit_length = identity.bit_length.to_string();
    let created_at = format_timestamp(&identity.created_at);
    let expires_at = identity
        .expires_at
        .as_ref()
        .map(format_timestamp)
        .unwrap_or_default();
    let public_key = hex::encode(&identity.public_key);
    let added_at = format_timestamp(&identity.added_at);

    join(
        "identity:",
        &[
            &identity.fingerprint,
            &identity.uid,
            &identity.algorithm,
            &bit_length,
            identity.curve.as_deref().unwrap_or(""),
            &created_at,
            &expires_at,
            &public_key,
            &added_at,
            &identity.signed_by,
        ],
    )
}

pub fn secret(secret: &Secret) -> String {
    secret_definition(&secret.key, &secret.added_at, &secret.signed_by)
}

pub(crate) fn secret_definition(key: &str, added_at: &DateTime<Utc>, signed_by: &str) -> String {
    join("secret:", &[key, &format_timestamp(added_at), signed_by])
}

/// Canonical form of a value; `key` is the owning secret, which binds the
/// value to it.
pub fn value(key: &str, value: &SecretValue) -> String {
    let mut available_to: Vec<&str> = value.available_to.iter().map(String::as_str).collect();
    available_to.sort_unstable();

    join(
        "value:",
        &[
            key,
            &format_timestamp(&value.added_at),
            &available_to.join(","),
            &hex::encode(&value.payload),
            if value.deleted { "true" } else { "false" },
            &value.signed_by,
        ],
    )
}
