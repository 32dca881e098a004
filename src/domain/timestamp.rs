//! Timestamp decoding for the state file
//!
//! Timestamps are written as RFC 3339. Hand-edited files and external
//! maintenance scripts also leave naive ISO datetimes behind; those are
//! read as UTC.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parse RFC 3339, falling back to a naive datetime taken as UTC
pub fn parse_utc(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_utc(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
}

/// Optional timestamp; an unreadable value becomes `None`
pub fn deserialize_option<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.filter(|v| !v.is_null()).and_then(|raw| {
        let parsed = raw.as_str().and_then(parse_utc);
        if parsed.is_none() {
            warn!(value = %raw, "ignoring unreadable timestamp");
        }
        parsed
    }))
}

/// Keyed timestamps; unreadable entries are dropped
pub fn deserialize_map<'de, D>(
    deserializer: D,
) -> Result<BTreeMap<String, DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, Value>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .filter_map(|(key, value)| {
            let parsed = value.as_str().and_then(parse_utc);
            if parsed.is_none() {
                warn!(key = %key, value = %value, "ignoring unreadable timestamp");
            }
            parsed.map(|at| (key, at))
        })
        .collect())
}
