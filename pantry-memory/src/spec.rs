// Copyright 2026 pantry Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{fmt::Display, str::FromStr, time::Duration};

use itertools::Itertools;
use pantry_common::error::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::reference::Strength;

/// Leaf errors of the cache spec parser.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SpecError {
    /// A key appears twice, or two keys set the same option.
    #[error("{0} was already set")]
    Duplicate(&'static str),
    /// The key is not recognized.
    #[error("unknown key {0}")]
    UnknownKey(String),
    /// A key that needs a value has none.
    #[error("value of key {0} omitted")]
    MissingValue(String),
    /// A flag key was given a value.
    #[error("key {key} does not take values, got {value}")]
    UnexpectedValue {
        /// Flag key.
        key: String,
        /// Offending value.
        value: String,
    },
    /// The value of a key cannot be parsed.
    #[error("key {key} value set to {value}, {reason}")]
    InvalidValue {
        /// Key.
        key: String,
        /// Offending value.
        value: String,
        /// Parser message.
        reason: String,
    },
    /// A piece has more than one `=`.
    #[error("key-value pair {0} with more than one equals sign")]
    Malformed(String),
}

/// Cache configuration parsed from a descriptor string such as `maximumSize=200,expireAfterWrite=2m`.
///
/// Keys: `initialCapacity`, `maximumSize`, `maximumWeight`, `concurrencyLevel`, `weakKeys`, `softValues`,
/// `weakValues`, `recordStats`, `expireAfterAccess`, `expireAfterWrite` and `refreshAfterWrite` (alias
/// `refreshInterval`). Durations are [`humantime`] strings like `10s`, `2m`, `3d` or `500ms`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheSpec {
    /// Pre-sizing hint.
    pub initial_capacity: Option<usize>,
    /// Entry count bound.
    pub maximum_size: Option<usize>,
    /// Weight bound.
    pub maximum_weight: Option<usize>,
    /// Shard count hint.
    pub concurrency_level: Option<usize>,
    /// Key strength, only weak keys can be described.
    pub key_strength: Option<Strength>,
    /// Value strength.
    pub value_strength: Option<Strength>,
    /// Record statistics.
    pub record_stats: Option<bool>,
    /// Idle expiry window.
    pub expire_after_access: Option<Duration>,
    /// Write expiry window.
    pub expire_after_write: Option<Duration>,
    /// Refresh window.
    pub refresh_after_write: Option<Duration>,
}

impl CacheSpec {
    /// Parse a descriptor. The empty string describes the default cache.
    pub fn parse(spec: &str) -> Result<Self> {
        Self::parse_inner(spec).map_err(|e| Error::parse(spec, e))
    }

    fn parse_inner(spec: &str) -> std::result::Result<Self, SpecError> {
        let mut res = Self::default();

        for piece in spec.split(',').map(str::trim).filter(|piece| !piece.is_empty()) {
            let parts = piece.split('=').map(str::trim).collect_vec();
            let (key, value) = match parts.as_slice() {
                [key] => (*key, None),
                [key, value] => (*key, Some(*value)),
                _ => return Err(SpecError::Malformed(piece.to_string())),
            };

            match key {
                "initialCapacity" => set(&mut res.initial_capacity, "initialCapacity", integer(key, value)?)?,
                "maximumSize" => set(&mut res.maximum_size, "maximumSize", integer(key, value)?)?,
                "maximumWeight" => set(&mut res.maximum_weight, "maximumWeight", integer(key, value)?)?,
                "concurrencyLevel" => set(&mut res.concurrency_level, "concurrencyLevel", integer(key, value)?)?,
                "weakKeys" => set(&mut res.key_strength, "keyStrength", flag(key, value, Strength::Weak)?)?,
                "weakValues" => set(&mut res.value_strength, "valueStrength", flag(key, value, Strength::Weak)?)?,
                "softValues" => set(&mut res.value_strength, "valueStrength", flag(key, value, Strength::Soft)?)?,
                "recordStats" => set(&mut res.record_stats, "recordStats", flag(key, value, true)?)?,
                "expireAfterAccess" => set(&mut res.expire_after_access, "expireAfterAccess", duration(key, value)?)?,
                "expireAfterWrite" => set(&mut res.expire_after_write, "expireAfterWrite", duration(key, value)?)?,
                "refreshAfterWrite" | "refreshInterval" => {
                    set(&mut res.refresh_after_write, "refreshAfterWrite", duration(key, value)?)?
                }
                _ => return Err(SpecError::UnknownKey(key.to_string())),
            }
        }

        Ok(res)
    }

    /// Render a descriptor that parses back into `self`.
    pub fn to_spec_string(&self) -> String {
        let mut pieces = vec![];
        if let Some(v) = self.initial_capacity {
            pieces.push(format!("initialCapacity={v}"));
        }
        if let Some(v) = self.maximum_size {
            pieces.push(format!("maximumSize={v}"));
        }
        if let Some(v) = self.maximum_weight {
            pieces.push(format!("maximumWeight={v}"));
        }
        if let Some(v) = self.concurrency_level {
            pieces.push(format!("concurrencyLevel={v}"));
        }
        if self.key_strength == Some(Strength::Weak) {
            pieces.push("weakKeys".to_string());
        }
        match self.value_strength {
            Some(Strength::Weak) => pieces.push("weakValues".to_string()),
            Some(Strength::Soft) => pieces.push("softValues".to_string()),
            _ => {}
        }
        if self.record_stats == Some(true) {
            pieces.push("recordStats".to_string());
        }
        if let Some(v) = self.expire_after_write {
            pieces.push(format!("expireAfterWrite={}", humantime::format_duration(v)));
        }
        if let Some(v) = self.expire_after_access {
            pieces.push(format!("expireAfterAccess={}", humantime::format_duration(v)));
        }
        if let Some(v) = self.refresh_after_write {
            pieces.push(format!("refreshAfterWrite={}", humantime::format_duration(v)));
        }
        pieces.join(",")
    }
}

impl FromStr for CacheSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Display for CacheSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_spec_string())
    }
}

fn set<T>(slot: &mut Option<T>, name: &'static str, value: T) -> std::result::Result<(), SpecError> {
    if slot.is_some() {
        return Err(SpecError::Duplicate(name));
    }
    *slot = Some(value);
    Ok(())
}

fn required<'a>(key: &str, value: Option<&'a str>) -> std::result::Result<&'a str, SpecError> {
    match value {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(SpecError::MissingValue(key.to_string())),
    }
}

fn integer(key: &str, value: Option<&str>) -> std::result::Result<usize, SpecError> {
    let value = required(key, value)?;
    value.parse().map_err(|e: std::num::ParseIntError| SpecError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn duration(key: &str, value: Option<&str>) -> std::result::Result<Duration, SpecError> {
    let value = required(key, value)?;
    humantime::parse_duration(value).map_err(|e| SpecError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn flag<T>(key: &str, value: Option<&str>, set: T) -> std::result::Result<T, SpecError> {
    match value {
        None => Ok(set),
        Some(value) => Err(SpecError::UnexpectedValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use pantry_common::error::ErrorKind;

    use super::*;

    fn parse_err(spec: &str) -> SpecError {
        CacheSpec::parse_inner(spec).unwrap_err()
    }

    #[test]
    fn test_parse_empty() {
        assert_eq!(CacheSpec::parse("").unwrap(), CacheSpec::default());
        assert_eq!(CacheSpec::parse(" , ").unwrap(), CacheSpec::default());
    }

    #[test]
    fn test_parse_descriptor() {
        let spec: CacheSpec = "maximumSize=200,expireAfterWrite=2m".parse().unwrap();
        assert_eq!(spec.maximum_size, Some(200));
        assert_eq!(spec.expire_after_write, Some(Duration::from_secs(120)));
        assert_eq!(spec.expire_after_access, None);
    }

    #[test]
    fn test_parse_all_keys() {
        let spec = CacheSpec::parse(
            "initialCapacity=10, maximumWeight=1000, concurrencyLevel=8, weakKeys, softValues, recordStats, \
             expireAfterAccess=10s, expireAfterWrite=1h, refreshInterval=500ms",
        )
        .unwrap();
        assert_eq!(
            spec,
            CacheSpec {
                initial_capacity: Some(10),
                maximum_size: None,
                maximum_weight: Some(1000),
                concurrency_level: Some(8),
                key_strength: Some(Strength::Weak),
                value_strength: Some(Strength::Soft),
                record_stats: Some(true),
                expire_after_access: Some(Duration::from_secs(10)),
                expire_after_write: Some(Duration::from_secs(3600)),
                refresh_after_write: Some(Duration::from_millis(500)),
            }
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse_err("maximumSize=1,maximumSize=2"), SpecError::Duplicate("maximumSize"));
        assert_eq!(parse_err("weakValues,softValues"), SpecError::Duplicate("valueStrength"));
        assert_eq!(
            parse_err("refreshAfterWrite=1s,refreshInterval=2s"),
            SpecError::Duplicate("refreshAfterWrite")
        );
        assert_eq!(parse_err("strongKeys"), SpecError::UnknownKey("strongKeys".to_string()));
        assert_eq!(parse_err("maximumSize"), SpecError::MissingValue("maximumSize".to_string()));
        assert_eq!(parse_err("maximumSize="), SpecError::MissingValue("maximumSize".to_string()));
        assert_eq!(
            parse_err("weakKeys=true"),
            SpecError::UnexpectedValue {
                key: "weakKeys".to_string(),
                value: "true".to_string()
            }
        );
        assert!(matches!(parse_err("maximumSize=abc"), SpecError::InvalidValue { .. }));
        assert!(matches!(parse_err("maximumSize=-1"), SpecError::InvalidValue { .. }));
        assert!(matches!(parse_err("expireAfterWrite=10"), SpecError::InvalidValue { .. }));
        assert!(matches!(parse_err("expireAfterWrite=10x"), SpecError::InvalidValue { .. }));
        assert_eq!(
            parse_err("maximumSize=1=2"),
            SpecError::Malformed("maximumSize=1=2".to_string())
        );

        let err = CacheSpec::parse("maximumSize=abc").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
        assert!(err.downcast_ref::<SpecError>().is_some());
    }

    #[test]
    fn test_spec_string_round_trip() {
        for descriptor in [
            "maximumSize=200,expireAfterWrite=2m",
            "initialCapacity=4,maximumWeight=10,concurrencyLevel=1,weakKeys,weakValues,recordStats",
            "expireAfterWrite=1h 30m,expireAfterAccess=10s,refreshAfterWrite=1s",
        ] {
            let spec = CacheSpec::parse(descriptor).unwrap();
            assert_eq!(spec.to_spec_string(), descriptor);
            assert_eq!(CacheSpec::parse(&spec.to_string()).unwrap(), spec);
        }
    }

    #[test]
    fn test_spec_serde() {
        let spec = CacheSpec::parse("maximumSize=5,softValues").unwrap();
        let json = serde_json::to_string(&spec).unwrap();
        assert!(json.contains("\"maximumSize\":5"));
        let decoded: CacheSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, spec);

        let partial: CacheSpec = serde_json::from_str(r#"{"recordStats":true}"#).unwrap();
        assert_eq!(partial.record_stats, Some(true));
        assert_eq!(partial.maximum_size, None);
    }
}
