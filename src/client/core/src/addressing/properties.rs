//! Ordered string properties with the `k1=v1;k2=v2` text form.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

const PROP_SEP: char = ';';
const KV_SEP: char = '=';

/// A `(String, String)` map, ordered by key so its text form is stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties(BTreeMap<String, String>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `k1=v1;k2;k3=v3`. A key without `=` maps to an empty value.
    pub fn parse(s: &str) -> Self {
        let mut props = Self::new();
        if s.is_empty() {
            return props;
        }
        for kv in s.split(PROP_SEP) {
            match kv.find(KV_SEP) {
                Some(i) => props.insert(&kv[..i], &kv[i + 1..]),
                None => props.insert(kv, ""),
            };
        }
        props
    }

    /// Parse only the `key=value` entries with a non-empty key, as evals see them.
    pub fn parse_assignments(s: &str) -> Self {
        let mut props = Self::new();
        for kv in s.split(PROP_SEP) {
            if let Some(i) = kv.find(KV_SEP) {
                if i > 0 {
                    props.insert(&kv[..i], &kv[i + 1..]);
                }
            }
        }
        props
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for Properties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", PROP_SEP)?;
            }
            write!(f, "{}{}{}", k, KV_SEP, v)?;
        }
        Ok(())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
