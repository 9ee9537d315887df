//! Host bootstrap configuration
//!
//! Property list a worker restores before loading the snapshot. On disk it is one
//! `key = value` pair per line, values percent-encoded, `#` starting a comment.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Comma separated extension names to register in workers.
pub const EXTENSIONS_KEY: &str = "extensions";

/// Prefix of extension-specific settings forwarded to workers.
pub const EXTENSION_PREFIX: &str = "extension.";

/// Malformed host configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostConfigError {
    /// Line without `=`
    #[error("line {line}: expected 'key = value'")]
    MissingSeparator {
        /// 1-based line number
        line: usize,
    },

    /// `= value` with nothing before it
    #[error("line {line}: empty key")]
    EmptyKey {
        /// 1-based line number
        line: usize,
    },

    /// Percent-encoding that does not decode to UTF-8
    #[error("line {line}: value is not valid percent-encoded UTF-8")]
    InvalidEncoding {
        /// 1-based line number
        line: usize,
    },
}

/// Ordered property list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostConfig {
    properties: BTreeMap<String, String>,
}

impl HostConfig {
    /// Empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a property, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    /// Read a property.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Number of properties.
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// Whether there are no properties.
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Properties in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.properties
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Extension names listed under [`EXTENSIONS_KEY`].
    pub fn extensions(&self) -> impl Iterator<Item = &str> {
        self.get(EXTENSIONS_KEY)
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Properties a worker is allowed to see.
    pub fn bootstrap_subset(&self) -> Self {
        Self {
            properties: self
                .properties
                .iter()
                .filter(|(k, _)| k.as_str() == EXTENSIONS_KEY || k.starts_with(EXTENSION_PREFIX))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// File form.
    pub fn render(&self) -> String {
        let mut out = String::from("# macrobench host configuration\n");
        for (k, v) in &self.properties {
            out.push_str(k);
            out.push_str(" = ");
            out.push_str(&urlencoding::encode(v));
            out.push('\n');
        }
        out
    }

    /// Parse the file form.
    pub fn parse(text: &str) -> Result<Self, HostConfigError> {
        let mut config = Self::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = idx + 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let (key, value) = trimmed
                .split_once('=')
                .ok_or(HostConfigError::MissingSeparator { line })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(HostConfigError::EmptyKey { line });
            }
            let value = urlencoding::decode(value.trim())
                .map_err(|_| HostConfigError::InvalidEncoding { line })?;
            config.set(key, value.into_owned());
        }
        Ok(config)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for HostConfig {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            properties: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
