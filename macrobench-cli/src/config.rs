//! Configuration loading from macrobench.toml
//!
//! The file is discovered by walking up from the current directory. Its
//! `[defaults]` table holds option entries applied before the caller's own and
//! `[host]` is the bootstrap property list handed to worker processes.

use crate::options::parse_duration;
use anyhow::Context;
use macrobench_core::{HostConfig, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the configuration file looked up by [`MacrobenchConfig::discover`].
pub const CONFIG_FILE: &str = "macrobench.toml";

/// Macrobench configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MacrobenchConfig {
    /// Runner configuration
    #[serde(default)]
    pub runner: RunnerConfig,
    /// Option entries applied before the caller's options
    #[serde(default)]
    pub defaults: BTreeMap<String, toml::Value>,
    /// Host bootstrap properties
    #[serde(default)]
    pub host: BTreeMap<String, toml::Value>,
    /// Output configuration
    #[serde(default)]
    pub output: OutputConfig,
}

/// How forks are supervised
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Wall clock limit per fork (e.g., "10m"); "0" disables it
    #[serde(default = "default_timeout")]
    pub timeout: String,
    /// Show a progress bar over forks
    #[serde(default)]
    pub progress: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            progress: false,
        }
    }
}

fn default_timeout() -> String {
    "0".to_string()
}

impl RunnerConfig {
    /// Parsed fork timeout, `None` when disabled.
    pub fn fork_timeout(&self) -> anyhow::Result<Option<Duration>> {
        let timeout = parse_duration(&self.timeout)
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("invalid [runner] timeout {:?}", self.timeout))?;
        Ok((!timeout.is_zero()).then_some(timeout))
    }
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Default output format: "json" or "human"
    #[serde(default = "default_format")]
    pub format: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: default_format(),
        }
    }
}

fn default_format() -> String {
    "json".to_string()
}

/// Convert a TOML value to a script value. Datetimes become strings; tables
/// keep their key order.
pub fn toml_to_value(value: &toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::from(s.as_str()),
        toml::Value::Integer(n) => Value::Long(*n),
        toml::Value::Float(f) => Value::Double(*f),
        toml::Value::Boolean(b) => Value::Bool(*b),
        toml::Value::Datetime(d) => Value::from(d.to_string()),
        toml::Value::Array(items) => Value::List(items.iter().map(toml_to_value).collect()),
        toml::Value::Table(table) => Value::Map(
            table
                .iter()
                .map(|(k, v)| (Value::from(k.as_str()), toml_to_value(v)))
                .collect(),
        ),
    }
}

impl MacrobenchConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Self =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Path of the nearest configuration file at or above `start`.
    pub fn find_from(start: &Path) -> Option<PathBuf> {
        let mut dir = start.to_path_buf();
        loop {
            let candidate = dir.join(CONFIG_FILE);
            if candidate.is_file() {
                return Some(candidate);
            }
            if !dir.pop() {
                return None;
            }
        }
    }

    /// Discover and load the configuration above the current directory.
    /// Absent file means defaults; a file that fails to parse is an error.
    pub fn discover() -> anyhow::Result<Self> {
        let cwd = std::env::current_dir().context("reading current directory")?;
        match Self::find_from(&cwd) {
            Some(path) => {
                tracing::debug!(path = %path.display(), "loading configuration");
                Self::load(path)
            }
            None => Ok(Self::default()),
        }
    }

    /// `[defaults]` as option entries, in key order.
    pub fn default_options(&self) -> Vec<(Value, Value)> {
        self.defaults
            .iter()
            .map(|(k, v)| (Value::from(k.as_str()), toml_to_value(v)))
            .collect()
    }

    /// `[host]` as a host configuration. Non-string scalars use their TOML text.
    pub fn host_config(&self) -> HostConfig {
        self.host
            .iter()
            .map(|(k, v)| {
                let text = match v {
                    toml::Value::String(s) => s.clone(),
                    toml::Value::Array(items) => items
                        .iter()
                        .map(|item| match item {
                            toml::Value::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                        .collect::<Vec<_>>()
                        .join(","),
                    other => other.to_string(),
                };
                (k.clone(), text)
            })
            .collect()
    }

    /// Generate a default configuration as TOML string
    pub fn default_toml() -> String {
        r#"# Macrobench Configuration

[runner]
# Wall clock limit for one fork ("0" disables it)
timeout = "0"
# Show a progress bar over forks
progress = false

[defaults]
# Option entries applied before the ones given on the command line.
# forks = 1
# warmupIterations = 2
# measurementIterations = 5
# measurementTime = "1s"
# mode = "Throughput"
# timeUnit = "SECONDS"

[host]
# Bootstrap properties forwarded to workers. Only `extensions` and keys
# prefixed with `extension.` leave this process.
# extensions = "time,strings"

[output]
# Default output format: json or human
format = "json"
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MacrobenchConfig::default();
        assert_eq!(config.runner.fork_timeout().unwrap(), None);
        assert!(!config.runner.progress);
        assert_eq!(config.output.format, "json");
        assert!(config.default_options().is_empty());
        assert!(config.host_config().is_empty());
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
            [runner]
            timeout = "2m"

            [defaults]
            forks = 1
            measurementTime = "1s"
            profilers = ["gc"]

            [host]
            extensions = ["time", "strings"]
            "extension.strings.limit" = 10
        "#;

        let config: MacrobenchConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(
            config.runner.fork_timeout().unwrap(),
            Some(Duration::from_secs(120))
        );
        let defaults = config.default_options();
        assert!(defaults.contains(&(Value::from("forks"), Value::Long(1))));
        assert!(defaults.contains(&(
            Value::from("profilers"),
            Value::List(vec![Value::from("gc")])
        )));
        let host = config.host_config();
        assert_eq!(host.get("extensions"), Some("time,strings"));
        assert_eq!(host.get("extension.strings.limit"), Some("10"));
        // Defaults should still apply
        assert_eq!(config.output.format, "json");
    }

    #[test]
    fn test_bad_timeout() {
        let config = MacrobenchConfig {
            runner: RunnerConfig {
                timeout: "soon".into(),
                progress: false,
            },
            ..Default::default()
        };
        assert!(config.runner.fork_timeout().is_err());
    }

    #[test]
    fn test_default_toml_parses() {
        let config: MacrobenchConfig = toml::from_str(&MacrobenchConfig::default_toml()).unwrap();
        assert_eq!(config.runner.timeout, "0");
        assert!(config.defaults.is_empty());
    }

    #[test]
    fn test_find_from_walks_up() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "[runner]\nprogress = true\n").unwrap();
        let found = MacrobenchConfig::find_from(&nested).unwrap();
        assert_eq!(found, dir.path().join(CONFIG_FILE));
        assert!(MacrobenchConfig::load(found).unwrap().runner.progress);
    }
}
