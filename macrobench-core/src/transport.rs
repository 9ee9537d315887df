//! Snapshot transport
//!
//! The orchestrator writes the benchmark snapshot (`benchConf*.mc2`) and the host
//! bootstrap configuration (`hostConf*.conf`) to temporary files and hands
//! workers their paths as launch markers. The files live as long as the
//! [`TransportFiles`] value that created them.

use crate::bench::{BenchConfigError, BenchConfiguration};
use crate::host::{HostConfig, HostConfigError};
use crate::registry::{Registry, RegistryError};
use crate::snapshot::{self, SnapshotError};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

/// Launch marker carrying the snapshot path.
pub const BENCH_CONFIG_MARKER: &str = "--bench-config=";

/// Launch marker carrying the host configuration path.
pub const HOST_CONFIG_MARKER: &str = "--host-config=";

/// Transport file failures.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Temporary file could not be created
    #[error("failed to create transport file in {dir}")]
    Create {
        /// Target directory
        dir: PathBuf,
        /// Cause
        #[source]
        source: std::io::Error,
    },

    /// Write to a transport file failed
    #[error("failed to write {path}")]
    Write {
        /// File path
        path: PathBuf,
        /// Cause
        #[source]
        source: std::io::Error,
    },

    /// Read of a transport file failed
    #[error("failed to read {path}")]
    Read {
        /// File path
        path: PathBuf,
        /// Cause
        #[source]
        source: std::io::Error,
    },

    /// Deletion of a transport file failed
    #[error("failed to remove transport file")]
    Cleanup(#[source] std::io::Error),

    /// Snapshot text did not restore
    #[error("invalid snapshot in {path}")]
    Snapshot {
        /// File path
        path: PathBuf,
        /// Cause
        #[source]
        source: SnapshotError,
    },

    /// Snapshot restored to something that is not a benchmark
    #[error("invalid benchmark configuration in {path}")]
    BenchConfig {
        /// File path
        path: PathBuf,
        /// Cause
        #[source]
        source: BenchConfigError,
    },

    /// Host configuration did not parse
    #[error("invalid host configuration in {path}")]
    HostConfig {
        /// File path
        path: PathBuf,
        /// Cause
        #[source]
        source: HostConfigError,
    },

    /// Host configuration names an unknown extension
    #[error("failed to register extensions")]
    Extension(#[source] RegistryError),

    /// Worker launched without one of the markers
    #[error("missing launch marker {0}")]
    MissingMarker(&'static str),
}

/// Owner of the two transport files; dropping it deletes them.
#[derive(Debug)]
pub struct TransportFiles {
    bench: NamedTempFile,
    host: NamedTempFile,
}

impl TransportFiles {
    /// Write both files to the system temporary directory.
    pub fn write(bench: &BenchConfiguration, host: &HostConfig) -> Result<Self, TransportError> {
        Self::write_in(&std::env::temp_dir(), bench, host)
    }

    /// Write both files to `dir`.
    pub fn write_in(
        dir: &Path,
        bench: &BenchConfiguration,
        host: &HostConfig,
    ) -> Result<Self, TransportError> {
        let bench_file = create(dir, "benchConf", ".mc2", &bench.snapshot())?;
        let host_file = create(dir, "hostConf", ".conf", &host.render())?;
        debug!(
            bench = %bench_file.path().display(),
            host = %host_file.path().display(),
            "wrote transport files"
        );
        Ok(Self {
            bench: bench_file,
            host: host_file,
        })
    }

    /// Paths to pass to workers.
    pub fn handles(&self) -> TransportHandles {
        TransportHandles {
            bench_config: self.bench.path().to_path_buf(),
            host_config: self.host.path().to_path_buf(),
        }
    }

    /// Delete both files, reporting the first failure. Both deletions are attempted.
    pub fn close(self) -> Result<(), TransportError> {
        let bench = self.bench.close();
        let host = self.host.close();
        bench.and(host).map_err(TransportError::Cleanup)
    }
}

fn create(dir: &Path, prefix: &str, suffix: &str, text: &str) -> Result<NamedTempFile, TransportError> {
    let mut file = tempfile::Builder::new()
        .prefix(prefix)
        .suffix(suffix)
        .tempfile_in(dir)
        .map_err(|source| TransportError::Create {
            dir: dir.to_path_buf(),
            source,
        })?;
    file.write_all(text.as_bytes())
        .and_then(|()| file.flush())
        .map_err(|source| TransportError::Write {
            path: file.path().to_path_buf(),
            source,
        })?;
    Ok(file)
}

/// Locations of the transport files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportHandles {
    /// Benchmark snapshot
    pub bench_config: PathBuf,
    /// Host bootstrap configuration
    pub host_config: PathBuf,
}

impl TransportHandles {
    /// Launch markers for a worker command line.
    pub fn to_args(&self) -> Vec<String> {
        vec![
            format!("{BENCH_CONFIG_MARKER}{}", self.bench_config.display()),
            format!("{HOST_CONFIG_MARKER}{}", self.host_config.display()),
        ]
    }

    /// Find both markers in a command line.
    pub fn from_args<I, S>(args: I) -> Result<Self, TransportError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut bench = None;
        let mut host = None;
        for arg in args {
            let arg = arg.as_ref();
            if let Some(path) = arg.strip_prefix(BENCH_CONFIG_MARKER) {
                bench = Some(PathBuf::from(path));
            } else if let Some(path) = arg.strip_prefix(HOST_CONFIG_MARKER) {
                host = Some(PathBuf::from(path));
            }
        }
        Ok(Self {
            bench_config: bench.ok_or(TransportError::MissingMarker(BENCH_CONFIG_MARKER))?,
            host_config: host.ok_or(TransportError::MissingMarker(HOST_CONFIG_MARKER))?,
        })
    }

    /// Restore the host configuration.
    pub fn read_host(&self) -> Result<HostConfig, TransportError> {
        let text = read(&self.host_config)?;
        HostConfig::parse(&text).map_err(|source| TransportError::HostConfig {
            path: self.host_config.clone(),
            source,
        })
    }

    /// Restore the benchmark configuration, resolving operations through `registry`.
    pub fn read_bench(&self, registry: &Registry) -> Result<BenchConfiguration, TransportError> {
        let text = read(&self.bench_config)?;
        let value =
            snapshot::decode_value(&text, registry).map_err(|source| TransportError::Snapshot {
                path: self.bench_config.clone(),
                source,
            })?;
        BenchConfiguration::from_value(&value).map_err(|source| TransportError::BenchConfig {
            path: self.bench_config.clone(),
            source,
        })
    }

    /// Restore both, registering the extensions the host configuration names.
    pub fn read(&self) -> Result<(BenchConfiguration, HostConfig), TransportError> {
        let host = self.read_host()?;
        let registry = Registry::for_host(&host).map_err(TransportError::Extension)?;
        let bench = self.read_bench(&registry)?;
        Ok((bench, host))
    }
}

fn read(path: &Path) -> Result<String, TransportError> {
    std::fs::read_to_string(path).map_err(|source| TransportError::Read {
        path: path.to_path_buf(),
        source,
    })
}
