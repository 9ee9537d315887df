//! Operation registry
//!
//! Maps snapshot operation names to implementations. Built-ins are always
//! present; extension bundles are added when the host configuration names them.

use crate::host::HostConfig;
use crate::ops;
use crate::value::Operation;
use fxhash::FxHashMap;
use thiserror::Error;

/// Extension bundles known to this build.
pub const EXTENSIONS: &[(&str, &[Operation])] = &[
    ("time", ops::TIME_EXTENSION),
    ("strings", ops::STRINGS_EXTENSION),
];

/// Failure to register an extension.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// No bundle with that name
    #[error("unknown extension '{name}' (known: {known})")]
    UnknownExtension {
        /// Requested name
        name: String,
        /// Comma-separated known names
        known: String,
    },
}

/// Name to operation lookup table.
#[derive(Debug, Clone)]
pub struct Registry {
    ops: FxHashMap<&'static str, Operation>,
    extensions: Vec<&'static str>,
}

impl Registry {
    /// Registry holding only the built-in operations.
    pub fn builtins() -> Self {
        let mut registry = Self {
            ops: FxHashMap::default(),
            extensions: Vec::new(),
        };
        registry.add_all(ops::BUILTINS);
        registry
    }

    /// Built-ins plus every extension named by `host`.
    pub fn for_host(host: &HostConfig) -> Result<Self, RegistryError> {
        let mut registry = Self::builtins();
        registry.register_from(host)?;
        Ok(registry)
    }

    fn add_all(&mut self, ops: &[Operation]) {
        for op in ops {
            self.ops.insert(op.name(), *op);
        }
    }

    /// Register one extension bundle by name. Registering twice is a no-op.
    pub fn register_extension(&mut self, name: &str) -> Result<(), RegistryError> {
        let Some((ext, ops)) = EXTENSIONS.iter().find(|(n, _)| *n == name) else {
            return Err(RegistryError::UnknownExtension {
                name: name.to_string(),
                known: EXTENSIONS
                    .iter()
                    .map(|(n, _)| *n)
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        };
        if !self.extensions.contains(ext) {
            self.add_all(ops);
            self.extensions.push(ext);
            tracing::debug!(extension = *ext, "registered extension");
        }
        Ok(())
    }

    /// Register every extension listed in the host configuration.
    pub fn register_from(&mut self, host: &HostConfig) -> Result<(), RegistryError> {
        for name in host.extensions() {
            self.register_extension(name)?;
        }
        Ok(())
    }

    /// Look an operation up by name.
    pub fn lookup(&self, name: &str) -> Option<Operation> {
        self.ops.get(name).copied()
    }

    /// Names of the registered extensions, in registration order.
    pub fn extensions(&self) -> &[&'static str] {
        &self.extensions
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtins()
    }
}
