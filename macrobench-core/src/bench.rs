//! Benchmark configuration: the measured macro and its lifecycle hooks

use crate::ops;
use crate::value::{Macro, Step, Value};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::fmt;
use thiserror::Error;

/// Key of the measured macro in a hook map.
pub const MACRO_KEY: &str = "macro";

/// Lifecycle hooks, in the order they appear in a trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    /// Once, before the first iteration
    PreTrial,
    /// Before each iteration
    PreIteration,
    /// Before each invocation
    PreInvocation,
    /// After each invocation, clears the stack unless supplied
    PostInvocation,
    /// After each iteration
    PostIteration,
    /// Once, after the last iteration
    PostTrial,
}

impl Hook {
    /// All hooks in lifecycle order.
    pub const ALL: [Hook; 6] = [
        Hook::PreTrial,
        Hook::PreIteration,
        Hook::PreInvocation,
        Hook::PostInvocation,
        Hook::PostIteration,
        Hook::PostTrial,
    ];

    /// Key in a hook map.
    pub fn key(self) -> &'static str {
        match self {
            Hook::PreTrial => "pretrial",
            Hook::PreIteration => "preiteration",
            Hook::PreInvocation => "preinvocation",
            Hook::PostInvocation => "postinvocation",
            Hook::PostIteration => "postiteration",
            Hook::PostTrial => "posttrial",
        }
    }

    /// Hook for a map key.
    pub fn from_key(key: &str) -> Option<Hook> {
        Hook::ALL.into_iter().find(|h| h.key() == key)
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Malformed benchmark input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BenchConfigError {
    /// Hook map without the measured macro
    #[error("benchmark configuration has no '{MACRO_KEY}' entry")]
    MissingMacro,

    /// Entry that is not a macro
    #[error("'{key}' must be a macro, got a {got}")]
    NotAMacro {
        /// Map key
        key: String,
        /// Type found
        got: &'static str,
    },

    /// Key outside `macro` and the hook names
    #[error(
        "unknown key {key} in benchmark configuration, expected one of: macro, pretrial, preiteration, preinvocation, postinvocation, postiteration, posttrial"
    )]
    UnknownKey {
        /// Offending key, in snapshot form
        key: String,
    },

    /// Input that is neither a macro nor a map
    #[error("benchmark input must be a macro or a map of macros, got a {0}")]
    NotAMacroOrMap(&'static str),
}

/// The measured macro plus optional hooks, exactly as submitted.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchConfiguration {
    measured: Macro,
    hooks: [Option<Macro>; 6],
}

impl BenchConfiguration {
    /// Configuration with no hooks.
    pub fn from_macro(measured: Macro) -> Self {
        Self {
            measured,
            hooks: Default::default(),
        }
    }

    /// Accept either a bare macro or a hook map.
    pub fn from_value(value: &Value) -> Result<Self, BenchConfigError> {
        match value {
            Value::Macro(code) => Ok(Self::from_macro(code.clone())),
            Value::Map(entries) => Self::from_entries(entries),
            other => Err(BenchConfigError::NotAMacroOrMap(other.type_name())),
        }
    }

    fn from_entries(entries: &[(Value, Value)]) -> Result<Self, BenchConfigError> {
        let mut measured = None;
        let mut hooks: [Option<Macro>; 6] = Default::default();
        for (key, value) in entries {
            let Some(name) = key.as_str() else {
                return Err(BenchConfigError::UnknownKey {
                    key: key.to_string(),
                });
            };
            let code = value.as_macro().ok_or_else(|| BenchConfigError::NotAMacro {
                key: name.to_string(),
                got: value.type_name(),
            })?;
            if name == MACRO_KEY {
                measured = Some(code.clone());
            } else if let Some(hook) = Hook::from_key(name) {
                hooks[hook.index()] = Some(code.clone());
            } else {
                return Err(BenchConfigError::UnknownKey {
                    key: key.to_string(),
                });
            }
        }
        let measured = measured.ok_or(BenchConfigError::MissingMacro)?;
        Ok(Self { measured, hooks })
    }

    /// Set a hook.
    pub fn with_hook(mut self, hook: Hook, code: Macro) -> Self {
        self.hooks[hook.index()] = Some(code);
        self
    }

    /// The measured macro.
    pub fn measured(&self) -> &Macro {
        &self.measured
    }

    /// A hook, if one was supplied.
    pub fn hook(&self, hook: Hook) -> Option<&Macro> {
        self.hooks[hook.index()].as_ref()
    }

    /// Supplied entries in canonical order, measured macro first.
    pub fn entries(&self) -> impl Iterator<Item = (&'static str, &Macro)> {
        std::iter::once((MACRO_KEY, &self.measured)).chain(
            Hook::ALL
                .into_iter()
                .filter_map(|h| self.hook(h).map(|m| (h.key(), m))),
        )
    }

    /// Hook map form, as pushed back on a stack.
    pub fn to_value(&self) -> Value {
        Value::Map(
            self.entries()
                .map(|(k, m)| (Value::from(k), Value::Macro(m.clone())))
                .collect(),
        )
    }

    /// Snapshot text of the hook map.
    pub fn snapshot(&self) -> String {
        crate::snapshot::encode_value(&self.to_value())
    }

    /// Every hook filled in, with the defaults applied.
    pub fn resolve(&self) -> ResolvedHooks {
        let get = |hook: Hook| self.hook(hook).cloned().unwrap_or_default();
        ResolvedHooks {
            measured: self.measured.clone(),
            pretrial: get(Hook::PreTrial),
            preiteration: get(Hook::PreIteration),
            preinvocation: get(Hook::PreInvocation),
            postinvocation: self
                .hook(Hook::PostInvocation)
                .cloned()
                .unwrap_or_else(clear_stack),
            postiteration: get(Hook::PostIteration),
            posttrial: get(Hook::PostTrial),
        }
    }
}

/// Macro run after each invocation when none is supplied.
pub fn clear_stack() -> Macro {
    Macro::new(vec![Step::Op(ops::CLEAR)])
}

/// Every phase's macro, ready to run.
#[derive(Debug, Clone)]
pub struct ResolvedHooks {
    /// Timed
    pub measured: Macro,
    /// Trial setup
    pub pretrial: Macro,
    /// Iteration setup
    pub preiteration: Macro,
    /// Invocation setup
    pub preinvocation: Macro,
    /// Invocation teardown
    pub postinvocation: Macro,
    /// Iteration teardown
    pub postiteration: Macro,
    /// Trial teardown
    pub posttrial: Macro,
}

/// Serialized as a map of key to snapshot text.
impl Serialize for BenchConfiguration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        for (key, code) in self.entries() {
            map.serialize_entry(key, &crate::snapshot::encode_macro(code))?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use crate::snapshot::decode_value;

    fn parse(text: &str) -> Result<BenchConfiguration, BenchConfigError> {
        BenchConfiguration::from_value(&decode_value(text, &Registry::builtins()).unwrap())
    }

    #[test]
    fn test_bare_macro() {
        let bench = parse("<% 1 1 + %>").unwrap();
        assert_eq!(bench.measured().len(), 3);
        assert!(Hook::ALL.iter().all(|h| bench.hook(*h).is_none()));
    }

    #[test]
    fn test_hook_map() {
        let bench = parse("{ 'macro' <% DUP %> 'preinvocation' <% 1 %> 'posttrial' <% %> }").unwrap();
        assert_eq!(bench.hook(Hook::PreInvocation).map(Macro::len), Some(1));
        assert_eq!(bench.hook(Hook::PostTrial).map(Macro::len), Some(0));
        assert!(bench.hook(Hook::PostInvocation).is_none());
    }

    #[test]
    fn test_rejections() {
        assert_eq!(parse("{ 'pretrial' <% %> }"), Err(BenchConfigError::MissingMacro));
        assert_eq!(
            parse("{ 'macro' <% %> 'setup' <% %> }"),
            Err(BenchConfigError::UnknownKey {
                key: "'setup'".to_string()
            })
        );
        assert_eq!(
            parse("{ 'macro' 42 }"),
            Err(BenchConfigError::NotAMacro {
                key: "macro".to_string(),
                got: "long"
            })
        );
        assert_eq!(parse("'x'"), Err(BenchConfigError::NotAMacroOrMap("string")));
    }

    #[test]
    fn test_default_postinvocation_clears() {
        let resolved = BenchConfiguration::from_macro(Macro::empty()).resolve();
        assert_eq!(resolved.postinvocation, clear_stack());
        assert!(resolved.preinvocation.is_empty());
    }

    #[test]
    fn test_snapshot_keeps_only_submitted_entries() {
        let bench = parse("{ 'posttrial' <% DROP %> 'macro' <% 1 %> }").unwrap();
        assert_eq!(bench.snapshot(), "{ 'macro' <% 1 %> 'posttrial' <% DROP %> }");
    }
}
