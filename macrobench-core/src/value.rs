//! Script values and compiled macros
//!
//! `Value` is the tagged union of everything that can sit on a stack. A `Macro`
//! is an immutable, cheaply cloned list of steps: literals to push and operations
//! to apply.

use crate::stack::{ScriptError, StackMachine};
use std::fmt;
use std::sync::Arc;

/// Signature shared by every operation.
pub type OpFn = fn(&mut dyn StackMachine) -> Result<(), ScriptError>;

/// A named, registered operation.
#[derive(Clone, Copy)]
pub struct Operation {
    name: &'static str,
    func: OpFn,
}

impl Operation {
    /// Bind a name to its implementation.
    pub const fn new(name: &'static str, func: OpFn) -> Self {
        Self { name, func }
    }

    /// Name as written in snapshots.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Run the operation against a stack.
    #[inline(always)]
    pub fn apply(&self, stack: &mut dyn StackMachine) -> Result<(), ScriptError> {
        (self.func)(stack)
    }
}

impl PartialEq for Operation {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// One element of a compiled macro.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Pushed as-is
    Literal(Value),
    /// Applied to the stack
    Op(Operation),
}

/// Compiled macro: a shared immutable list of steps.
#[derive(Clone, PartialEq, Default)]
pub struct Macro {
    steps: Arc<[Step]>,
}

impl Macro {
    /// Compile a macro from its steps.
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: steps.into(),
        }
    }

    /// Macro with no steps.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Steps in execution order.
    #[inline(always)]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the macro does nothing.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl fmt::Debug for Macro {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", crate::snapshot::encode_macro(self))
    }
}

impl FromIterator<Step> for Macro {
    fn from_iter<I: IntoIterator<Item = Step>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Anything that can live on a stack.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absence of a value
    Null,
    /// 64-bit signed integer
    Long(i64),
    /// Double precision float
    Double(f64),
    /// Boolean
    Bool(bool),
    /// UTF-8 string
    Str(Arc<str>),
    /// Ordered list
    List(Vec<Value>),
    /// Map with insertion-ordered entries
    Map(Vec<(Value, Value)>),
    /// Compiled macro
    Macro(Macro),
}

impl Value {
    /// Type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Long(_) => "long",
            Value::Double(_) => "double",
            Value::Bool(_) => "boolean",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Macro(_) => "macro",
        }
    }

    /// String contents, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Macro, if this is a macro.
    pub fn as_macro(&self) -> Option<&Macro> {
        match self {
            Value::Macro(m) => Some(m),
            _ => None,
        }
    }

    /// Map entries, if this is a map.
    pub fn as_map(&self) -> Option<&[(Value, Value)]> {
        match self {
            Value::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Look a string key up in a map value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map()?
            .iter()
            .find(|(k, _)| k.as_str() == Some(key))
            .map(|(_, v)| v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.into())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v.into())
    }
}

impl From<Macro> for Value {
    fn from(v: Macro) -> Self {
        Value::Macro(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&crate::snapshot::encode_value(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_lookup_by_string_key() {
        let map = Value::Map(vec![
            (Value::Long(1), Value::from("one")),
            (Value::from("macro"), Value::Macro(Macro::empty())),
        ]);
        assert_eq!(map.get("macro"), Some(&Value::Macro(Macro::empty())));
        assert_eq!(map.get("missing"), None);
        assert_eq!(Value::Null.get("macro"), None);
    }

    #[test]
    fn test_macro_clone_shares_steps() {
        let m = Macro::new(vec![Step::Literal(Value::Long(1))]);
        let copy = m.clone();
        assert!(std::ptr::eq(m.steps().as_ptr(), copy.steps().as_ptr()));
        assert_eq!(m, copy);
    }
}
