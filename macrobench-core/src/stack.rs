//! Stack machine interface and the in-memory implementation
//!
//! The harness only talks to interpreters through [`StackMachine`]. [`MemoryStack`]
//! is the reference interpreter used by workers and tests.

use crate::registry::Registry;
use crate::snapshot::{self, SnapshotError};
use crate::value::{Macro, Step, Value};
use fxhash::FxHashMap;
use thiserror::Error;

/// Runtime fault raised while executing a macro.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScriptError {
    /// Pop on an empty stack
    #[error("stack is empty")]
    EmptyStack,

    /// Operation needs more operands than the stack holds
    #[error("{op} needs {needed} operands, stack depth is {depth}")]
    Underflow {
        /// Operation name
        op: &'static str,
        /// Operands required
        needed: usize,
        /// Current depth
        depth: usize,
    },

    /// Operand of the wrong type
    #[error("{op} expects {expected}, got {got}")]
    TypeMismatch {
        /// Operation name
        op: &'static str,
        /// Accepted type(s)
        expected: &'static str,
        /// Type found on the stack
        got: &'static str,
    },

    /// Integer division by zero
    #[error("division by zero")]
    DivisionByZero,

    /// Integer arithmetic overflow
    #[error("integer overflow in {0}")]
    Overflow(&'static str),

    /// Raised by `FAIL`
    #[error("{0}")]
    Fault(String),

    /// Nested `exec` calls beyond the configured limit
    #[error("recursion limit of {0} exceeded")]
    RecursionLimit(usize),

    /// Too many steps in one top-level `exec`
    #[error("operation budget of {0} exhausted")]
    OpsLimit(u64),

    /// Stack grew past the configured limit
    #[error("stack depth limit of {0} exceeded")]
    DepthLimit(usize),
}

/// Narrow interpreter interface the harness depends on.
pub trait StackMachine {
    /// Push a value on top.
    fn push(&mut self, value: Value);

    /// Remove and return the top value.
    fn pop(&mut self) -> Result<Value, ScriptError>;

    /// Top value without removing it.
    fn peek(&self) -> Option<&Value>;

    /// Number of values on the stack.
    fn depth(&self) -> usize;

    /// Drop every value.
    fn clear(&mut self);

    /// Apply one step with no bookkeeping.
    fn execute(&mut self, step: &Step) -> Result<(), ScriptError>;

    /// Execute a macro through the general path (limits enforced).
    fn exec(&mut self, code: &Macro) -> Result<(), ScriptError>;

    /// Stack contents as snapshot text, bottom first.
    fn snapshot(&self) -> String;

    /// Replace the stack contents with the values of a snapshot.
    fn restore(&mut self, text: &str, registry: &Registry) -> Result<(), SnapshotError>;

    /// Set a named attribute.
    fn set_attribute(&mut self, key: &str, value: Value);

    /// Read a named attribute.
    fn attribute(&self, key: &str) -> Option<&Value>;

    /// Release storage retained between iterations.
    fn reclaim(&mut self) {}
}

/// Execution limits of a [`MemoryStack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Maximum number of values on the stack
    pub max_depth: usize,
    /// Maximum nesting of `exec` calls
    pub max_recursion: usize,
    /// Maximum steps per top-level `exec`
    pub max_ops: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_depth: 1_000,
            max_recursion: 16,
            max_ops: 1_000_000,
        }
    }
}

impl Limits {
    /// Limits used for benchmarking: effectively unbounded.
    pub fn max() -> Self {
        Self {
            max_depth: usize::MAX,
            max_recursion: 1_024,
            max_ops: u64::MAX,
        }
    }
}

/// `Vec`-backed stack with attributes and limits.
#[derive(Debug, Default)]
pub struct MemoryStack {
    values: Vec<Value>,
    attributes: FxHashMap<String, Value>,
    limits: Limits,
    call_depth: usize,
    ops: u64,
}

impl MemoryStack {
    /// Empty stack with default limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lift the limits to their maximum values.
    pub fn max_limits(&mut self) {
        self.limits = Limits::max();
    }

    /// Current limits.
    pub fn limits(&self) -> Limits {
        self.limits
    }

    /// Replace the limits.
    pub fn set_limits(&mut self, limits: Limits) {
        self.limits = limits;
    }

    /// Values, bottom first.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    fn exec_steps(&mut self, code: &Macro) -> Result<(), ScriptError> {
        for step in code.steps() {
            self.ops += 1;
            if self.ops > self.limits.max_ops {
                return Err(ScriptError::OpsLimit(self.limits.max_ops));
            }
            self.execute(step)?;
            if self.values.len() > self.limits.max_depth {
                return Err(ScriptError::DepthLimit(self.limits.max_depth));
            }
        }
        Ok(())
    }
}

impl StackMachine for MemoryStack {
    #[inline(always)]
    fn push(&mut self, value: Value) {
        self.values.push(value);
    }

    #[inline(always)]
    fn pop(&mut self) -> Result<Value, ScriptError> {
        self.values.pop().ok_or(ScriptError::EmptyStack)
    }

    fn peek(&self) -> Option<&Value> {
        self.values.last()
    }

    fn depth(&self) -> usize {
        self.values.len()
    }

    fn clear(&mut self) {
        self.values.clear();
    }

    #[inline(always)]
    fn execute(&mut self, step: &Step) -> Result<(), ScriptError> {
        match step {
            Step::Literal(value) => {
                self.values.push(value.clone());
                Ok(())
            }
            Step::Op(op) => op.apply(self),
        }
    }

    fn exec(&mut self, code: &Macro) -> Result<(), ScriptError> {
        if self.call_depth >= self.limits.max_recursion {
            return Err(ScriptError::RecursionLimit(self.limits.max_recursion));
        }
        if self.call_depth == 0 {
            self.ops = 0;
        }
        self.call_depth += 1;
        let result = self.exec_steps(code);
        self.call_depth -= 1;
        result
    }

    fn snapshot(&self) -> String {
        snapshot::encode_values(&self.values)
    }

    fn restore(&mut self, text: &str, registry: &Registry) -> Result<(), SnapshotError> {
        self.values = snapshot::decode_values(text, registry)?;
        Ok(())
    }

    fn set_attribute(&mut self, key: &str, value: Value) {
        self.attributes.insert(key.to_string(), value);
    }

    fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    fn reclaim(&mut self) {
        self.values.shrink_to_fit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops;

    fn lit(v: i64) -> Step {
        Step::Literal(Value::Long(v))
    }

    #[test]
    fn test_exec_adds() {
        let mut stack = MemoryStack::new();
        let code = Macro::new(vec![lit(1), lit(1), Step::Op(ops::ADD)]);
        stack.exec(&code).unwrap();
        assert_eq!(stack.values(), &[Value::Long(2)]);
    }

    #[test]
    fn test_ops_budget_is_enforced() {
        let mut stack = MemoryStack::new();
        stack.set_limits(Limits {
            max_ops: 2,
            ..Limits::default()
        });
        let code = Macro::new(vec![lit(1), lit(2), lit(3)]);
        assert_eq!(stack.exec(&code), Err(ScriptError::OpsLimit(2)));
    }

    #[test]
    fn test_depth_limit_is_enforced() {
        let mut stack = MemoryStack::new();
        stack.set_limits(Limits {
            max_depth: 1,
            ..Limits::default()
        });
        let code = Macro::new(vec![lit(1), lit(2)]);
        assert_eq!(stack.exec(&code), Err(ScriptError::DepthLimit(1)));
    }

    #[test]
    fn test_recursion_limit_through_eval() {
        let mut stack = MemoryStack::new();
        stack.set_limits(Limits {
            max_recursion: 2,
            ..Limits::default()
        });
        let inner = Macro::new(vec![lit(7)]);
        let middle = Macro::new(vec![Step::Literal(Value::Macro(inner)), Step::Op(ops::EVAL)]);
        let outer = Macro::new(vec![Step::Literal(Value::Macro(middle)), Step::Op(ops::EVAL)]);
        assert_eq!(stack.exec(&outer), Err(ScriptError::RecursionLimit(2)));

        stack.clear();
        stack.max_limits();
        let middle = Macro::new(vec![Step::Literal(Value::Long(7))]);
        let outer = Macro::new(vec![Step::Literal(Value::Macro(middle)), Step::Op(ops::EVAL)]);
        stack.exec(&outer).unwrap();
        assert_eq!(stack.values(), &[Value::Long(7)]);
    }

    #[test]
    fn test_snapshot_restore_values() {
        let registry = Registry::builtins();
        let mut stack = MemoryStack::new();
        stack.push(Value::Long(42));
        stack.push(Value::from("a b"));
        let text = stack.snapshot();

        let mut other = MemoryStack::new();
        other.restore(&text, &registry).unwrap();
        assert_eq!(other.values(), stack.values());
    }

    #[test]
    fn test_attributes() {
        let mut stack = MemoryStack::new();
        assert!(stack.attribute("token").is_none());
        stack.set_attribute("token", Value::from("secret"));
        assert_eq!(stack.attribute("token"), Some(&Value::from("secret")));
    }
}
