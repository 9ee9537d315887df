//! Fast macro executor
//!
//! Runs a macro's steps straight against the stack: no recursion tracking, no
//! operation budget, no depth checks. Nested `EVAL`s still go through the stack's
//! general `exec` path.

use crate::stack::{ScriptError, StackMachine};
use crate::value::{Macro, Step};

/// Push literals and apply operations, in order.
#[inline]
pub fn fast_exec<S: StackMachine>(stack: &mut S, code: &Macro) -> Result<(), ScriptError> {
    for step in code.steps() {
        match step {
            Step::Literal(value) => stack.push(value.clone()),
            Step::Op(op) => op.apply(stack)?,
        }
    }
    Ok(())
}
