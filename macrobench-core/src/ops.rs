//! Built-in and extension operations

use crate::stack::{ScriptError, StackMachine};
use crate::value::{Operation, Value};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// `+`: numeric addition, or string concatenation.
pub const ADD: Operation = Operation::new("+", op_add);
/// `-`
pub const SUB: Operation = Operation::new("-", op_sub);
/// `*`
pub const MUL: Operation = Operation::new("*", op_mul);
/// `/`: integer division truncates; dividing a long by zero is a fault.
pub const DIV: Operation = Operation::new("/", op_div);
/// Duplicate the top value.
pub const DUP: Operation = Operation::new("DUP", op_dup);
/// Discard the top value.
pub const DROP: Operation = Operation::new("DROP", op_drop);
/// Exchange the two top values.
pub const SWAP: Operation = Operation::new("SWAP", op_swap);
/// Empty the stack.
pub const CLEAR: Operation = Operation::new("CLEAR", op_clear);
/// Push the current depth.
pub const DEPTH: Operation = Operation::new("DEPTH", op_depth);
/// Pop a macro and execute it.
pub const EVAL: Operation = Operation::new("EVAL", op_eval);
/// Pop a string and raise it as a fault.
pub const FAIL: Operation = Operation::new("FAIL", op_fail);
/// Do nothing.
pub const NOOP: Operation = Operation::new("NOOP", op_noop);

/// Push the wall clock in microseconds since the epoch.
pub const NOW: Operation = Operation::new("NOW", op_now);
/// Pop a duration in milliseconds and sleep.
pub const SLEEP: Operation = Operation::new("SLEEP", op_sleep);
/// Concatenate two strings.
pub const CONCAT: Operation = Operation::new("CONCAT", op_concat);
/// Length of a string, list or map.
pub const SIZE: Operation = Operation::new("SIZE", op_size);

/// Operations available on every stack.
pub const BUILTINS: &[Operation] = &[
    ADD, SUB, MUL, DIV, DUP, DROP, SWAP, CLEAR, DEPTH, EVAL, FAIL, NOOP,
];

/// Operations of the `time` extension.
pub const TIME_EXTENSION: &[Operation] = &[NOW, SLEEP];

/// Operations of the `strings` extension.
pub const STRINGS_EXTENSION: &[Operation] = &[CONCAT, SIZE];

#[inline]
fn need(stack: &dyn StackMachine, op: &'static str, needed: usize) -> Result<(), ScriptError> {
    let depth = stack.depth();
    if depth < needed {
        return Err(ScriptError::Underflow { op, needed, depth });
    }
    Ok(())
}

fn pop2(stack: &mut dyn StackMachine, op: &'static str) -> Result<(Value, Value), ScriptError> {
    need(stack, op, 2)?;
    let b = stack.pop()?;
    let a = stack.pop()?;
    Ok((a, b))
}

fn arith(
    stack: &mut dyn StackMachine,
    op: &'static str,
    long: fn(i64, i64) -> Result<i64, ScriptError>,
    double: fn(f64, f64) -> f64,
) -> Result<(), ScriptError> {
    let (a, b) = pop2(stack, op)?;
    let result = match (&a, &b) {
        (Value::Long(x), Value::Long(y)) => Value::Long(long(*x, *y)?),
        (Value::Long(x), Value::Double(y)) => Value::Double(double(*x as f64, *y)),
        (Value::Double(x), Value::Long(y)) => Value::Double(double(*x, *y as f64)),
        (Value::Double(x), Value::Double(y)) => Value::Double(double(*x, *y)),
        (Value::Long(_) | Value::Double(_), other) | (other, _) => {
            return Err(ScriptError::TypeMismatch {
                op,
                expected: "numbers",
                got: other.type_name(),
            });
        }
    };
    stack.push(result);
    Ok(())
}

fn op_add(stack: &mut dyn StackMachine) -> Result<(), ScriptError> {
    let strings = matches!(stack.peek(), Some(Value::Str(_)));
    if strings {
        return op_concat_named(stack, "+");
    }
    arith(
        stack,
        "+",
        |x, y| x.checked_add(y).ok_or(ScriptError::Overflow("+")),
        |x, y| x + y,
    )
}

fn op_sub(stack: &mut dyn StackMachine) -> Result<(), ScriptError> {
    arith(
        stack,
        "-",
        |x, y| x.checked_sub(y).ok_or(ScriptError::Overflow("-")),
        |x, y| x - y,
    )
}

fn op_mul(stack: &mut dyn StackMachine) -> Result<(), ScriptError> {
    arith(
        stack,
        "*",
        |x, y| x.checked_mul(y).ok_or(ScriptError::Overflow("*")),
        |x, y| x * y,
    )
}

fn op_div(stack: &mut dyn StackMachine) -> Result<(), ScriptError> {
    arith(
        stack,
        "/",
        |x, y| {
            if y == 0 {
                return Err(ScriptError::DivisionByZero);
            }
            x.checked_div(y).ok_or(ScriptError::Overflow("/"))
        },
        |x, y| x / y,
    )
}

fn op_dup(stack: &mut dyn StackMachine) -> Result<(), ScriptError> {
    need(stack, "DUP", 1)?;
    let top = stack.pop()?;
    stack.push(top.clone());
    stack.push(top);
    Ok(())
}

fn op_drop(stack: &mut dyn StackMachine) -> Result<(), ScriptError> {
    need(stack, "DROP", 1)?;
    stack.pop().map(drop)
}

fn op_swap(stack: &mut dyn StackMachine) -> Result<(), ScriptError> {
    let (a, b) = pop2(stack, "SWAP")?;
    stack.push(b);
    stack.push(a);
    Ok(())
}

fn op_clear(stack: &mut dyn StackMachine) -> Result<(), ScriptError> {
    stack.clear();
    Ok(())
}

fn op_depth(stack: &mut dyn StackMachine) -> Result<(), ScriptError> {
    let depth = stack.depth() as i64;
    stack.push(Value::Long(depth));
    Ok(())
}

fn op_eval(stack: &mut dyn StackMachine) -> Result<(), ScriptError> {
    need(stack, "EVAL", 1)?;
    match stack.pop()? {
        Value::Macro(code) => stack.exec(&code),
        other => Err(ScriptError::TypeMismatch {
            op: "EVAL",
            expected: "macro",
            got: other.type_name(),
        }),
    }
}

fn op_fail(stack: &mut dyn StackMachine) -> Result<(), ScriptError> {
    let message = match stack.pop() {
        Ok(Value::Str(s)) => s.to_string(),
        Ok(other) => other.to_string(),
        Err(_) => "FAIL".to_string(),
    };
    Err(ScriptError::Fault(message))
}

fn op_noop(_stack: &mut dyn StackMachine) -> Result<(), ScriptError> {
    Ok(())
}

fn op_now(stack: &mut dyn StackMachine) -> Result<(), ScriptError> {
    let micros = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0);
    stack.push(Value::Long(micros));
    Ok(())
}

fn op_sleep(stack: &mut dyn StackMachine) -> Result<(), ScriptError> {
    need(stack, "SLEEP", 1)?;
    match stack.pop()? {
        Value::Long(ms) if ms >= 0 => {
            std::thread::sleep(Duration::from_millis(ms as u64));
            Ok(())
        }
        Value::Long(ms) => Err(ScriptError::Fault(format!("SLEEP: negative duration {ms}"))),
        other => Err(ScriptError::TypeMismatch {
            op: "SLEEP",
            expected: "long",
            got: other.type_name(),
        }),
    }
}

fn op_concat_named(stack: &mut dyn StackMachine, op: &'static str) -> Result<(), ScriptError> {
    let (a, b) = pop2(stack, op)?;
    match (&a, &b) {
        (Value::Str(x), Value::Str(y)) => {
            let mut joined = String::with_capacity(x.len() + y.len());
            joined.push_str(x);
            joined.push_str(y);
            stack.push(Value::from(joined));
            Ok(())
        }
        (Value::Str(_), other) | (other, _) => Err(ScriptError::TypeMismatch {
            op,
            expected: "strings",
            got: other.type_name(),
        }),
    }
}

fn op_concat(stack: &mut dyn StackMachine) -> Result<(), ScriptError> {
    op_concat_named(stack, "CONCAT")
}

fn op_size(stack: &mut dyn StackMachine) -> Result<(), ScriptError> {
    need(stack, "SIZE", 1)?;
    let size = match stack.pop()? {
        Value::Str(s) => s.chars().count(),
        Value::List(items) => items.len(),
        Value::Map(entries) => entries.len(),
        Value::Macro(code) => code.len(),
        other => {
            return Err(ScriptError::TypeMismatch {
                op: "SIZE",
                expected: "string, list, map or macro",
                got: other.type_name(),
            });
        }
    };
    stack.push(Value::Long(size as i64));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::MemoryStack;

    fn run(values: Vec<Value>, op: Operation) -> Result<MemoryStack, ScriptError> {
        let mut stack = MemoryStack::new();
        for v in values {
            stack.push(v);
        }
        op.apply(&mut stack)?;
        Ok(stack)
    }

    #[test]
    fn test_arithmetic_promotes_to_double() {
        let stack = run(vec![Value::Long(1), Value::Double(0.5)], ADD).unwrap();
        assert_eq!(stack.values(), &[Value::Double(1.5)]);
        let stack = run(vec![Value::Long(7), Value::Long(2)], DIV).unwrap();
        assert_eq!(stack.values(), &[Value::Long(3)]);
    }

    #[test]
    fn test_division_by_zero() {
        let err = run(vec![Value::Long(1), Value::Long(0)], DIV).unwrap_err();
        assert_eq!(err, ScriptError::DivisionByZero);
    }

    #[test]
    fn test_overflow_is_a_fault() {
        let err = run(vec![Value::Long(i64::MAX), Value::Long(1)], ADD).unwrap_err();
        assert_eq!(err, ScriptError::Overflow("+"));
    }

    #[test]
    fn test_type_mismatch_names_operand() {
        let err = run(vec![Value::Long(1), Value::Bool(true)], MUL).unwrap_err();
        assert_eq!(
            err,
            ScriptError::TypeMismatch {
                op: "*",
                expected: "numbers",
                got: "boolean"
            }
        );
    }

    #[test]
    fn test_plus_concatenates_strings() {
        let stack = run(vec![Value::from("ab"), Value::from("cd")], ADD).unwrap();
        assert_eq!(stack.values(), &[Value::from("abcd")]);
    }

    #[test]
    fn test_underflow() {
        let err = run(vec![Value::Long(1)], SWAP).unwrap_err();
        assert_eq!(
            err,
            ScriptError::Underflow {
                op: "SWAP",
                needed: 2,
                depth: 1
            }
        );
    }

    #[test]
    fn test_fail_raises_top_string() {
        let err = run(vec![Value::from("boom")], FAIL).unwrap_err();
        assert_eq!(err, ScriptError::Fault("boom".to_string()));
    }

    #[test]
    fn test_stack_shuffling() {
        let stack = run(vec![Value::Long(1), Value::Long(2)], SWAP).unwrap();
        assert_eq!(stack.values(), &[Value::Long(2), Value::Long(1)]);
        let stack = run(vec![Value::Long(1)], DUP).unwrap();
        assert_eq!(stack.values(), &[Value::Long(1), Value::Long(1)]);
        let stack = run(vec![Value::Long(1), Value::Long(2)], DEPTH).unwrap();
        assert_eq!(stack.peek(), Some(&Value::Long(2)));
        let stack = run(vec![Value::Long(1), Value::Long(2)], CLEAR).unwrap();
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn test_size() {
        let stack = run(vec![Value::List(vec![Value::Null, Value::Null])], SIZE).unwrap();
        assert_eq!(stack.values(), &[Value::Long(2)]);
    }
}
