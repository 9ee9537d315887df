//! Snapshot text format
//!
//! Whitespace separated tokens:
//!
//! ```text
//! <% 1 1 + %>            macro
//! [ 1 2.0 'a%20b' ]      list, strings are percent-encoded between quotes
//! { 'k' NULL 'm' <% %> } map, alternating keys and values
//! ```
//!
//! Doubles always carry a `.` or an exponent (`NaN`, `Infinity` and `-Infinity`
//! aside) so they restore as doubles. Operation names resolve through a
//! [`Registry`] and are only legal inside a macro.

use crate::registry::Registry;
use crate::value::{Macro, Step, Value};
use std::fmt::Write;
use thiserror::Error;

/// Failure to restore snapshot text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    /// Name not present in the registry
    #[error("unknown operation '{0}'")]
    UnknownOperation(String),

    /// Token looked numeric but did not parse
    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    /// Broken quoting or percent-encoding
    #[error("invalid string literal {0}")]
    InvalidString(String),

    /// Closing token without a matching opener
    #[error("unexpected '{0}'")]
    Unexpected(String),

    /// Input ended inside a macro, list or map
    #[error("unterminated {0}")]
    Unterminated(&'static str),

    /// Map with a dangling key
    #[error("map has a key without a value")]
    OddMap,

    /// Operation in a list, map or at top level
    #[error("operation '{0}' is only allowed inside a macro")]
    OperationOutsideMacro(String),

    /// Expected one value, found a different count
    #[error("expected a single value, found {0}")]
    ExpectedSingleValue(usize),

    /// Value of the wrong type
    #[error("expected a {expected}, found a {found}")]
    WrongType {
        /// Wanted type
        expected: &'static str,
        /// Restored type
        found: &'static str,
    },
}

/// Snapshot text of one value.
pub fn encode_value(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

/// Snapshot text of a macro.
pub fn encode_macro(code: &Macro) -> String {
    let mut out = String::new();
    write_macro(&mut out, code);
    out
}

/// Snapshot text of a sequence of values, bottom of the stack first.
pub fn encode_values(values: &[Value]) -> String {
    let mut out = String::new();
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        write_value(&mut out, value);
    }
    out
}

fn write_double(out: &mut String, d: f64) {
    if d.is_nan() {
        out.push_str("NaN");
    } else if d.is_infinite() {
        out.push_str(if d > 0.0 { "Infinity" } else { "-Infinity" });
    } else {
        let _ = write!(out, "{d:?}");
    }
}

fn write_macro(out: &mut String, code: &Macro) {
    out.push_str("<%");
    for step in code.steps() {
        out.push(' ');
        match step {
            Step::Literal(value) => write_value(out, value),
            Step::Op(op) => out.push_str(op.name()),
        }
    }
    out.push_str(" %>");
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("NULL"),
        Value::Long(n) => {
            let _ = write!(out, "{n}");
        }
        Value::Double(d) => write_double(out, *d),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Str(s) => {
            out.push('\'');
            out.push_str(&urlencoding::encode(s));
            out.push('\'');
        }
        Value::List(items) => {
            out.push('[');
            for item in items {
                out.push(' ');
                write_value(out, item);
            }
            out.push_str(" ]");
        }
        Value::Map(entries) => {
            out.push('{');
            for (k, v) in entries {
                out.push(' ');
                write_value(out, k);
                out.push(' ');
                write_value(out, v);
            }
            out.push_str(" }");
        }
        Value::Macro(code) => write_macro(out, code),
    }
}

/// Restore a sequence of values.
pub fn decode_values(text: &str, registry: &Registry) -> Result<Vec<Value>, SnapshotError> {
    let mut parser = Parser {
        tokens: text.split_whitespace(),
        registry,
    };
    let steps = parser.sequence(None)?;
    literals(steps)
}

/// Restore exactly one value.
pub fn decode_value(text: &str, registry: &Registry) -> Result<Value, SnapshotError> {
    let mut values = decode_values(text, registry)?;
    if values.len() != 1 {
        return Err(SnapshotError::ExpectedSingleValue(values.len()));
    }
    Ok(values.remove(0))
}

/// Restore exactly one macro.
pub fn decode_macro(text: &str, registry: &Registry) -> Result<Macro, SnapshotError> {
    match decode_value(text, registry)? {
        Value::Macro(code) => Ok(code),
        other => Err(SnapshotError::WrongType {
            expected: "macro",
            found: other.type_name(),
        }),
    }
}

fn literals(steps: Vec<Step>) -> Result<Vec<Value>, SnapshotError> {
    steps
        .into_iter()
        .map(|step| match step {
            Step::Literal(value) => Ok(value),
            Step::Op(op) => Err(SnapshotError::OperationOutsideMacro(op.name().to_string())),
        })
        .collect()
}

struct Parser<'a> {
    tokens: std::str::SplitWhitespace<'a>,
    registry: &'a Registry,
}

impl Parser<'_> {
    fn sequence(&mut self, close: Option<(&'static str, &'static str)>) -> Result<Vec<Step>, SnapshotError> {
        let mut steps = Vec::new();
        loop {
            let Some(token) = self.tokens.next() else {
                return match close {
                    None => Ok(steps),
                    Some((_, what)) => Err(SnapshotError::Unterminated(what)),
                };
            };
            if close.is_some_and(|(c, _)| c == token) {
                return Ok(steps);
            }
            let step = match token {
                "<%" => Step::Literal(Value::Macro(Macro::new(
                    self.sequence(Some(("%>", "macro")))?,
                ))),
                "[" => Step::Literal(Value::List(literals(self.sequence(Some(("]", "list")))?)?)),
                "{" => {
                    let flat = literals(self.sequence(Some(("}", "map")))?)?;
                    if flat.len() % 2 != 0 {
                        return Err(SnapshotError::OddMap);
                    }
                    let mut entries = Vec::with_capacity(flat.len() / 2);
                    let mut iter = flat.into_iter();
                    while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
                        entries.push((k, v));
                    }
                    Step::Literal(Value::Map(entries))
                }
                "%>" | "]" | "}" => return Err(SnapshotError::Unexpected(token.to_string())),
                _ => self.atom(token)?,
            };
            steps.push(step);
        }
    }

    fn atom(&self, token: &str) -> Result<Step, SnapshotError> {
        let value = match token {
            "NULL" => Value::Null,
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            "NaN" => Value::Double(f64::NAN),
            "Infinity" => Value::Double(f64::INFINITY),
            "-Infinity" => Value::Double(f64::NEG_INFINITY),
            _ if token.starts_with('\'') => {
                if token.len() < 2 || !token.ends_with('\'') {
                    return Err(SnapshotError::InvalidString(token.to_string()));
                }
                let decoded = urlencoding::decode(&token[1..token.len() - 1])
                    .map_err(|_| SnapshotError::InvalidString(token.to_string()))?;
                Value::from(decoded.into_owned())
            }
            _ if looks_numeric(token) => {
                if token.contains(['.', 'e', 'E']) {
                    token
                        .parse::<f64>()
                        .map(Value::Double)
                        .map_err(|_| SnapshotError::InvalidNumber(token.to_string()))?
                } else {
                    token
                        .parse::<i64>()
                        .map(Value::Long)
                        .map_err(|_| SnapshotError::InvalidNumber(token.to_string()))?
                }
            }
            _ => {
                return self
                    .registry
                    .lookup(token)
                    .map(Step::Op)
                    .ok_or_else(|| SnapshotError::UnknownOperation(token.to_string()));
            }
        };
        Ok(Step::Literal(value))
    }
}

fn looks_numeric(token: &str) -> bool {
    let digits = token.strip_prefix(['+', '-']).unwrap_or(token);
    digits.starts_with(|c: char| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops;
    use crate::stack::{MemoryStack, StackMachine};

    fn registry() -> Registry {
        Registry::builtins()
    }

    #[test]
    fn test_macro_roundtrip_executes_identically() {
        let code = decode_macro("<% 1 1 + 2.5 * 'x%20y' SWAP %>", &registry()).unwrap();
        let text = encode_macro(&code);
        let restored = decode_macro(&text, &registry()).unwrap();
        assert_eq!(restored, code);

        let mut a = MemoryStack::new();
        let mut b = MemoryStack::new();
        a.exec(&code).unwrap();
        b.exec(&restored).unwrap();
        assert_eq!(a.values(), b.values());
        assert_eq!(a.values(), &[Value::from("x y"), Value::Double(5.0)]);
    }

    #[test]
    fn test_nested_structures() {
        let text = "{ 'macro' <% [ 1 { 'a' NULL } ] DROP %> 'flag' true }";
        let value = decode_value(text, &registry()).unwrap();
        let code = value.get("macro").and_then(Value::as_macro).unwrap();
        assert_eq!(code.len(), 2);
        assert_eq!(code.steps()[1], Step::Op(ops::DROP));
        assert_eq!(value.get("flag"), Some(&Value::Bool(true)));
        assert_eq!(encode_value(&value), text);
    }

    #[test]
    fn test_doubles_stay_doubles() {
        for d in [1.0, -0.5, 1e300, 1e-7, f64::INFINITY, f64::NEG_INFINITY] {
            let text = encode_value(&Value::Double(d));
            assert_eq!(decode_value(&text, &registry()).unwrap(), Value::Double(d), "{text}");
        }
        let nan = decode_value(&encode_value(&Value::Double(f64::NAN)), &registry()).unwrap();
        assert!(matches!(nan, Value::Double(d) if d.is_nan()));
    }

    #[test]
    fn test_strings_with_reserved_characters() {
        let original = Value::from("it's <% a %> { test }\n");
        let text = encode_value(&original);
        assert_eq!(text.split_whitespace().count(), 1);
        assert_eq!(decode_value(&text, &registry()).unwrap(), original);
        assert_eq!(decode_value("''", &registry()).unwrap(), Value::from(""));
    }

    #[test]
    fn test_minus_is_an_operation() {
        let code = decode_macro("<% 3 -1 - %>", &registry()).unwrap();
        assert_eq!(code.steps()[1], Step::Literal(Value::Long(-1)));
        assert_eq!(code.steps()[2], Step::Op(ops::SUB));
    }

    #[test]
    fn test_errors() {
        let r = registry();
        assert_eq!(
            decode_macro("<% 1 NOW %>", &r),
            Err(SnapshotError::UnknownOperation("NOW".to_string()))
        );
        assert_eq!(decode_value("<% 1", &r), Err(SnapshotError::Unterminated("macro")));
        assert_eq!(decode_value("[ 1 ] ]", &r), Err(SnapshotError::Unexpected("]".to_string())));
        assert_eq!(decode_value("{ 'a' }", &r), Err(SnapshotError::OddMap));
        assert_eq!(
            decode_value("[ DUP ]", &r),
            Err(SnapshotError::OperationOutsideMacro("DUP".to_string()))
        );
        assert_eq!(
            decode_value("99999999999999999999", &r),
            Err(SnapshotError::InvalidNumber("99999999999999999999".to_string()))
        );
        assert_eq!(decode_value("1 2", &r), Err(SnapshotError::ExpectedSingleValue(2)));
    }
}
