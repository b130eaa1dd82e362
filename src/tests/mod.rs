//! Built-in tests (`value is name(args)`)

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::CallError;
use crate::runtime::{Callable, Value};

/// Signature shared by built-in and user tests
pub type TestFn = dyn Fn(&Value, &[Value]) -> Result<bool, CallError> + Send + Sync;

type TestResult = Result<bool, CallError>;
type Builtin = fn(&Value, &[Value]) -> TestResult;

const BUILTINS: &[(&str, Builtin)] = &[
    ("defined", |v, _| Ok(!v.is_undefined())),
    ("undefined", |v, _| Ok(v.is_undefined())),
    ("none", |v, _| Ok(v.is_none())),
    ("boolean", |v, _| Ok(matches!(v, Value::Bool(_)))),
    ("true", |v, _| Ok(matches!(v, Value::Bool(true)))),
    ("false", |v, _| Ok(matches!(v, Value::Bool(false)))),
    ("string", |v, _| Ok(matches!(v, Value::String(_) | Value::Safe(_)))),
    ("number", |v, _| Ok(matches!(v, Value::Int(_) | Value::Float(_)))),
    ("integer", |v, _| Ok(matches!(v, Value::Int(_)))),
    ("float", |v, _| Ok(matches!(v, Value::Float(_)))),
    ("sequence", sequence),
    ("mapping", |v, _| Ok(matches!(v, Value::Map(_) | Value::Namespace(_)))),
    ("iterable", iterable),
    ("callable", |v, _| Ok(matches!(v, Value::Callable(_)))),
    ("even", even),
    ("odd", |v, args| even(v, args).map(|even| !even)),
    ("divisibleby", divisibleby),
    ("lower", lower),
    ("upper", upper),
    ("startswith", startswith),
    ("endswith", endswith),
    ("in", contained_in),
    ("eq", eq),
    ("equalto", eq),
    ("==", eq),
    ("ne", |v, args| eq(v, args).map(|eq| !eq)),
    ("!=", |v, args| eq(v, args).map(|eq| !eq)),
    ("lt", |v, args| ordering(v, args, |o| o == Ordering::Less)),
    ("<", |v, args| ordering(v, args, |o| o == Ordering::Less)),
    ("le", |v, args| ordering(v, args, |o| o != Ordering::Greater)),
    ("<=", |v, args| ordering(v, args, |o| o != Ordering::Greater)),
    ("gt", |v, args| ordering(v, args, |o| o == Ordering::Greater)),
    (">", |v, args| ordering(v, args, |o| o == Ordering::Greater)),
    ("ge", |v, args| ordering(v, args, |o| o != Ordering::Less)),
    (">=", |v, args| ordering(v, args, |o| o != Ordering::Less)),
    ("sameas", sameas),
    ("escaped", |v, _| Ok(v.is_safe())),
];

/// The test table a new environment starts with
pub fn builtin_tests() -> HashMap<String, Arc<TestFn>> {
    BUILTINS
        .iter()
        .map(|(name, test)| (name.to_string(), Arc::new(*test) as Arc<TestFn>))
        .collect()
}

fn operand<'a>(args: &'a [Value], test: &str) -> Result<&'a Value, CallError> {
    args.first()
        .ok_or_else(|| CallError::new(format!("'{}' needs an argument", test)))
}

fn text<'a>(value: &'a Value, test: &str) -> Result<&'a str, CallError> {
    value
        .as_str()
        .ok_or_else(|| CallError::new(format!("'{}' expects a string, got {}", test, value.kind_name())))
}

fn integer(value: &Value, test: &str) -> Result<i64, CallError> {
    match value {
        Value::Int(n) => Ok(*n),
        Value::Float(f) if f.fract() == 0.0 => Ok(*f as i64),
        other => Err(CallError::new(format!("'{}' expects an integer, got {}", test, other.kind_name()))),
    }
}

fn sequence(value: &Value, _: &[Value]) -> TestResult {
    Ok(matches!(
        value,
        Value::Seq(_) | Value::Map(_) | Value::String(_) | Value::Safe(_)
    ))
}

/// Undefined iterates as empty, so it counts as iterable
fn iterable(value: &Value, args: &[Value]) -> TestResult {
    Ok(value.is_undefined() || sequence(value, args)?)
}

fn even(value: &Value, _: &[Value]) -> TestResult {
    Ok(integer(value, "even")? % 2 == 0)
}

fn divisibleby(value: &Value, args: &[Value]) -> TestResult {
    let n = integer(value, "divisibleby")?;
    let d = integer(operand(args, "divisibleby")?, "divisibleby")?;
    if d == 0 {
        return Err(CallError::new("division by zero"));
    }
    Ok(n.checked_rem(d).map_or(true, |r| r == 0))
}

fn lower(value: &Value, _: &[Value]) -> TestResult {
    Ok(value
        .as_str()
        .map_or(false, |s| s.chars().any(char::is_alphabetic) && s == s.to_lowercase()))
}

fn upper(value: &Value, _: &[Value]) -> TestResult {
    Ok(value
        .as_str()
        .map_or(false, |s| s.chars().any(char::is_alphabetic) && s == s.to_uppercase()))
}

fn startswith(value: &Value, args: &[Value]) -> TestResult {
    let prefix = text(operand(args, "startswith")?, "startswith")?;
    Ok(text(value, "startswith")?.starts_with(prefix))
}

fn endswith(value: &Value, args: &[Value]) -> TestResult {
    let suffix = text(operand(args, "endswith")?, "endswith")?;
    Ok(text(value, "endswith")?.ends_with(suffix))
}

fn contained_in(value: &Value, args: &[Value]) -> TestResult {
    operand(args, "in")?
        .contains(value)
        .map_err(|e| CallError::new(e.to_string()))
}

fn eq(value: &Value, args: &[Value]) -> TestResult {
    Ok(value.loose_eq(operand(args, "eq")?))
}

fn ordering(value: &Value, args: &[Value], accept: fn(Ordering) -> bool) -> TestResult {
    let other = operand(args, "comparison")?;
    value
        .compare(other)
        .map(accept)
        .map_err(|e| CallError::new(e.to_string()))
}

/// Identity: shared containers must be the same allocation, scalars the
/// same type and value
fn sameas(value: &Value, args: &[Value]) -> TestResult {
    let other = operand(args, "sameas")?;
    Ok(match (value, other) {
        (Value::Seq(a), Value::Seq(b)) => Arc::ptr_eq(a, b),
        (Value::Map(a), Value::Map(b)) => Arc::ptr_eq(a, b),
        (Value::Namespace(a), Value::Namespace(b)) => a.ptr_eq(b),
        (Value::Callable(a), Value::Callable(b)) => same_callable(a, b),
        (Value::Undefined, Value::Undefined) | (Value::None, Value::None) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
        (Value::String(a), Value::String(b)) | (Value::Safe(a), Value::Safe(b)) => a == b,
        _ => false,
    })
}

fn same_callable(a: &Callable, b: &Callable) -> bool {
    match (a, b) {
        (Callable::Macro(a), Callable::Macro(b)) => Arc::ptr_eq(a, b),
        (Callable::Function { func: a, .. }, Callable::Function { func: b, .. }) => Arc::ptr_eq(a, b),
        (Callable::Cycler(a), Callable::Cycler(b)) => Arc::ptr_eq(a, b),
        (Callable::Joiner(a), Callable::Joiner(b)) => Arc::ptr_eq(a, b),
        (Callable::Loop(a), Callable::Loop(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(name: &str, value: Value, args: &[Value]) -> bool {
        let tests = builtin_tests();
        let test = tests.get(name).unwrap_or_else(|| panic!("no test {name}"));
        test(&value, args).unwrap()
    }

    #[test]
    fn test_type_tests() {
        assert!(check("defined", Value::None, &[]));
        assert!(check("undefined", Value::Undefined, &[]));
        assert!(check("number", Value::Float(1.0), &[]));
        assert!(!check("number", Value::Bool(true), &[]));
        assert!(check("string", Value::safe("x"), &[]));
        assert!(check("sequence", Value::from(vec![1]), &[]));
        assert!(!check("mapping", Value::from(vec![1]), &[]));
        assert!(check("true", Value::Bool(true), &[]));
        assert!(!check("true", Value::Int(1), &[]));
        assert!(check("escaped", Value::safe("<b>"), &[]));
    }

    #[test]
    fn test_number_tests() {
        assert!(check("even", Value::Int(4), &[]));
        assert!(check("odd", Value::Int(-3), &[]));
        assert!(check("divisibleby", Value::Int(9), &[Value::Int(3)]));
        let tests = builtin_tests();
        assert!(tests["divisibleby"](&Value::Int(1), &[Value::Int(0)]).is_err());
        assert!(tests["even"](&Value::from("x"), &[]).is_err());
    }

    #[test]
    fn test_comparison_aliases() {
        for name in ["eq", "equalto", "=="] {
            assert!(check(name, Value::Int(2), &[Value::Float(2.0)]));
        }
        assert!(check("!=", Value::Int(2), &[Value::Int(3)]));
        assert!(check("<", Value::Int(2), &[Value::Int(3)]));
        assert!(check(">=", Value::from("b"), &[Value::from("a")]));
        assert!(!check("gt", Value::Int(2), &[Value::Int(2)]));
    }

    #[test]
    fn test_string_tests() {
        assert!(check("lower", Value::from("abc 1"), &[]));
        assert!(!check("upper", Value::from("Abc"), &[]));
        assert!(check("startswith", Value::from("miya"), &[Value::from("mi")]));
        assert!(check("in", Value::from("b"), &[Value::from(vec!["a", "b"])]));
    }

    #[test]
    fn test_sameas() {
        let seq = Value::from(vec![1, 2]);
        assert!(check("sameas", seq.clone(), &[seq]));
        assert!(!check("sameas", Value::from(vec![1]), &[Value::from(vec![1])]));
        assert!(check("sameas", Value::None, &[Value::None]));
        assert!(!check("sameas", Value::Int(1), &[Value::Float(1.0)]));
    }
}
