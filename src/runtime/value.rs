//! Runtime values and their coercion rules

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

use super::state::{Cycler, Joiner, LoopState, Namespace};
use crate::error::{CallError, Error, Result};
use crate::macros::Macro;

/// Keyword arguments passed to filters and functions
pub type Kwargs = IndexMap<String, Value>;

/// Signature of a global function callable from templates
pub type FunctionFn = dyn Fn(&[Value], &Kwargs) -> Result<Value, CallError> + Send + Sync;

/// Upper bound on the size of strings and lists built by `*` repetition
/// or grown by size arguments of filters
pub(crate) const MAX_REPEAT_LEN: usize = 64 * 1024 * 1024;

// ============================================================================
// Value
// ============================================================================

/// A value flowing through template evaluation
#[derive(Clone, Default)]
pub enum Value {
    /// Result of looking up a missing name or attribute
    #[default]
    Undefined,
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// A string that is already HTML-escaped or marked safe
    Safe(String),
    Seq(Arc<Vec<Value>>),
    Map(Arc<IndexMap<String, Value>>),
    Namespace(Namespace),
    Callable(Callable),
}

/// Values that can be called from template expressions
#[derive(Clone)]
pub enum Callable {
    Macro(Arc<Macro>),
    Function {
        name: String,
        func: Arc<FunctionFn>,
    },
    Cycler(Arc<Cycler>),
    Joiner(Arc<Joiner>),
    Loop(Arc<LoopState>),
}

impl Callable {
    pub fn name(&self) -> &str {
        match self {
            Callable::Macro(m) => &m.def.name,
            Callable::Function { name, .. } => name,
            Callable::Cycler(_) => "cycler",
            Callable::Joiner(_) => "joiner",
            Callable::Loop(_) => "loop",
        }
    }

    fn same(&self, other: &Callable) -> bool {
        match (self, other) {
            (Callable::Macro(a), Callable::Macro(b)) => Arc::ptr_eq(a, b),
            (Callable::Function { func: a, .. }, Callable::Function { func: b, .. }) => {
                Arc::ptr_eq(a, b)
            }
            (Callable::Cycler(a), Callable::Cycler(b)) => Arc::ptr_eq(a, b),
            (Callable::Joiner(a), Callable::Joiner(b)) => Arc::ptr_eq(a, b),
            (Callable::Loop(a), Callable::Loop(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callable::Macro(m) => write!(f, "<macro {}>", m.def.name),
            Callable::Function { name, .. } => write!(f, "<function {}>", name),
            Callable::Cycler(_) => write!(f, "<cycler>"),
            Callable::Joiner(_) => write!(f, "<joiner>"),
            Callable::Loop(_) => write!(f, "<loop>"),
        }
    }
}

impl Value {
    /// Wrap a plain function as a callable value
    pub fn function<F>(name: &str, func: F) -> Value
    where
        F: Fn(&[Value], &Kwargs) -> Result<Value, CallError> + Send + Sync + 'static,
    {
        Value::Callable(Callable::Function {
            name: name.to_string(),
            func: Arc::new(func),
        })
    }

    /// A string that will not be escaped on output
    pub fn safe(s: impl Into<String>) -> Value {
        Value::Safe(s.into())
    }

    pub fn from_seq(items: Vec<Value>) -> Value {
        Value::Seq(Arc::new(items))
    }

    pub fn from_map(map: IndexMap<String, Value>) -> Value {
        Value::Map(Arc::new(map))
    }

    /// Convert any serializable Rust value
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Value> {
        serde_json::to_value(value)
            .map(|json| Value::from_json(&json))
            .map_err(|e| Error::invalid(format!("cannot convert value: {}", e)))
    }

    /// Convert from serde_json::Value
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::None,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(0.0)),
            },
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(arr) => {
                Value::from_seq(arr.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(obj) => Value::from_map(
                obj.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert to serde_json::Value
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Name of the value's type as used in error messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::None => "none",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) | Value::Safe(_) => "string",
            Value::Seq(_) => "sequence",
            Value::Map(_) => "mapping",
            Value::Namespace(_) => "namespace",
            Value::Callable(_) => "callable",
        }
    }

    /// Truthiness: none, undefined, zero and empty containers are false
    pub fn is_true(&self) -> bool {
        match self {
            Value::Undefined | Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(n) => *n != 0.0,
            Value::String(s) | Value::Safe(s) => !s.is_empty(),
            Value::Seq(items) => !items.is_empty(),
            Value::Map(map) => !map.is_empty(),
            Value::Namespace(_) | Value::Callable(_) => true,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn is_safe(&self) -> bool {
        matches!(self, Value::Safe(_))
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Safe(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_seq(&self) -> Option<&[Value]> {
        match self {
            Value::Seq(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Length of strings (in characters), sequences and mappings
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::String(s) | Value::Safe(s) => Some(s.chars().count()),
            Value::Seq(items) => Some(items.len()),
            Value::Map(map) => Some(map.len()),
            Value::Namespace(ns) => Some(ns.snapshot().len()),
            Value::Undefined => Some(0),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    /// Python-like literal form used inside sequences and mappings
    pub fn repr(&self) -> String {
        match self {
            Value::String(s) | Value::Safe(s) => {
                format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
            }
            Value::None => "none".to_string(),
            Value::Undefined => "undefined".to_string(),
            other => other.to_string(),
        }
    }

    /// Items produced when iterating the value
    pub fn try_iter(&self) -> Result<Vec<Value>> {
        match self {
            Value::Seq(items) => Ok(items.as_ref().clone()),
            Value::Map(map) => Ok(map.keys().map(|k| Value::String(k.clone())).collect()),
            Value::String(s) | Value::Safe(s) => {
                Ok(s.chars().map(|c| Value::String(c.to_string())).collect())
            }
            Value::Undefined => Ok(Vec::new()),
            other => Err(Error::invalid(format!(
                "'{}' object is not iterable",
                other.kind_name()
            ))),
        }
    }

    /// Attribute lookup (`value.name`)
    pub fn get_attr(&self, name: &str) -> Option<Value> {
        match self {
            Value::Map(map) => map.get(name).cloned(),
            Value::Namespace(ns) => ns.get(name),
            Value::Callable(Callable::Loop(state)) => state.attr(name),
            Value::Callable(Callable::Cycler(cycler)) if name == "current" => {
                Some(cycler.current())
            }
            _ => None,
        }
    }

    /// Subscript lookup (`value[key]`)
    pub fn get_item(&self, key: &Value) -> Option<Value> {
        match (self, key) {
            (Value::Seq(items), _) => {
                let idx = normalize_index(key.as_i64()?, items.len())?;
                items.get(idx).cloned()
            }
            (Value::String(s) | Value::Safe(s), _) => {
                let len = s.chars().count();
                let idx = normalize_index(key.as_i64()?, len)?;
                s.chars().nth(idx).map(|c| Value::String(c.to_string()))
            }
            (Value::Map(map), _) => map.get(&key.key_string()).cloned(),
            (Value::Namespace(ns), _) => ns.get(&key.key_string()),
            _ => None,
        }
    }

    /// `value[start:stop:step]` with Python semantics
    pub fn slice(&self, start: Option<i64>, stop: Option<i64>, step: Option<i64>) -> Result<Value> {
        let step = step.unwrap_or(1);
        if step == 0 {
            return Err(Error::invalid("slice step cannot be zero"));
        }
        match self {
            Value::Seq(items) => {
                let picked = slice_indices(items.len(), start, stop, step)
                    .into_iter()
                    .map(|i| items[i].clone())
                    .collect();
                Ok(Value::from_seq(picked))
            }
            Value::String(s) | Value::Safe(s) => {
                let chars: Vec<char> = s.chars().collect();
                let picked: String = slice_indices(chars.len(), start, stop, step)
                    .into_iter()
                    .map(|i| chars[i])
                    .collect();
                Ok(if self.is_safe() {
                    Value::Safe(picked)
                } else {
                    Value::String(picked)
                })
            }
            Value::Undefined => Ok(Value::Undefined),
            other => Err(Error::invalid(format!(
                "'{}' object cannot be sliced",
                other.kind_name()
            ))),
        }
    }

    /// String form used as a mapping key
    pub fn key_string(&self) -> String {
        match self {
            Value::String(s) | Value::Safe(s) => s.clone(),
            other => other.to_string(),
        }
    }

    // ========================================================================
    // Operators
    // ========================================================================

    pub fn add(&self, other: &Value) -> Result<Value> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.checked_add(*b).map(Value::Int).ok_or_else(overflow),
            (Value::Seq(a), Value::Seq(b)) => {
                let mut items = a.as_ref().clone();
                items.extend(b.iter().cloned());
                Ok(Value::from_seq(items))
            }
            _ => {
                if let (Some(a), Some(b)) = (self.as_str(), other.as_str()) {
                    return Ok(Value::String(format!("{}{}", a, b)));
                }
                self.float_op(other, "+", |a, b| Ok(a + b))
            }
        }
    }

    pub fn sub(&self, other: &Value) -> Result<Value> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.checked_sub(*b).map(Value::Int).ok_or_else(overflow),
            _ => self.float_op(other, "-", |a, b| Ok(a - b)),
        }
    }

    pub fn mul(&self, other: &Value) -> Result<Value> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.checked_mul(*b).map(Value::Int).ok_or_else(overflow),
            (Value::String(s) | Value::Safe(s), Value::Int(n))
            | (Value::Int(n), Value::String(s) | Value::Safe(s)) => {
                let n = (*n).max(0) as usize;
                check_repeat(s.len(), n)?;
                Ok(Value::String(s.repeat(n)))
            }
            (Value::Seq(items), Value::Int(n)) | (Value::Int(n), Value::Seq(items)) => {
                let n = (*n).max(0) as usize;
                check_repeat(items.len(), n)?;
                let mut out = Vec::with_capacity(items.len() * n);
                for _ in 0..n {
                    out.extend(items.iter().cloned());
                }
                Ok(Value::from_seq(out))
            }
            _ => self.float_op(other, "*", |a, b| Ok(a * b)),
        }
    }

    /// True division, always producing a float
    pub fn div(&self, other: &Value) -> Result<Value> {
        self.float_op(other, "/", |a, b| {
            if b == 0.0 {
                Err(Error::invalid("division by zero"))
            } else {
                Ok(a / b)
            }
        })
    }

    /// Floor division, rounding toward negative infinity
    pub fn floor_div(&self, other: &Value) -> Result<Value> {
        match (self, other) {
            (Value::Int(_), Value::Int(0)) => Err(Error::invalid("integer division by zero")),
            (Value::Int(a), Value::Int(b)) => {
                let q = a.checked_div(*b).ok_or_else(overflow)?;
                if (a % b != 0) && ((*a < 0) != (*b < 0)) {
                    Ok(Value::Int(q - 1))
                } else {
                    Ok(Value::Int(q))
                }
            }
            _ => self.float_op(other, "//", |a, b| {
                if b == 0.0 {
                    Err(Error::invalid("float floor division by zero"))
                } else {
                    Ok((a / b).floor())
                }
            }),
        }
    }

    /// Modulo with the sign of the divisor
    pub fn rem(&self, other: &Value) -> Result<Value> {
        match (self, other) {
            (Value::Int(_), Value::Int(0)) => Err(Error::invalid("integer modulo by zero")),
            (Value::Int(a), Value::Int(b)) => {
                let r = a.checked_rem(*b).ok_or_else(overflow)?;
                if r != 0 && ((r < 0) != (*b < 0)) {
                    Ok(Value::Int(r + b))
                } else {
                    Ok(Value::Int(r))
                }
            }
            _ => self.float_op(other, "%", |a, b| {
                if b == 0.0 {
                    Err(Error::invalid("float modulo by zero"))
                } else {
                    Ok(a - b * (a / b).floor())
                }
            }),
        }
    }

    pub fn pow(&self, other: &Value) -> Result<Value> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) if *b >= 0 => {
                let exp = u32::try_from(*b).map_err(|_| overflow())?;
                a.checked_pow(exp).map(Value::Int).ok_or_else(overflow)
            }
            _ => self.float_op(other, "**", |a, b| Ok(a.powf(b))),
        }
    }

    pub fn neg(&self) -> Result<Value> {
        match self {
            Value::Int(n) => n.checked_neg().map(Value::Int).ok_or_else(overflow),
            Value::Float(f) => Ok(Value::Float(-f)),
            other => Err(Error::invalid(format!(
                "bad operand type for unary -: '{}'",
                other.kind_name()
            ))),
        }
    }

    pub fn pos(&self) -> Result<Value> {
        match self {
            Value::Int(_) | Value::Float(_) => Ok(self.clone()),
            other => Err(Error::invalid(format!(
                "bad operand type for unary +: '{}'",
                other.kind_name()
            ))),
        }
    }

    fn float_op<F>(&self, other: &Value, op: &str, f: F) -> Result<Value>
    where
        F: Fn(f64, f64) -> Result<f64>,
    {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => f(a, b).map(Value::Float),
            _ => Err(Error::invalid(format!(
                "unsupported operand types for {}: '{}' and '{}'",
                op,
                self.kind_name(),
                other.kind_name()
            ))),
        }
    }

    /// Equality: numbers compare across int and float, other types only with themselves
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Undefined, Value::Undefined) | (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Seq(a), Value::Seq(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.loose_eq(y))
            }
            (Value::Map(a), Value::Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).map(|w| v.loose_eq(w)).unwrap_or(false))
            }
            (Value::Namespace(a), Value::Namespace(b)) => a.ptr_eq(b),
            (Value::Callable(a), Value::Callable(b)) => a.same(b),
            _ => {
                if let (Some(a), Some(b)) = (self.as_str(), other.as_str()) {
                    return a == b;
                }
                match (self, other) {
                    (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                        self.as_f64() == other.as_f64()
                    }
                    _ => false,
                }
            }
        }
    }

    /// Ordering; comparing unrelated types is an error
    pub fn compare(&self, other: &Value) -> Result<Ordering> {
        let unsupported = || {
            Error::invalid(format!(
                "'<' not supported between '{}' and '{}'",
                self.kind_name(),
                other.kind_name()
            ))
        };
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                let (a, b) = (self.as_f64(), other.as_f64());
                a.partial_cmp(&b).ok_or_else(unsupported)
            }
            (Value::Bool(a), Value::Bool(b)) => Ok(a.cmp(b)),
            (Value::Seq(a), Value::Seq(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.compare(y)? {
                        Ordering::Equal => continue,
                        ord => return Ok(ord),
                    }
                }
                Ok(a.len().cmp(&b.len()))
            }
            _ => match (self.as_str(), other.as_str()) {
                (Some(a), Some(b)) => Ok(a.cmp(b)),
                _ => Err(unsupported()),
            },
        }
    }

    /// Membership test for `in`
    pub fn contains(&self, needle: &Value) -> Result<bool> {
        match self {
            Value::Seq(items) => Ok(items.iter().any(|item| item.loose_eq(needle))),
            Value::Map(map) => Ok(map.contains_key(&needle.key_string())),
            Value::Namespace(ns) => Ok(ns.get(&needle.key_string()).is_some()),
            Value::String(s) | Value::Safe(s) => match needle.as_str() {
                Some(n) => Ok(s.contains(n)),
                None => Err(Error::invalid(format!(
                    "'in <string>' requires string as left operand, not '{}'",
                    needle.kind_name()
                ))),
            },
            Value::Undefined => Ok(false),
            other => Err(Error::invalid(format!(
                "argument of type '{}' is not iterable",
                other.kind_name()
            ))),
        }
    }

    // ========================================================================
    // Built-in methods
    // ========================================================================

    /// Methods callable on mappings and strings (`d.items()`, `s.upper()`)
    pub fn call_method(&self, name: &str, args: &[Value]) -> Option<Result<Value>> {
        let arg_str = |i: usize| args.get(i).map(|v| v.key_string());
        let result = match self {
            Value::Map(map) => match name {
                "items" => Value::from_seq(
                    map.iter()
                        .map(|(k, v)| Value::from_seq(vec![Value::String(k.clone()), v.clone()]))
                        .collect(),
                ),
                "keys" => Value::from_seq(map.keys().map(|k| Value::String(k.clone())).collect()),
                "values" => Value::from_seq(map.values().cloned().collect()),
                "get" => {
                    let key = arg_str(0)?;
                    map.get(&key)
                        .cloned()
                        .unwrap_or_else(|| args.get(1).cloned().unwrap_or(Value::None))
                }
                _ => return None,
            },
            Value::String(s) | Value::Safe(s) => match name {
                "upper" => Value::String(s.to_uppercase()),
                "lower" => Value::String(s.to_lowercase()),
                "strip" => Value::String(match arg_str(0) {
                    Some(chars) => s.trim_matches(|c: char| chars.contains(c)).to_string(),
                    None => s.trim().to_string(),
                }),
                "lstrip" => Value::String(s.trim_start().to_string()),
                "rstrip" => Value::String(s.trim_end().to_string()),
                "title" => Value::String(crate::filters::string::title_case(s)),
                "capitalize" => Value::String(crate::filters::string::capitalize(s)),
                "startswith" => Value::Bool(s.starts_with(arg_str(0)?.as_str())),
                "endswith" => Value::Bool(s.ends_with(arg_str(0)?.as_str())),
                "replace" => {
                    let (from, to) = (arg_str(0)?, arg_str(1)?);
                    Value::String(s.replace(&from, &to))
                }
                "split" => {
                    let parts: Vec<Value> = match arg_str(0) {
                        Some(sep) if !sep.is_empty() => {
                            s.split(sep.as_str()).map(Value::from).collect()
                        }
                        _ => s.split_whitespace().map(Value::from).collect(),
                    };
                    Value::from_seq(parts)
                }
                "count" => {
                    let needle = arg_str(0)?;
                    Value::Int(s.matches(needle.as_str()).count() as i64)
                }
                _ => return None,
            },
            _ => return None,
        };
        Some(Ok(result))
    }
}

fn overflow() -> Error {
    Error::invalid("integer overflow")
}

pub(crate) fn check_repeat(len: usize, times: usize) -> Result<()> {
    match len.checked_mul(times) {
        Some(total) if total <= MAX_REPEAT_LEN => Ok(()),
        _ => Err(Error::invalid("repetition result too large")),
    }
}

fn normalize_index(idx: i64, len: usize) -> Option<usize> {
    let idx = if idx < 0 { idx + len as i64 } else { idx };
    if idx < 0 || idx >= len as i64 {
        None
    } else {
        Some(idx as usize)
    }
}

/// Indices selected by a Python slice over a sequence of `len` items
pub fn slice_indices(len: usize, start: Option<i64>, stop: Option<i64>, step: i64) -> Vec<usize> {
    let len = len as i64;
    let clamp = |v: i64, low: i64, high: i64| {
        let v = if v < 0 { v + len } else { v };
        v.clamp(low, high)
    };
    let mut out = Vec::new();
    if step > 0 {
        let mut i = start.map(|s| clamp(s, 0, len)).unwrap_or(0);
        let stop = stop.map(|s| clamp(s, 0, len)).unwrap_or(len);
        while i < stop {
            out.push(i as usize);
            match i.checked_add(step) {
                Some(next) => i = next,
                None => break,
            }
        }
    } else {
        let mut i = start.map(|s| clamp(s, -1, len - 1)).unwrap_or(len - 1);
        let stop = stop.map(|s| clamp(s, -1, len - 1)).unwrap_or(-1);
        while i > stop {
            out.push(i as usize);
            match i.checked_add(step) {
                Some(next) => i = next,
                None => break,
            }
        }
    }
    out
}

/// Float formatting: integral values keep a trailing `.0`
fn format_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        (if f > 0.0 { "inf" } else { "-inf" }).to_string()
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{:.1}", f)
    } else {
        f.to_string()
    }
}

// ============================================================================
// Formatting and conversions
// ============================================================================

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined | Value::None => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(n) => write!(f, "{}", format_float(*n)),
            Value::String(s) | Value::Safe(s) => write!(f, "{}", s),
            Value::Seq(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item.repr())?;
                }
                write!(f, "]")
            }
            Value::Map(map) => fmt_map(f, map),
            Value::Namespace(ns) => {
                write!(f, "namespace(")?;
                fmt_map(f, &ns.snapshot())?;
                write!(f, ")")
            }
            Value::Callable(c) => write!(f, "{:?}", c),
        }
    }
}

fn fmt_map(f: &mut fmt::Formatter<'_>, map: &IndexMap<String, Value>) -> fmt::Result {
    write!(f, "{{")?;
    for (i, (k, v)) in map.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}: {}", Value::String(k.clone()).repr(), v.repr())?;
    }
    write!(f, "}}")
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "Undefined"),
            Value::Safe(s) => write!(f, "Safe({:?})", s),
            other => write!(f, "{}", other.repr()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        self.loose_eq(other)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Undefined | Value::None | Value::Callable(_) => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(n) => serializer.serialize_i64(*n),
            Value::Float(n) => serializer.serialize_f64(*n),
            Value::String(s) | Value::Safe(s) => serializer.serialize_str(s),
            Value::Seq(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items.iter() {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(map) => serialize_map(serializer, map),
            Value::Namespace(ns) => serialize_map(serializer, &ns.snapshot()),
        }
    }
}

fn serialize_map<S: Serializer>(
    serializer: S,
    map: &IndexMap<String, Value>,
) -> std::result::Result<S::Ok, S::Error> {
    let mut out = serializer.serialize_map(Some(map.len()))?;
    for (k, v) in map {
        out.serialize_entry(k, v)?;
    }
    out.end()
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Int(n as i64)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::from_seq(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::None)
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(map: IndexMap<String, Value>) -> Self {
        Value::from_map(map)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        Value::from_json(&json)
    }
}

// ============================================================================
// Tests
// ============================================================================
