//! Numeric filters

use super::collection::sort_by_key;
use super::{arg, bool_arg, int_arg, items_of, lookup_path, str_arg, FilterResult};
use crate::error::CallError;
use crate::runtime::{Kwargs, Value};

/// `sum(attribute=None, start=0)`
pub(crate) fn sum(value: &Value, args: &[Value], kwargs: &Kwargs) -> FilterResult {
    let attribute = str_arg(args, kwargs, 0, "attribute");
    let mut total = arg(args, kwargs, 1, "start").cloned().unwrap_or(Value::Int(0));
    for item in items_of(value)? {
        let item = match &attribute {
            Some(path) => lookup_path(&item, path),
            None => item,
        };
        total = total.add(&item).map_err(|e| CallError::new(e.to_string()))?;
    }
    Ok(total)
}

fn extreme(value: &Value, args: &[Value], kwargs: &Kwargs, largest: bool) -> FilterResult {
    let case_sensitive = bool_arg(args, kwargs, 0, "case_sensitive", false);
    let attribute = str_arg(args, kwargs, 1, "attribute");
    let mut sorted = sort_by_key(items_of(value)?, attribute.as_deref(), case_sensitive)?;
    let picked = if largest { sorted.pop() } else { sorted.into_iter().next() };
    Ok(picked.unwrap_or_default())
}

/// `min(case_sensitive=false, attribute=None)`
pub(crate) fn min(value: &Value, args: &[Value], kwargs: &Kwargs) -> FilterResult {
    extreme(value, args, kwargs, false)
}

/// `max(case_sensitive=false, attribute=None)`
pub(crate) fn max(value: &Value, args: &[Value], kwargs: &Kwargs) -> FilterResult {
    extreme(value, args, kwargs, true)
}

pub(crate) fn abs(value: &Value, _: &[Value], _: &Kwargs) -> FilterResult {
    match value {
        Value::Int(n) => n
            .checked_abs()
            .map(Value::Int)
            .ok_or_else(|| CallError::new("integer overflow")),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        Value::Bool(b) => Ok(Value::Int(*b as i64)),
        other => Err(CallError::new(format!("abs expects a number, got {}", other.kind_name()))),
    }
}

/// `round(precision=0, method='common')`; the result is always a float
pub(crate) fn round(value: &Value, args: &[Value], kwargs: &Kwargs) -> FilterResult {
    let number = value
        .as_f64()
        .ok_or_else(|| CallError::new(format!("round expects a number, got {}", value.kind_name())))?;
    let precision = int_arg(args, kwargs, 0, "precision", 0)?;
    let method = str_arg(args, kwargs, 1, "method").unwrap_or_else(|| "common".to_string());
    let factor = 10f64.powi(precision.clamp(-300, 300) as i32);
    let scaled = number * factor;
    let rounded = match method.as_str() {
        "common" => scaled.round(),
        "ceil" => scaled.ceil(),
        "floor" => scaled.floor(),
        other => return Err(CallError::new(format!("unknown rounding method '{}'", other))),
    };
    Ok(Value::Float(rounded / factor))
}

/// `int(default=0, base=10)`; strings like "3.7" truncate, unparsable input
/// yields the default
pub(crate) fn int(value: &Value, args: &[Value], kwargs: &Kwargs) -> FilterResult {
    let default = arg(args, kwargs, 0, "default").cloned().unwrap_or(Value::Int(0));
    let base = int_arg(args, kwargs, 1, "base", 10)?;
    if !(2..=36).contains(&base) {
        return Err(CallError::new("base must be between 2 and 36"));
    }
    let parsed = match value {
        Value::Int(n) => Some(*n),
        Value::Float(f) if f.is_finite() => Some(f.trunc() as i64),
        Value::Bool(b) => Some(*b as i64),
        Value::String(s) | Value::Safe(s) => {
            let s = s.trim().replace('_', "");
            let digits = match base {
                16 => s.trim_start_matches("0x").trim_start_matches("0X"),
                8 => s.trim_start_matches("0o").trim_start_matches("0O"),
                2 => s.trim_start_matches("0b").trim_start_matches("0B"),
                _ => s.as_str(),
            };
            i64::from_str_radix(digits, base as u32).ok().or_else(|| {
                if base != 10 {
                    return None;
                }
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map(|f| f.trunc() as i64)
            })
        }
        _ => None,
    };
    Ok(parsed.map(Value::Int).unwrap_or(default))
}

/// `float(default=0.0)`
pub(crate) fn float(value: &Value, args: &[Value], kwargs: &Kwargs) -> FilterResult {
    let default = arg(args, kwargs, 0, "default").cloned().unwrap_or(Value::Float(0.0));
    let parsed = match value {
        Value::Int(n) => Some(*n as f64),
        Value::Float(f) => Some(*f),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) | Value::Safe(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    Ok(parsed.map(Value::Float).unwrap_or(default))
}

/// `filesizeformat(binary=false)`: "13.0 kB", "1.0 MiB", "1 Byte"
pub(crate) fn filesizeformat(value: &Value, args: &[Value], kwargs: &Kwargs) -> FilterResult {
    let bytes = value
        .as_f64()
        .ok_or_else(|| CallError::new(format!("filesizeformat expects a number, got {}", value.kind_name())))?;
    let binary = bool_arg(args, kwargs, 0, "binary", false);
    let (base, prefixes): (f64, [&str; 8]) = if binary {
        (1024.0, ["KiB", "MiB", "GiB", "TiB", "PiB", "EiB", "ZiB", "YiB"])
    } else {
        (1000.0, ["kB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"])
    };

    if bytes == 1.0 {
        return Ok(Value::from("1 Byte"));
    }
    if bytes < base {
        return Ok(Value::String(format!("{} Bytes", bytes as i64)));
    }
    let mut unit = base;
    for prefix in prefixes {
        unit *= base;
        if bytes < unit {
            return Ok(Value::String(format!("{:.1} {}", base * bytes / unit, prefix)));
        }
    }
    Ok(Value::String(format!("{:.1} {}", base * bytes / unit, prefixes[7])))
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn k() -> Kwargs {
        Kwargs::new()
    }

    #[test]
    fn test_sum_min_max() {
        let seq = Value::from_seq(vec![Value::Int(3), Value::Float(1.5), Value::Int(2)]);
        assert_eq!(sum(&seq, &[], &k()).unwrap(), Value::Float(6.5));
        assert_eq!(min(&seq, &[], &k()).unwrap(), Value::Float(1.5));
        assert_eq!(max(&seq, &[], &k()).unwrap(), Value::Int(3));
        assert!(max(&Value::from_seq(vec![]), &[], &k()).unwrap().is_undefined());

        let mut row = IndexMap::new();
        row.insert("price".to_string(), Value::Int(4));
        let rows = Value::from_seq(vec![Value::from_map(row.clone()), Value::from_map(row)]);
        let mut kwargs = Kwargs::new();
        kwargs.insert("attribute".into(), Value::from("price"));
        assert_eq!(sum(&rows, &[], &kwargs).unwrap(), Value::Int(8));
    }

    #[test]
    fn test_round() {
        assert_eq!(round(&Value::Float(2.5), &[], &k()).unwrap(), Value::Float(3.0));
        assert_eq!(round(&Value::Float(3.14159), &[Value::Int(2)], &k()).unwrap(), Value::Float(3.14));
        assert_eq!(
            round(&Value::Float(2.1), &[Value::Int(0), Value::from("ceil")], &k()).unwrap(),
            Value::Float(3.0)
        );
        assert!(round(&Value::from("x"), &[], &k()).is_err());
    }

    #[test]
    fn test_int_and_float() {
        assert_eq!(int(&Value::from("42"), &[], &k()).unwrap(), Value::Int(42));
        assert_eq!(int(&Value::from("3.7"), &[], &k()).unwrap(), Value::Int(3));
        assert_eq!(int(&Value::from("ff"), &[Value::Int(0), Value::Int(16)], &k()).unwrap(), Value::Int(255));
        assert_eq!(int(&Value::from("nope"), &[Value::Int(-1)], &k()).unwrap(), Value::Int(-1));
        assert_eq!(float(&Value::from("2.5"), &[], &k()).unwrap(), Value::Float(2.5));
        assert_eq!(float(&Value::None, &[], &k()).unwrap(), Value::Float(0.0));
    }

    #[test]
    fn test_abs() {
        assert_eq!(abs(&Value::Int(-3), &[], &k()).unwrap(), Value::Int(3));
        assert!(abs(&Value::Int(i64::MIN), &[], &k()).is_err());
    }

    #[test]
    fn test_filesizeformat() {
        let f = |n: i64, binary: bool| {
            filesizeformat(&Value::Int(n), &[Value::Bool(binary)], &k()).unwrap().to_string()
        };
        assert_eq!(f(1, false), "1 Byte");
        assert_eq!(f(300, false), "300 Bytes");
        assert_eq!(f(13_000, false), "13.0 kB");
        assert_eq!(f(1_048_576, true), "1.0 MiB");
    }
}
