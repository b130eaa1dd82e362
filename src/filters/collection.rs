//! Sequence and mapping filters

use std::cmp::Ordering;

use super::{arg, bool_arg, int_arg, items_of, lookup_path, size_arg, str_arg, FilterResult};
use crate::error::CallError;
use crate::runtime::{Kwargs, Value};

/// Sort key of an item: an attribute path when given, lowercased strings
/// unless case matters
pub(super) fn sort_key(item: &Value, attribute: Option<&str>, case_sensitive: bool) -> Value {
    let key = match attribute {
        Some(path) => lookup_path(item, path),
        None => item.clone(),
    };
    match key {
        Value::String(s) | Value::Safe(s) if !case_sensitive => Value::String(s.to_lowercase()),
        other => other,
    }
}

/// Stable sort by a precomputed key; incomparable keys are an error
pub(super) fn sort_by_key(items: Vec<Value>, attribute: Option<&str>, case_sensitive: bool) -> Result<Vec<Value>, CallError> {
    let mut keyed: Vec<(Value, Value)> = items
        .into_iter()
        .map(|item| (sort_key(&item, attribute, case_sensitive), item))
        .collect();
    let mut failure = None;
    keyed.sort_by(|a, b| {
        a.0.compare(&b.0).unwrap_or_else(|e| {
            failure.get_or_insert_with(|| e.to_string());
            Ordering::Equal
        })
    });
    match failure {
        Some(message) => Err(CallError::new(message)),
        None => Ok(keyed.into_iter().map(|(_, item)| item).collect()),
    }
}

pub(crate) fn length(value: &Value, _: &[Value], _: &Kwargs) -> FilterResult {
    match value {
        Value::Undefined | Value::None => Ok(Value::Int(0)),
        other => other
            .len()
            .map(Value::from)
            .ok_or_else(|| CallError::new(format!("object of type {} has no length", other.kind_name()))),
    }
}

pub(crate) fn first(value: &Value, _: &[Value], _: &Kwargs) -> FilterResult {
    Ok(items_of(value)?.into_iter().next().unwrap_or_default())
}

pub(crate) fn last(value: &Value, _: &[Value], _: &Kwargs) -> FilterResult {
    Ok(items_of(value)?.pop().unwrap_or_default())
}

/// `join(d='', attribute=None)`; the result stays safe only when every part is
pub(crate) fn join(value: &Value, args: &[Value], kwargs: &Kwargs) -> FilterResult {
    let separator = arg(args, kwargs, 0, "d").cloned().unwrap_or_else(|| Value::from(""));
    let attribute = str_arg(args, kwargs, 1, "attribute");
    let parts: Vec<Value> = items_of(value)?
        .iter()
        .map(|item| match &attribute {
            Some(path) => lookup_path(item, path),
            None => item.clone(),
        })
        .collect();

    let all_safe = separator.is_safe() || separator.as_str().map_or(false, str::is_empty);
    let all_safe = all_safe && !parts.is_empty() && parts.iter().all(Value::is_safe);
    let joined = parts
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join(&separator.to_string());
    Ok(if all_safe { Value::Safe(joined) } else { Value::String(joined) })
}

/// `sort(reverse=false, case_sensitive=false, attribute=None)`
pub(crate) fn sort(value: &Value, args: &[Value], kwargs: &Kwargs) -> FilterResult {
    let reverse = bool_arg(args, kwargs, 0, "reverse", false);
    let case_sensitive = bool_arg(args, kwargs, 1, "case_sensitive", false);
    let attribute = str_arg(args, kwargs, 2, "attribute");
    let mut sorted = sort_by_key(items_of(value)?, attribute.as_deref(), case_sensitive)?;
    if reverse {
        sorted.reverse();
    }
    Ok(Value::from_seq(sorted))
}

pub(crate) fn reverse(value: &Value, _: &[Value], _: &Kwargs) -> FilterResult {
    match value {
        Value::String(s) => Ok(Value::String(s.chars().rev().collect())),
        Value::Safe(s) => Ok(Value::Safe(s.chars().rev().collect())),
        other => {
            let mut items = items_of(other)?;
            items.reverse();
            Ok(Value::from_seq(items))
        }
    }
}

/// `unique(case_sensitive=false, attribute=None)`; first occurrences win
pub(crate) fn unique(value: &Value, args: &[Value], kwargs: &Kwargs) -> FilterResult {
    let case_sensitive = bool_arg(args, kwargs, 0, "case_sensitive", false);
    let attribute = str_arg(args, kwargs, 1, "attribute");
    let mut seen: Vec<Value> = Vec::new();
    let mut kept = Vec::new();
    for item in items_of(value)? {
        let key = sort_key(&item, attribute.as_deref(), case_sensitive);
        if !seen.iter().any(|s| s.loose_eq(&key)) {
            seen.push(key);
            kept.push(item);
        }
    }
    Ok(Value::from_seq(kept))
}

pub(crate) fn list(value: &Value, _: &[Value], _: &Kwargs) -> FilterResult {
    Ok(Value::from_seq(items_of(value)?))
}

/// `batch(linecount, fill_with=None)`: chunks of `linecount` items
pub(crate) fn batch(value: &Value, args: &[Value], kwargs: &Kwargs) -> FilterResult {
    let size = int_arg(args, kwargs, 0, "linecount", 0)?;
    if size <= 0 {
        return Err(CallError::new("linecount must be positive"));
    }
    let fill = arg(args, kwargs, 1, "fill_with").filter(|v| !v.is_none());
    if fill.is_some() {
        size_arg(args, kwargs, 0, "linecount", 0)?;
    }
    let items = items_of(value)?;
    let batches = items
        .chunks(size as usize)
        .map(|chunk| {
            let mut row = chunk.to_vec();
            if let Some(fill) = fill {
                row.resize(size as usize, fill.clone());
            }
            Value::from_seq(row)
        })
        .collect();
    Ok(Value::from_seq(batches))
}

/// `slice(slices, fill_with=None)`: split into `slices` columns
pub(crate) fn slice(value: &Value, args: &[Value], kwargs: &Kwargs) -> FilterResult {
    let slices = int_arg(args, kwargs, 0, "slices", 0)?;
    if slices <= 0 {
        return Err(CallError::new("slices must be positive"));
    }
    let slices = size_arg(args, kwargs, 0, "slices", 0)?;
    let fill = arg(args, kwargs, 1, "fill_with").filter(|v| !v.is_none());
    let items = items_of(value)?;

    let per_slice = items.len() / slices;
    let with_extra = items.len() % slices;
    let mut offset = 0;
    let mut columns = Vec::with_capacity(slices);
    for n in 0..slices {
        let start = offset + n * per_slice;
        if n < with_extra {
            offset += 1;
        }
        let end = offset + (n + 1) * per_slice;
        let mut column = items[start..end].to_vec();
        if let Some(fill) = fill {
            if n >= with_extra {
                column.push(fill.clone());
            }
        }
        columns.push(Value::from_seq(column));
    }
    Ok(Value::from_seq(columns))
}

/// `dictsort(case_sensitive=false, by='key', reverse=false)`
pub(crate) fn dictsort(value: &Value, args: &[Value], kwargs: &Kwargs) -> FilterResult {
    let map = value
        .as_map()
        .ok_or_else(|| CallError::new(format!("dictsort expects a mapping, got {}", value.kind_name())))?;
    let case_sensitive = bool_arg(args, kwargs, 0, "case_sensitive", false);
    let by = str_arg(args, kwargs, 1, "by").unwrap_or_else(|| "key".to_string());
    let reverse = bool_arg(args, kwargs, 2, "reverse", false);
    let position = match by.as_str() {
        "key" => "0",
        "value" => "1",
        other => return Err(CallError::new(format!("dictsort can sort by 'key' or 'value', not '{}'", other))),
    };

    let pairs = map
        .iter()
        .map(|(k, v)| Value::from_seq(vec![Value::String(k.clone()), v.clone()]))
        .collect();
    let mut sorted = sort_by_key(pairs, Some(position), case_sensitive)?;
    if reverse {
        sorted.reverse();
    }
    Ok(Value::from_seq(sorted))
}

pub(crate) fn items(value: &Value, _: &[Value], _: &Kwargs) -> FilterResult {
    match value {
        Value::Undefined => Ok(Value::from_seq(Vec::new())),
        Value::Map(_) | Value::Namespace(_) => {
            let map = match value {
                Value::Namespace(ns) => ns.snapshot(),
                _ => value.as_map().cloned().unwrap_or_default(),
            };
            Ok(Value::from_seq(
                map.into_iter()
                    .map(|(k, v)| Value::from_seq(vec![Value::String(k), v]))
                    .collect(),
            ))
        }
        other => Err(CallError::new(format!("items expects a mapping, got {}", other.kind_name()))),
    }
}

/// `groupby(attribute, default=None, case_sensitive=false)`: sorted
/// `[grouper, items]` pairs
pub(crate) fn groupby(value: &Value, args: &[Value], kwargs: &Kwargs) -> FilterResult {
    let attribute = str_arg(args, kwargs, 0, "attribute").ok_or_else(|| CallError::new("missing argument 'attribute'"))?;
    let default = arg(args, kwargs, 1, "default").cloned();
    let case_sensitive = bool_arg(args, kwargs, 2, "case_sensitive", false);

    let keyed = |item: &Value| match (lookup_path(item, &attribute), &default) {
        (Value::Undefined, Some(fallback)) => fallback.clone(),
        (found, _) => found,
    };
    let mut wrapped = Vec::new();
    for item in items_of(value)? {
        wrapped.push(Value::from_seq(vec![keyed(&item), item]));
    }
    let sorted = sort_by_key(wrapped, Some("0"), case_sensitive)?;

    let mut groups: Vec<(Value, Value, Vec<Value>)> = Vec::new();
    for pair in sorted {
        let (key, item) = match pair.as_seq() {
            Some([key, item]) => (key.clone(), item.clone()),
            _ => continue,
        };
        let compare_key = sort_key(&key, None, case_sensitive);
        match groups.last_mut() {
            Some((last, _, members)) if last.loose_eq(&compare_key) => members.push(item),
            _ => groups.push((compare_key, key, vec![item])),
        }
    }
    Ok(Value::from_seq(
        groups
            .into_iter()
            .map(|(_, grouper, members)| Value::from_seq(vec![grouper, Value::from_seq(members)]))
            .collect(),
    ))
}

pub(crate) fn attr(value: &Value, args: &[Value], kwargs: &Kwargs) -> FilterResult {
    let name = str_arg(args, kwargs, 0, "name").ok_or_else(|| CallError::new("missing argument 'name'"))?;
    Ok(value.get_attr(&name).unwrap_or_default())
}

/// `default(value='', boolean=false)`
pub(crate) fn default(value: &Value, args: &[Value], kwargs: &Kwargs) -> FilterResult {
    let fallback = arg(args, kwargs, 0, "default_value")
        .cloned()
        .unwrap_or_else(|| Value::from(""));
    let boolean = bool_arg(args, kwargs, 1, "boolean", false);
    let missing = value.is_undefined() || (boolean && !value.is_true());
    Ok(if missing { fallback } else { value.clone() })
}
