//! Global functions available in every template

use std::sync::Arc;

use indexmap::IndexMap;

use crate::environment::EnvironmentConfig;
use crate::error::CallError;
use crate::runtime::{Callable, Cycler, Joiner, Kwargs, Namespace, Value};

type FnResult = Result<Value, CallError>;

/// Globals a new environment starts with
pub fn builtin_globals(config: &EnvironmentConfig) -> IndexMap<String, Value> {
    let max_range = config.max_range;
    let mut globals = IndexMap::new();
    globals.insert(
        "range".to_string(),
        Value::function("range", move |args, kwargs| range(args, kwargs, max_range)),
    );
    globals.insert("dict".to_string(), Value::function("dict", dict));
    globals.insert("namespace".to_string(), Value::function("namespace", namespace));
    globals.insert("cycler".to_string(), Value::function("cycler", cycler));
    globals.insert("joiner".to_string(), Value::function("joiner", joiner));
    globals.insert("zip".to_string(), Value::function("zip", zip));
    globals.insert("enumerate".to_string(), Value::function("enumerate", enumerate));
    globals
}

fn int(value: &Value, what: &str) -> Result<i64, CallError> {
    value
        .as_i64()
        .ok_or_else(|| CallError::new(format!("{} must be an integer, got {}", what, value.kind_name())))
}

/// `range(stop)` or `range(start, stop, step=1)`
fn range(args: &[Value], _: &Kwargs, max_range: usize) -> FnResult {
    let (start, stop, step) = match args {
        [stop] => (0, int(stop, "stop")?, 1),
        [start, stop] => (int(start, "start")?, int(stop, "stop")?, 1),
        [start, stop, step] => (int(start, "start")?, int(stop, "stop")?, int(step, "step")?),
        _ => return Err(CallError::new("range expects 1 to 3 integer arguments")),
    };
    if step == 0 {
        return Err(CallError::new("range step must not be zero"));
    }

    let span = if step > 0 { stop.saturating_sub(start) } else { start.saturating_sub(stop) };
    let count = if span <= 0 {
        0
    } else {
        (span as u64).div_ceil(step.unsigned_abs())
    };
    if count > max_range as u64 {
        return Err(CallError::new(format!(
            "range of {} items exceeds the limit of {}",
            count, max_range
        )));
    }

    let items = (0..count as i64).map(|i| Value::Int(start + i * step)).collect();
    Ok(Value::from_seq(items))
}

/// A mapping from an optional positional mapping plus keyword arguments
fn mapping_from(args: &[Value], kwargs: &Kwargs, what: &str) -> Result<IndexMap<String, Value>, CallError> {
    let mut map = match args {
        [] => IndexMap::new(),
        [Value::Map(initial)] => initial.as_ref().clone(),
        [Value::Namespace(ns)] => ns.snapshot(),
        _ => return Err(CallError::new(format!("{} accepts one mapping and keyword arguments", what))),
    };
    map.extend(kwargs.iter().map(|(k, v)| (k.clone(), v.clone())));
    Ok(map)
}

fn dict(args: &[Value], kwargs: &Kwargs) -> FnResult {
    Ok(Value::from_map(mapping_from(args, kwargs, "dict")?))
}

fn namespace(args: &[Value], kwargs: &Kwargs) -> FnResult {
    Ok(Value::Namespace(Namespace::new(mapping_from(args, kwargs, "namespace")?)))
}

fn cycler(args: &[Value], _: &Kwargs) -> FnResult {
    let cycler = Cycler::new(args.to_vec())?;
    Ok(Value::Callable(Callable::Cycler(Arc::new(cycler))))
}

/// `joiner(sep=', ')`
fn joiner(args: &[Value], kwargs: &Kwargs) -> FnResult {
    let separator = kwargs
        .get("sep")
        .or_else(|| args.first())
        .map(Value::to_string)
        .unwrap_or_else(|| ", ".to_string());
    Ok(Value::Callable(Callable::Joiner(Arc::new(Joiner::new(separator)))))
}

/// Tuples of the n-th items; stops at the shortest input
fn zip(args: &[Value], _: &Kwargs) -> FnResult {
    let columns = args
        .iter()
        .map(|arg| arg.try_iter().map_err(|e| CallError::new(e.to_string())))
        .collect::<Result<Vec<_>, _>>()?;
    let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
    let zipped = (0..rows)
        .map(|i| Value::from_seq(columns.iter().map(|column| column[i].clone()).collect()))
        .collect();
    Ok(Value::from_seq(zipped))
}

/// `enumerate(iterable, start=0)`
fn enumerate(args: &[Value], kwargs: &Kwargs) -> FnResult {
    let iterable = args
        .first()
        .ok_or_else(|| CallError::new("enumerate expects an iterable"))?;
    let start = match kwargs.get("start").or_else(|| args.get(1)) {
        Some(value) => int(value, "start")?,
        None => 0,
    };
    let items = iterable
        .try_iter()
        .map_err(|e| CallError::new(e.to_string()))?;
    Ok(Value::from_seq(
        items
            .into_iter()
            .enumerate()
            .map(|(i, item)| Value::from_seq(vec![Value::Int(start + i as i64), item]))
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: &[Value]) -> FnResult {
        call_kw(name, args, &Kwargs::new())
    }

    fn call_kw(name: &str, args: &[Value], kwargs: &Kwargs) -> FnResult {
        let globals = builtin_globals(&EnvironmentConfig::default());
        match globals.get(name) {
            Some(Value::Callable(Callable::Function { func, .. })) => func(args, kwargs),
            other => panic!("{name} is not a function: {other:?}"),
        }
    }

    #[test]
    fn test_range() {
        assert_eq!(call("range", &[Value::Int(3)]).unwrap().to_string(), "[0, 1, 2]");
        assert_eq!(
            call("range", &[Value::Int(10), Value::Int(0), Value::Int(-3)]).unwrap().to_string(),
            "[10, 7, 4, 1]"
        );
        assert_eq!(call("range", &[Value::Int(5), Value::Int(2)]).unwrap().to_string(), "[]");
        assert!(call("range", &[Value::Int(0), Value::Int(5), Value::Int(0)]).is_err());
        assert!(call("range", &[Value::Int(1_000_000)]).is_err());
    }

    #[test]
    fn test_dict_and_namespace() {
        let mut kwargs = Kwargs::new();
        kwargs.insert("a".into(), Value::Int(1));
        let dict = call_kw("dict", &[], &kwargs).unwrap();
        assert_eq!(dict.to_string(), "{'a': 1}");
        match call_kw("namespace", &[], &kwargs).unwrap() {
            Value::Namespace(ns) => assert_eq!(ns.get("a"), Some(Value::Int(1))),
            other => panic!("expected namespace, got {other:?}"),
        }
    }

    #[test]
    fn test_zip_and_enumerate() {
        let zipped = call("zip", &[Value::from(vec![1, 2, 3]), Value::from("ab")]).unwrap();
        assert_eq!(zipped.to_string(), "[[1, 'a'], [2, 'b']]");
        let mut kwargs = Kwargs::new();
        kwargs.insert("start".into(), Value::Int(1));
        let numbered = call_kw("enumerate", &[Value::from("xy")], &kwargs).unwrap();
        assert_eq!(numbered.to_string(), "[[1, 'x'], [2, 'y']]");
    }

    #[test]
    fn test_cycler_and_joiner() {
        assert!(call("cycler", &[]).is_err());
        match call("joiner", &[Value::from("|")]).unwrap() {
            Value::Callable(Callable::Joiner(j)) => {
                assert_eq!(j.call(), Value::from(""));
                assert_eq!(j.call(), Value::from("|"));
            }
            other => panic!("expected joiner, got {other:?}"),
        }
    }
}
