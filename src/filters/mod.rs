//! Built-in filters
//!
//! Every filter receives the piped value plus the positional and keyword
//! arguments written at the call site. Arguments may be given either way:
//! `truncate(10)` and `truncate(length=10)` are equivalent.
//!
//! `map`, `select`, `reject`, `selectattr` and `rejectattr` call back into
//! other filters and tests, so they live in the evaluator.

mod collection;
mod html;
mod numeric;
pub mod string;

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::CallError;
use crate::runtime::{check_repeat, Kwargs, Value};

pub use string::{capitalize, title_case};

/// Signature shared by built-in and user filters
pub type FilterFn = dyn Fn(&Value, &[Value], &Kwargs) -> Result<Value, CallError> + Send + Sync;

pub(crate) type FilterResult = Result<Value, CallError>;

type Builtin = fn(&Value, &[Value], &Kwargs) -> FilterResult;

const BUILTINS: &[(&str, Builtin)] = &[
    // strings
    ("upper", string::upper),
    ("lower", string::lower),
    ("capitalize", string::capitalize_filter),
    ("title", string::title),
    ("trim", string::trim),
    ("replace", string::replace),
    ("truncate", string::truncate),
    ("wordcount", string::wordcount),
    ("wordwrap", string::wordwrap),
    ("center", string::center),
    ("indent", string::indent),
    ("string", string::string),
    ("format", string::format),
    // markup
    ("escape", html::escape),
    ("e", html::escape),
    ("forceescape", html::forceescape),
    ("safe", html::safe),
    ("striptags", html::striptags),
    ("urlencode", html::urlencode),
    ("xmlattr", html::xmlattr),
    ("tojson", html::tojson),
    // collections
    ("length", collection::length),
    ("count", collection::length),
    ("first", collection::first),
    ("last", collection::last),
    ("join", collection::join),
    ("sort", collection::sort),
    ("reverse", collection::reverse),
    ("unique", collection::unique),
    ("list", collection::list),
    ("batch", collection::batch),
    ("slice", collection::slice),
    ("dictsort", collection::dictsort),
    ("items", collection::items),
    ("groupby", collection::groupby),
    ("attr", collection::attr),
    ("default", collection::default),
    ("d", collection::default),
    // numbers
    ("sum", numeric::sum),
    ("min", numeric::min),
    ("max", numeric::max),
    ("abs", numeric::abs),
    ("round", numeric::round),
    ("int", numeric::int),
    ("float", numeric::float),
    ("filesizeformat", numeric::filesizeformat),
];

/// The filter table a new environment starts with
pub fn builtin_filters() -> HashMap<String, Arc<FilterFn>> {
    BUILTINS
        .iter()
        .map(|(name, filter)| (name.to_string(), Arc::new(*filter) as Arc<FilterFn>))
        .collect()
}

/// Resolve a dotted attribute path such as `author.name` or `items.0`
pub fn lookup_path(value: &Value, path: &str) -> Value {
    let mut current = value.clone();
    for part in path.split('.') {
        let next = match part.parse::<i64>() {
            Ok(index) => current.get_item(&Value::Int(index)),
            Err(_) => current.get_attr(part),
        };
        current = match next {
            Some(found) => found,
            None => return Value::Undefined,
        };
    }
    current
}

// ============================================================================
// Argument access
// ============================================================================

/// Argument by keyword name, falling back to its position
pub(crate) fn arg<'a>(args: &'a [Value], kwargs: &'a Kwargs, index: usize, name: &str) -> Option<&'a Value> {
    kwargs.get(name).or_else(|| args.get(index))
}

pub(crate) fn int_arg(args: &[Value], kwargs: &Kwargs, index: usize, name: &str, default: i64) -> Result<i64, CallError> {
    match arg(args, kwargs, index, name) {
        None | Some(Value::None) | Some(Value::Undefined) => Ok(default),
        Some(value) => value
            .as_i64()
            .ok_or_else(|| CallError::new(format!("{} must be an integer, got {}", name, value.kind_name()))),
    }
}

/// A width or count argument; negative values clamp to zero and values past
/// the repetition limit are rejected
pub(crate) fn size_arg(
    args: &[Value],
    kwargs: &Kwargs,
    index: usize,
    name: &str,
    default: i64,
) -> Result<usize, CallError> {
    let size = int_arg(args, kwargs, index, name, default)?.max(0);
    let too_large = || CallError::new(format!("{} of {} is too large", name, size));
    let size = usize::try_from(size).map_err(|_| too_large())?;
    check_repeat(1, size).map_err(|_| too_large())?;
    Ok(size)
}

pub(crate) fn bool_arg(args: &[Value], kwargs: &Kwargs, index: usize, name: &str, default: bool) -> bool {
    arg(args, kwargs, index, name)
        .map(Value::is_true)
        .unwrap_or(default)
}

pub(crate) fn str_arg(args: &[Value], kwargs: &Kwargs, index: usize, name: &str) -> Option<String> {
    arg(args, kwargs, index, name).map(Value::key_string)
}

/// Items of an iterable value, as a filter error when it is not iterable
pub(crate) fn items_of(value: &Value) -> Result<Vec<Value>, CallError> {
    value.try_iter().map_err(|e| CallError::new(e.to_string()))
}

/// Text of a value, escaped-ness dropped
pub(crate) fn text_of(value: &Value) -> String {
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    #[test]
    fn test_every_builtin_is_registered() {
        let filters = builtin_filters();
        for name in ["upper", "e", "d", "count", "filesizeformat", "tojson", "wordwrap"] {
            assert!(filters.contains_key(name), "missing filter {name}");
        }
        assert!(!filters.contains_key("map"));
    }

    #[test]
    fn test_lookup_path() {
        let mut author = IndexMap::new();
        author.insert("name".to_string(), Value::from("Ada"));
        let mut post = IndexMap::new();
        post.insert("author".to_string(), Value::from_map(author));
        post.insert("tags".to_string(), Value::from(vec!["a", "b"]));
        let post = Value::from_map(post);

        assert_eq!(lookup_path(&post, "author.name"), Value::from("Ada"));
        assert_eq!(lookup_path(&post, "tags.1"), Value::from("b"));
        assert!(lookup_path(&post, "author.email").is_undefined());
    }

    #[test]
    fn test_keyword_overrides_position() {
        let mut kwargs = Kwargs::new();
        kwargs.insert("length".into(), Value::Int(3));
        assert_eq!(int_arg(&[Value::Int(9)], &kwargs, 0, "length", 255).unwrap(), 3);
        assert_eq!(int_arg(&[], &Kwargs::new(), 0, "length", 255).unwrap(), 255);
        assert!(int_arg(&[Value::from("x")], &Kwargs::new(), 0, "length", 0).is_err());
    }
}
