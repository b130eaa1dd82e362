//! Markup filters: escaping, safe strings, URLs, attributes and JSON

use std::io;

use serde::Serialize;

use super::{bool_arg, size_arg, text_of, FilterResult};
use crate::error::CallError;
use crate::helpers::{html_escape, strip_tags, urlencode as encode_component, urlencode_pairs};
use crate::runtime::{Kwargs, Value, MAX_REPEAT_LEN};

/// Escape unless the value is already safe
pub(crate) fn escape(value: &Value, _: &[Value], _: &Kwargs) -> FilterResult {
    Ok(match value {
        Value::Safe(_) => value.clone(),
        other => Value::Safe(html_escape(&text_of(other))),
    })
}

pub(crate) fn forceescape(value: &Value, _: &[Value], _: &Kwargs) -> FilterResult {
    Ok(Value::Safe(html_escape(&text_of(value))))
}

pub(crate) fn safe(value: &Value, _: &[Value], _: &Kwargs) -> FilterResult {
    Ok(match value {
        Value::Safe(_) => value.clone(),
        other => Value::Safe(text_of(other)),
    })
}

pub(crate) fn striptags(value: &Value, _: &[Value], _: &Kwargs) -> FilterResult {
    Ok(Value::String(strip_tags(&text_of(value))))
}

/// Strings are percent-encoded; mappings and pair lists become query strings
pub(crate) fn urlencode(value: &Value, _: &[Value], _: &Kwargs) -> FilterResult {
    let encoded = match value {
        Value::Map(map) => urlencode_pairs(map.iter().map(|(k, v)| (k.as_str(), v.to_string()))),
        Value::Seq(items) => {
            let mut pairs = Vec::with_capacity(items.len());
            for item in items.iter() {
                match item.as_seq() {
                    Some([k, v]) => pairs.push((k.key_string(), v.to_string())),
                    _ => return Err(CallError::new("urlencode expects a mapping or a list of pairs")),
                }
            }
            urlencode_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.clone())))
        }
        other => encode_component(&text_of(other)),
    };
    Ok(Value::String(encoded))
}

/// Render a mapping as ` key="value"` pairs; none and undefined values are skipped
pub(crate) fn xmlattr(value: &Value, args: &[Value], kwargs: &Kwargs) -> FilterResult {
    let map = value
        .as_map()
        .ok_or_else(|| CallError::new(format!("xmlattr expects a mapping, got {}", value.kind_name())))?;
    let autoescape = bool_arg(args, kwargs, 0, "autoescape", true);

    let mut out = String::new();
    for (key, item) in map {
        if item.is_none() || item.is_undefined() {
            continue;
        }
        if key.is_empty() || key.chars().any(|c| c.is_whitespace() || matches!(c, '/' | '>' | '=')) {
            return Err(CallError::new(format!("invalid attribute name '{}'", key)));
        }
        let text = if autoescape {
            match item {
                Value::Safe(s) => s.clone(),
                other => html_escape(&text_of(other)),
            }
        } else {
            text_of(item)
        };
        out.push_str(&format!(" {}=\"{}\"", html_escape(key), text));
    }
    Ok(Value::Safe(out))
}

/// Output buffer that refuses to grow past the repetition limit
#[derive(Default)]
struct BoundedBuf(Vec<u8>);

impl io::Write for BoundedBuf {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        if self.0.len() + bytes.len() > MAX_REPEAT_LEN {
            return Err(io::Error::new(io::ErrorKind::Other, "indented json too large"));
        }
        self.0.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// JSON that is safe to embed in HTML, including inside `<script>`
pub(crate) fn tojson(value: &Value, args: &[Value], kwargs: &Kwargs) -> FilterResult {
    let indent = size_arg(args, kwargs, 0, "indent", 0)?;
    let json = if indent > 0 {
        let pad = " ".repeat(indent);
        let formatter = serde_json::ser::PrettyFormatter::with_indent(pad.as_bytes());
        let mut buf = BoundedBuf::default();
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        value
            .serialize(&mut ser)
            .map_err(|e| CallError::new(e.to_string()))?;
        String::from_utf8(buf.0).map_err(|e| CallError::new(e.to_string()))?
    } else {
        serde_json::to_string(value).map_err(|e| CallError::new(e.to_string()))?
    };

    let mut out = String::with_capacity(json.len());
    for c in json.chars() {
        match c {
            '<' => out.push_str("\\u003c"),
            '>' => out.push_str("\\u003e"),
            '&' => out.push_str("\\u0026"),
            '\'' => out.push_str("\\u0027"),
            _ => out.push(c),
        }
    }
    Ok(Value::Safe(out))
}
