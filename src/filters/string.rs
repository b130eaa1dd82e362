//! String filters

use super::{arg, bool_arg, int_arg, size_arg, str_arg, text_of, FilterResult};
use crate::error::CallError;
use crate::helpers;
use crate::runtime::{check_repeat, Kwargs, Value};

/// Keep the safe marker of `original` on a transformed string
fn like(original: &Value, text: String) -> Value {
    if original.is_safe() {
        Value::Safe(text)
    } else {
        Value::String(text)
    }
}

/// Uppercase the first letter of every word, lowercase the rest
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if c.is_alphanumeric() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}

/// Uppercase the first character, lowercase the rest
pub fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

pub(crate) fn upper(value: &Value, _: &[Value], _: &Kwargs) -> FilterResult {
    Ok(like(value, text_of(value).to_uppercase()))
}

pub(crate) fn lower(value: &Value, _: &[Value], _: &Kwargs) -> FilterResult {
    Ok(like(value, text_of(value).to_lowercase()))
}

pub(crate) fn capitalize_filter(value: &Value, _: &[Value], _: &Kwargs) -> FilterResult {
    Ok(like(value, capitalize(&text_of(value))))
}

pub(crate) fn title(value: &Value, _: &[Value], _: &Kwargs) -> FilterResult {
    Ok(like(value, title_case(&text_of(value))))
}

pub(crate) fn trim(value: &Value, args: &[Value], kwargs: &Kwargs) -> FilterResult {
    let text = text_of(value);
    let trimmed = match str_arg(args, kwargs, 0, "chars") {
        Some(chars) if !chars.is_empty() => text.trim_matches(|c: char| chars.contains(c)).to_string(),
        _ => text.trim().to_string(),
    };
    Ok(like(value, trimmed))
}

/// `replace(old, new, count=None)`
pub(crate) fn replace(value: &Value, args: &[Value], kwargs: &Kwargs) -> FilterResult {
    let old = str_arg(args, kwargs, 0, "old").ok_or_else(|| CallError::new("missing argument 'old'"))?;
    let new = str_arg(args, kwargs, 1, "new").ok_or_else(|| CallError::new("missing argument 'new'"))?;
    let text = text_of(value);
    let replaced = match int_arg(args, kwargs, 2, "count", -1)? {
        n if n < 0 => text.replace(&old, &new),
        n => text.replacen(&old, &new, n as usize),
    };
    Ok(like(value, replaced))
}

/// `truncate(length=255, killwords=false, end='...', leeway=0)`
pub(crate) fn truncate(value: &Value, args: &[Value], kwargs: &Kwargs) -> FilterResult {
    let length = int_arg(args, kwargs, 0, "length", 255)?;
    let killwords = bool_arg(args, kwargs, 1, "killwords", false);
    let end = str_arg(args, kwargs, 2, "end").unwrap_or_else(|| "...".to_string());
    let leeway = int_arg(args, kwargs, 3, "leeway", 0)?;
    if length < 0 || leeway < 0 {
        return Err(CallError::new("length and leeway must not be negative"));
    }
    if (length as usize) < end.chars().count() {
        return Err(CallError::new("length must be at least the length of 'end'"));
    }
    Ok(Value::String(helpers::truncate(
        &text_of(value),
        length as usize,
        killwords,
        &end,
        leeway as usize,
    )))
}

pub(crate) fn wordcount(value: &Value, _: &[Value], _: &Kwargs) -> FilterResult {
    let count = text_of(value)
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|word| !word.is_empty())
        .count();
    Ok(Value::from(count))
}

/// `wordwrap(width=79, break_long_words=true, wrapstring='\n')`
pub(crate) fn wordwrap(value: &Value, args: &[Value], kwargs: &Kwargs) -> FilterResult {
    let width = int_arg(args, kwargs, 0, "width", 79)?;
    if width <= 0 {
        return Err(CallError::new("width must be positive"));
    }
    let break_long = bool_arg(args, kwargs, 1, "break_long_words", true);
    let wrapstring = str_arg(args, kwargs, 2, "wrapstring").unwrap_or_else(|| "\n".to_string());
    Ok(Value::String(helpers::word_wrap(
        &text_of(value),
        width as usize,
        break_long,
        &wrapstring,
    )))
}

/// `center(width=80)`; extra padding goes to the right
pub(crate) fn center(value: &Value, args: &[Value], kwargs: &Kwargs) -> FilterResult {
    let width = size_arg(args, kwargs, 0, "width", 80)?;
    let text = text_of(value);
    let len = text.chars().count();
    if len >= width {
        return Ok(like(value, text));
    }
    let left = (width - len) / 2;
    let right = width - len - left;
    Ok(like(value, format!("{}{}{}", " ".repeat(left), text, " ".repeat(right))))
}

/// `indent(width=4, first=false, blank=false)`; `width` may also be a string
pub(crate) fn indent(value: &Value, args: &[Value], kwargs: &Kwargs) -> FilterResult {
    let prefix = match arg(args, kwargs, 0, "width") {
        Some(Value::String(s)) | Some(Value::Safe(s)) => s.clone(),
        _ => " ".repeat(size_arg(args, kwargs, 0, "width", 4)?),
    };
    let first = bool_arg(args, kwargs, 1, "first", false);
    let blank = bool_arg(args, kwargs, 2, "blank", false);

    let text = text_of(value);
    check_repeat(prefix.len(), text.split('\n').count())?;
    let mut out = String::with_capacity(text.len());
    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let wanted = if i == 0 { first } else { blank || !line.trim().is_empty() };
        if wanted {
            out.push_str(&prefix);
        }
        out.push_str(line);
    }
    Ok(like(value, out))
}

pub(crate) fn string(value: &Value, _: &[Value], _: &Kwargs) -> FilterResult {
    Ok(like(value, text_of(value)))
}

/// printf-style formatting: `"%s is %d"|format(name, age)`,
/// or `"%(name)s"|format(name=...)` with keyword arguments
pub(crate) fn format(value: &Value, args: &[Value], kwargs: &Kwargs) -> FilterResult {
    let template = text_of(value);
    let mut out = String::with_capacity(template.len());
    let mut positional = args.iter();
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            out.push('%');
            continue;
        }

        let mut key = None;
        if chars.peek() == Some(&'(') {
            chars.next();
            let name: String = chars.by_ref().take_while(|&c| c != ')').collect();
            key = Some(name);
        }
        let mut spec = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | ' ' | '0') {
                spec.push(c);
                chars.next();
            } else {
                break;
            }
        }
        let conversion = chars
            .next()
            .ok_or_else(|| CallError::new("incomplete format specifier"))?;

        let argument = match &key {
            Some(name) => kwargs
                .get(name)
                .ok_or_else(|| CallError::new(format!("missing format key '{}'", name)))?,
            None => positional
                .next()
                .ok_or_else(|| CallError::new("not enough arguments for format string"))?,
        };
        out.push_str(&format_one(conversion, &spec, argument)?);
    }
    Ok(Value::String(out))
}

fn format_one(conversion: char, spec: &str, value: &Value) -> Result<String, CallError> {
    let left_align = spec.starts_with('-');
    let zero_pad = spec.trim_start_matches(['-', '+', ' ']).starts_with('0');
    let spec = spec.trim_start_matches(['-', '+', ' ', '0']);
    let (width, precision) = match spec.split_once('.') {
        Some((w, p)) => (w.parse().unwrap_or(0), p.parse::<usize>().ok()),
        None => (spec.parse().unwrap_or(0), None),
    };
    check_repeat(1, width)?;
    check_repeat(1, precision.unwrap_or(0))?;

    let number = |v: &Value| {
        v.as_f64()
            .ok_or_else(|| CallError::new(format!("%{} needs a number, got {}", conversion, v.kind_name())))
    };
    let body = match conversion {
        's' => {
            let text = value.to_string();
            match precision {
                Some(p) => text.chars().take(p).collect(),
                None => text,
            }
        }
        'r' => value.repr(),
        'd' | 'i' => format!("{}", number(value)?.trunc() as i64),
        'f' | 'F' => format!("{:.*}", precision.unwrap_or(6), number(value)?),
        'e' => format!("{:.*e}", precision.unwrap_or(6), number(value)?),
        'x' => format!("{:x}", number(value)? as i64),
        'X' => format!("{:X}", number(value)? as i64),
        'o' => format!("{:o}", number(value)? as i64),
        other => return Err(CallError::new(format!("unsupported format character '{}'", other))),
    };

    let len = body.chars().count();
    if len >= width {
        return Ok(body);
    }
    let pad = width - len;
    Ok(if left_align {
        format!("{}{}", body, " ".repeat(pad))
    } else if zero_pad && conversion != 's' {
        match body.strip_prefix('-') {
            Some(digits) => format!("-{}{}", "0".repeat(pad), digits),
            None => format!("{}{}", "0".repeat(pad), body),
        }
    } else {
        format!("{}{}", " ".repeat(pad), body)
    })
}
