//! HTML helper functions

/// Escape HTML special characters
pub fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Strip HTML tags and comments, collapsing runs of whitespace
pub fn strip_tags(s: &str) -> String {
    let mut text = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find('<') {
        text.push_str(&rest[..start]);
        let tail = &rest[start..];
        let close = if tail.starts_with("<!--") {
            tail.find("-->").map(|i| i + 3)
        } else {
            tail.find('>').map(|i| i + 1)
        };
        match close {
            Some(end) => rest = &tail[end..],
            None => {
                rest = "";
                break;
            }
        }
    }
    text.push_str(rest);
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate to `length` characters (including `end`).
///
/// Strings at most `leeway` characters over the limit are kept whole. Unless
/// `killwords` is set the cut happens at the last word boundary.
pub fn truncate(s: &str, length: usize, killwords: bool, end: &str, leeway: usize) -> String {
    if s.chars().count() <= length + leeway {
        return s.to_string();
    }
    let keep = length.saturating_sub(end.chars().count());
    let head: String = s.chars().take(keep).collect();
    if killwords {
        return format!("{}{}", head, end);
    }
    let head = match head.rfind(' ') {
        Some(pos) => &head[..pos],
        None => head.as_str(),
    };
    format!("{}{}", head, end)
}

/// Greedy word wrap at `width` columns
pub fn word_wrap(s: &str, width: usize, break_long_words: bool, wrapstring: &str) -> String {
    let width = width.max(1);
    let mut lines: Vec<String> = Vec::new();
    let mut line = String::new();

    for word in s.split_whitespace() {
        let mut word = word.to_string();
        loop {
            let line_len = line.chars().count();
            let word_len = word.chars().count();
            let needed = if line.is_empty() { word_len } else { line_len + 1 + word_len };
            if needed <= width {
                if !line.is_empty() {
                    line.push(' ');
                }
                line.push_str(&word);
                break;
            }
            if !line.is_empty() {
                lines.push(std::mem::take(&mut line));
                continue;
            }
            if break_long_words && word_len > width {
                let head: String = word.chars().take(width).collect();
                word = word.chars().skip(width).collect();
                lines.push(head);
                continue;
            }
            line = word;
            break;
        }
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines.join(wrapstring)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_escape() {
        assert_eq!(
            html_escape(r#"<a href="x">Tom & 'Jerry'</a>"#),
            "&lt;a href=&#34;x&#34;&gt;Tom &amp; &#39;Jerry&#39;&lt;/a&gt;"
        );
    }

    #[test]
    fn test_strip_tags() {
        assert_eq!(strip_tags("<p>Hello <b>World</b></p>"), "Hello World");
        assert_eq!(strip_tags("a <!-- note -->\n\n  b"), "a b");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("foo bar baz qux", 9, false, "...", 0), "foo...");
        assert_eq!(truncate("foo bar baz qux", 9, true, "...", 0), "foo ba...");
        assert_eq!(truncate("foo bar", 5, false, "...", 5), "foo bar");
        assert_eq!(truncate("Hi", 10, false, "...", 0), "Hi");
    }

    #[test]
    fn test_word_wrap() {
        assert_eq!(word_wrap("aaa bb cc dddd", 6, true, "\n"), "aaa bb\ncc\ndddd");
        assert_eq!(word_wrap("abcdefgh", 3, true, "\n"), "abc\ndef\ngh");
        assert_eq!(word_wrap("abcdefgh x", 3, false, "|"), "abcdefgh|x");
    }
}
