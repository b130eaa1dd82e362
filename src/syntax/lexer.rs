//! Template lexer
//!
//! Splits template source into literal text runs and the tokens found inside
//! `{{ }}`, `{% %}` and `{# #}` tags. Whitespace-control markers are not applied
//! here; they are recorded as [`Trim`] flags on the neighbouring text tokens and
//! applied when the text is rendered.

use regex::Regex;

use crate::environment::EnvironmentConfig;
use crate::error::{Error, Result};

// ============================================================================
// Token Types
// ============================================================================

/// Source position of a token (1-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub line: usize,
    pub column: usize,
}

/// Whitespace to strip from one side of a text run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Trim {
    /// Strip spaces and tabs
    pub horizontal: bool,
    /// Strip a single line break (after horizontal whitespace)
    pub newline: bool,
}

impl Trim {
    fn set(horizontal: bool, newline: bool) -> Self {
        Trim { horizontal, newline }
    }
}

/// Literal text with the trim flags contributed by its neighbouring tags
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TextToken {
    pub raw: String,
    pub lead: Trim,
    pub tail: Trim,
}

impl TextToken {
    /// The text left after applying both trim flags
    pub fn visible(&self) -> &str {
        let mut text = self.raw.as_str();
        if self.lead.horizontal {
            text = text.trim_start_matches([' ', '\t']);
        }
        if self.lead.newline {
            text = text
                .strip_prefix("\r\n")
                .or_else(|| text.strip_prefix('\n'))
                .unwrap_or(text);
        }
        if self.tail.horizontal {
            text = text.trim_end_matches([' ', '\t']);
        }
        if self.tail.newline {
            text = text
                .strip_suffix("\r\n")
                .or_else(|| text.strip_suffix('\n'))
                .unwrap_or(text);
        }
        text
    }
}

/// Token kinds produced by the lexer
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Literal template text
    Text(TextToken),
    /// Content of a `{% raw %}` block, never tokenized further
    Raw(String),
    /// Comment body
    Comment(String),
    VariableStart,
    VariableEnd,
    BlockStart,
    BlockEnd,
    Ident(String),
    Str(String),
    Int(i64),
    Float(f64),
    Plus,
    Minus,
    Star,
    Slash,
    DoubleSlash,
    Percent,
    Power,
    Tilde,
    Pipe,
    Dot,
    Comma,
    Colon,
    Assign,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Eof,
}

impl TokenKind {
    /// Short human readable description used in parse errors
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Text(_) => "template text".to_string(),
            TokenKind::Raw(_) => "raw block".to_string(),
            TokenKind::Comment(_) => "comment".to_string(),
            TokenKind::VariableStart => "start of print statement".to_string(),
            TokenKind::VariableEnd => "end of print statement".to_string(),
            TokenKind::BlockStart => "start of statement block".to_string(),
            TokenKind::BlockEnd => "end of statement block".to_string(),
            TokenKind::Ident(name) => format!("'{}'", name),
            TokenKind::Str(s) => format!("string '{}'", s),
            TokenKind::Int(n) => format!("integer {}", n),
            TokenKind::Float(n) => format!("float {}", n),
            TokenKind::Eof => "end of template".to_string(),
            op => format!("'{}'", op.operator_str()),
        }
    }

    fn operator_str(&self) -> &'static str {
        match self {
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::DoubleSlash => "//",
            TokenKind::Percent => "%",
            TokenKind::Power => "**",
            TokenKind::Tilde => "~",
            TokenKind::Pipe => "|",
            TokenKind::Dot => ".",
            TokenKind::Comma => ",",
            TokenKind::Colon => ":",
            TokenKind::Assign => "=",
            TokenKind::Eq => "==",
            TokenKind::Ne => "!=",
            TokenKind::Lt => "<",
            TokenKind::Le => "<=",
            TokenKind::Gt => ">",
            TokenKind::Ge => ">=",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            _ => "?",
        }
    }
}

/// A token with its source position
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

// ============================================================================
// Lexer
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagKind {
    Variable,
    Block,
    Comment,
}

/// Lexer for a single template source
pub struct Lexer<'a> {
    name: &'a str,
    source: &'a str,
    config: &'a EnvironmentConfig,
    pos: usize,
    line_starts: Vec<usize>,
    tokens: Vec<Token>,
    /// Trim flags waiting for the next text run
    pending_lead: Trim,
    raw_open: Regex,
    raw_close: Regex,
}

impl<'a> Lexer<'a> {
    pub fn new(name: &'a str, source: &'a str, config: &'a EnvironmentConfig) -> Result<Self> {
        let source = if !config.keep_trailing_newline {
            source
                .strip_suffix("\r\n")
                .or_else(|| source.strip_suffix('\n'))
                .unwrap_or(source)
        } else {
            source
        };

        let syntax = &config.syntax;
        let raw_open = Regex::new(&format!(
            r"\A\s*raw\s*([-+]?){}",
            regex::escape(&syntax.block_end)
        ))
        .map_err(|e| Error::invalid(format!("invalid block delimiters: {}", e)))?;
        let raw_close = Regex::new(&format!(
            r"{}([-+]?)\s*endraw\s*([-+]?){}",
            regex::escape(&syntax.block_start),
            regex::escape(&syntax.block_end)
        ))
        .map_err(|e| Error::invalid(format!("invalid block delimiters: {}", e)))?;

        let mut line_starts = vec![0];
        line_starts.extend(source.match_indices('\n').map(|(i, _)| i + 1));

        Ok(Self {
            name,
            source,
            config,
            pos: 0,
            line_starts,
            tokens: Vec::new(),
            pending_lead: Trim::default(),
            raw_open,
            raw_close,
        })
    }

    /// Tokenize the entire input
    pub fn tokenize(mut self) -> Result<Vec<Token>> {
        while self.pos < self.source.len() {
            match self.next_tag() {
                Some((start, kind, delim_len)) => {
                    self.push_text(self.pos, start, Some(kind));
                    self.pos = start + delim_len;
                    match kind {
                        TagKind::Comment => self.lex_comment(start)?,
                        TagKind::Variable => self.lex_tag(start, TagKind::Variable)?,
                        TagKind::Block => {
                            if !self.try_lex_raw(start)? {
                                self.lex_tag(start, TagKind::Block)?;
                            }
                        }
                    }
                }
                None => {
                    self.push_text(self.pos, self.source.len(), None);
                    self.pos = self.source.len();
                }
            }
        }
        let span = self.span_at(self.source.len());
        self.tokens.push(Token {
            kind: TokenKind::Eof,
            span,
        });
        Ok(self.tokens)
    }

    fn span_at(&self, offset: usize) -> Span {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        let column = self.source[self.line_starts[line]..offset].chars().count() + 1;
        Span {
            line: line + 1,
            column,
        }
    }

    fn error(&self, offset: usize, message: impl Into<String>) -> Error {
        let span = self.span_at(offset);
        Error::Lex {
            template: self.name.to_string(),
            line: span.line,
            column: span.column,
            message: message.into(),
        }
    }

    fn push(&mut self, kind: TokenKind, offset: usize) {
        let span = self.span_at(offset);
        self.tokens.push(Token { kind, span });
    }

    /// Locate the earliest opening delimiter at or after the cursor
    fn next_tag(&self) -> Option<(usize, TagKind, usize)> {
        let syntax = &self.config.syntax;
        let rest = &self.source[self.pos..];
        let candidates = [
            (syntax.variable_start.as_str(), TagKind::Variable),
            (syntax.block_start.as_str(), TagKind::Block),
            (syntax.comment_start.as_str(), TagKind::Comment),
        ];
        let mut best: Option<(usize, TagKind, usize)> = None;
        for (delim, kind) in candidates {
            if delim.is_empty() {
                continue;
            }
            if let Some(idx) = rest.find(delim) {
                let better = match best {
                    None => true,
                    Some((b, _, len)) => idx < b || (idx == b && delim.len() > len),
                };
                if better {
                    best = Some((idx, kind, delim.len()));
                }
            }
        }
        best.map(|(idx, kind, len)| (self.pos + idx, kind, len))
    }

    /// Emit the text between `start` and `end`, applying lead flags from the
    /// previous tag and tail flags from the tag that follows.
    fn push_text(&mut self, start: usize, end: usize, next: Option<TagKind>) {
        let lead = std::mem::take(&mut self.pending_lead);
        if start >= end {
            return;
        }
        let source = self.source;
        let raw = &source[start..end];
        let mut tail = Trim::default();
        if next.is_some() {
            let after = &source[end..];
            let marker = after
                .get(self.delim_len(next) ..)
                .and_then(|s| s.chars().next());
            match marker {
                Some('-') => tail = Trim::set(true, self.config.trim_blocks),
                Some('+') => {}
                _ => {
                    if next != Some(TagKind::Variable)
                        && self.config.lstrip_blocks
                        && Self::starts_line(raw, start)
                    {
                        tail.horizontal = true;
                    }
                }
            }
        }
        let token = TextToken {
            raw: raw.to_string(),
            lead,
            tail,
        };
        self.push(TokenKind::Text(token), start);
    }

    fn delim_len(&self, kind: Option<TagKind>) -> usize {
        let syntax = &self.config.syntax;
        match kind {
            Some(TagKind::Variable) => syntax.variable_start.len(),
            Some(TagKind::Block) => syntax.block_start.len(),
            Some(TagKind::Comment) => syntax.comment_start.len(),
            None => 0,
        }
    }

    /// Whether the trailing part of `raw` is only indentation at the start of a line
    fn starts_line(raw: &str, start: usize) -> bool {
        let (tail, at_line_start) = match raw.rfind('\n') {
            Some(i) => (&raw[i + 1..], true),
            None => (raw, start == 0),
        };
        at_line_start && tail.chars().all(|c| c == ' ' || c == '\t')
    }

    /// Consume a `-` or `+` marker directly after an opening delimiter
    fn skip_open_marker(&mut self) {
        if matches!(self.source[self.pos..].chars().next(), Some('-') | Some('+')) {
            self.pos += 1;
        }
    }

    /// Set the lead flags for the text following a closing delimiter
    fn close_tag(&mut self, marker: Option<char>, kind: TagKind) {
        self.pending_lead = match marker {
            Some('-') => Trim::set(true, self.config.trim_blocks),
            Some('+') => Trim::default(),
            _ if kind != TagKind::Variable && self.config.trim_blocks => Trim::set(false, true),
            _ => Trim::default(),
        };
    }

    fn lex_comment(&mut self, open: usize) -> Result<()> {
        self.skip_open_marker();
        let source = self.source;
        let end_delim = self.config.syntax.comment_end.clone();
        let rest = &source[self.pos..];
        let idx = rest
            .find(&end_delim)
            .ok_or_else(|| self.error(open, "unterminated comment"))?;
        let mut body = &rest[..idx];
        let marker = match body.chars().last() {
            Some(c @ ('-' | '+')) => {
                body = &body[..body.len() - 1];
                Some(c)
            }
            _ => None,
        };
        let body = body.to_string();
        self.push(TokenKind::Comment(body), open);
        self.pos += idx + end_delim.len();
        self.close_tag(marker, TagKind::Comment);
        Ok(())
    }

    /// Handle `{% raw %}...{% endraw %}` as a single passthrough token
    fn try_lex_raw(&mut self, open: usize) -> Result<bool> {
        let source = self.source;
        let after_marker = match source[self.pos..].chars().next() {
            Some('-') | Some('+') => self.pos + 1,
            _ => self.pos,
        };
        let (open_marker, body_start) = match self.raw_open.captures(&source[after_marker..]) {
            Some(caps) => {
                let marker = caps.get(1).and_then(|m| m.as_str().chars().next());
                let end = caps.get(0).map(|m| m.end()).unwrap_or(0);
                (marker, after_marker + end)
            }
            None => return Ok(false),
        };

        let caps = self
            .raw_close
            .captures(&source[body_start..])
            .ok_or_else(|| self.error(open, "unterminated raw block"))?;
        let (close_start, close_end) = match caps.get(0) {
            Some(m) => (body_start + m.start(), body_start + m.end()),
            None => return Err(self.error(open, "unterminated raw block")),
        };
        let close_open_marker = caps.get(1).and_then(|m| m.as_str().chars().next());
        let close_marker = caps.get(2).and_then(|m| m.as_str().chars().next());

        let text = TextToken {
            raw: source[body_start..close_start].to_string(),
            lead: match open_marker {
                Some('-') => Trim::set(true, self.config.trim_blocks),
                Some('+') => Trim::default(),
                _ => Trim::set(false, self.config.trim_blocks),
            },
            tail: match close_open_marker {
                Some('-') => Trim::set(true, self.config.trim_blocks),
                _ => Trim::default(),
            },
        };
        self.push(TokenKind::Raw(text.visible().to_string()), open);
        self.pos = close_end;
        self.close_tag(close_marker, TagKind::Block);
        Ok(true)
    }

    /// Tokenize the expression content of a `{{ }}` or `{% %}` tag
    fn lex_tag(&mut self, open: usize, kind: TagKind) -> Result<()> {
        let (start_kind, end_kind, end_delim) = match kind {
            TagKind::Variable => (
                TokenKind::VariableStart,
                TokenKind::VariableEnd,
                self.config.syntax.variable_end.clone(),
            ),
            _ => (
                TokenKind::BlockStart,
                TokenKind::BlockEnd,
                self.config.syntax.block_end.clone(),
            ),
        };
        self.push(start_kind, open);
        self.skip_open_marker();

        let source = self.source;
        let mut brace_depth = 0usize;
        loop {
            self.skip_whitespace();
            let rest = &source[self.pos..];
            if rest.is_empty() {
                let what = if kind == TagKind::Variable {
                    "unterminated print statement"
                } else {
                    "unterminated block tag"
                };
                return Err(self.error(open, what));
            }
            if brace_depth == 0 {
                for marker in ['-', '+'] {
                    if rest.starts_with(marker) && rest[1..].starts_with(&end_delim) {
                        let at = self.pos;
                        self.pos += 1 + end_delim.len();
                        self.push(end_kind, at);
                        self.close_tag(Some(marker), kind);
                        return Ok(());
                    }
                }
                if rest.starts_with(&end_delim) {
                    let at = self.pos;
                    self.pos += end_delim.len();
                    self.push(end_kind, at);
                    self.close_tag(None, kind);
                    return Ok(());
                }
            }
            let token = self.lex_expr_token()?;
            match token {
                TokenKind::LBrace => brace_depth += 1,
                TokenKind::RBrace => brace_depth = brace_depth.saturating_sub(1),
                _ => {}
            }
        }
    }

    fn skip_whitespace(&mut self) {
        let rest = &self.source[self.pos..];
        let trimmed = rest.trim_start();
        self.pos += rest.len() - trimmed.len();
    }

    /// Lex one token inside a tag, pushing it and returning its kind
    fn lex_expr_token(&mut self) -> Result<TokenKind> {
        let start = self.pos;
        let source = self.source;
        let rest = &source[start..];
        let c = match rest.chars().next() {
            Some(c) => c,
            None => return Err(self.error(start, "unexpected end of template")),
        };

        let kind = if c.is_alphabetic() || c == '_' {
            let len = rest
                .find(|ch: char| !(ch.is_alphanumeric() || ch == '_'))
                .unwrap_or(rest.len());
            self.pos += len;
            TokenKind::Ident(rest[..len].to_string())
        } else if c.is_ascii_digit() {
            self.lex_number()?
        } else if c == '\'' || c == '"' {
            self.lex_string(c)?
        } else {
            let (kind, len) = match rest.as_bytes() {
                [b'*', b'*', ..] => (TokenKind::Power, 2),
                [b'/', b'/', ..] => (TokenKind::DoubleSlash, 2),
                [b'=', b'=', ..] => (TokenKind::Eq, 2),
                [b'!', b'=', ..] => (TokenKind::Ne, 2),
                [b'<', b'=', ..] => (TokenKind::Le, 2),
                [b'>', b'=', ..] => (TokenKind::Ge, 2),
                [b'+', ..] => (TokenKind::Plus, 1),
                [b'-', ..] => (TokenKind::Minus, 1),
                [b'*', ..] => (TokenKind::Star, 1),
                [b'/', ..] => (TokenKind::Slash, 1),
                [b'%', ..] => (TokenKind::Percent, 1),
                [b'~', ..] => (TokenKind::Tilde, 1),
                [b'|', ..] => (TokenKind::Pipe, 1),
                [b'.', ..] => (TokenKind::Dot, 1),
                [b',', ..] => (TokenKind::Comma, 1),
                [b':', ..] => (TokenKind::Colon, 1),
                [b'=', ..] => (TokenKind::Assign, 1),
                [b'<', ..] => (TokenKind::Lt, 1),
                [b'>', ..] => (TokenKind::Gt, 1),
                [b'(', ..] => (TokenKind::LParen, 1),
                [b')', ..] => (TokenKind::RParen, 1),
                [b'[', ..] => (TokenKind::LBracket, 1),
                [b']', ..] => (TokenKind::RBracket, 1),
                [b'{', ..] => (TokenKind::LBrace, 1),
                [b'}', ..] => (TokenKind::RBrace, 1),
                _ => return Err(self.error(start, format!("unexpected character '{}'", c))),
            };
            self.pos += len;
            kind
        };
        self.push(kind.clone(), start);
        Ok(kind)
    }

    fn lex_number(&mut self) -> Result<TokenKind> {
        let start = self.pos;
        let bytes = self.source.as_bytes();
        let mut end = start;
        let digits = |mut i: usize| {
            while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'_') {
                i += 1;
            }
            i
        };
        end = digits(end);
        let mut is_float = false;
        if end + 1 < bytes.len() && bytes[end] == b'.' && bytes[end + 1].is_ascii_digit() {
            is_float = true;
            end = digits(end + 1);
        }
        if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
            let mut exp = end + 1;
            if exp < bytes.len() && (bytes[exp] == b'+' || bytes[exp] == b'-') {
                exp += 1;
            }
            if exp < bytes.len() && bytes[exp].is_ascii_digit() {
                is_float = true;
                end = digits(exp);
            }
        }
        let text: String = self.source[start..end].chars().filter(|c| *c != '_').collect();
        self.pos = end;
        if is_float {
            text.parse::<f64>()
                .map(TokenKind::Float)
                .map_err(|_| self.error(start, format!("invalid float literal '{}'", text)))
        } else {
            text.parse::<i64>()
                .map(TokenKind::Int)
                .map_err(|_| self.error(start, format!("integer literal '{}' out of range", text)))
        }
    }

    fn lex_string(&mut self, quote: char) -> Result<TokenKind> {
        let start = self.pos;
        let mut out = String::new();
        let mut chars = self.source[start + 1..].char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                c if c == quote => {
                    self.pos = start + 1 + i + 1;
                    return Ok(TokenKind::Str(out));
                }
                '\\' => match chars.next() {
                    Some((_, 'n')) => out.push('\n'),
                    Some((_, 't')) => out.push('\t'),
                    Some((_, 'r')) => out.push('\r'),
                    Some((_, '0')) => out.push('\0'),
                    Some((_, esc @ ('\\' | '\'' | '"'))) => out.push(esc),
                    Some((_, other)) => {
                        out.push('\\');
                        out.push(other);
                    }
                    None => break,
                },
                c => out.push(c),
            }
        }
        Err(self.error(start, "unterminated string literal"))
    }
}

/// Tokenize `source` with the given environment configuration
pub fn tokenize(name: &str, source: &str, config: &EnvironmentConfig) -> Result<Vec<Token>> {
    Lexer::new(name, source, config)?.tokenize()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize("test", source, &EnvironmentConfig::default())
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    fn texts(source: &str, config: &EnvironmentConfig) -> Vec<String> {
        tokenize("test", source, config)
            .unwrap()
            .into_iter()
            .filter_map(|t| match t.kind {
                TokenKind::Text(text) => Some(text.visible().to_string()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_lexer_plain_text() {
        let tokens = kinds("hello world");
        assert_eq!(tokens.len(), 2);
        assert!(matches!(&tokens[0], TokenKind::Text(t) if t.raw == "hello world"));
        assert_eq!(tokens[1], TokenKind::Eof);
    }

    #[test]
    fn test_lexer_expression_tokens() {
        let tokens = kinds("{{ a.b + 2 ** 3 // 1.5 ~ 'x' }}");
        assert_eq!(
            tokens,
            vec![
                TokenKind::VariableStart,
                TokenKind::Ident("a".into()),
                TokenKind::Dot,
                TokenKind::Ident("b".into()),
                TokenKind::Plus,
                TokenKind::Int(2),
                TokenKind::Power,
                TokenKind::Int(3),
                TokenKind::DoubleSlash,
                TokenKind::Float(1.5),
                TokenKind::Tilde,
                TokenKind::Str("x".into()),
                TokenKind::VariableEnd,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_lexer_dict_literal_braces() {
        let tokens = kinds("{{ {'a': {'b': 1}} }}");
        assert_eq!(tokens.iter().filter(|t| **t == TokenKind::RBrace).count(), 2);
        assert_eq!(tokens[tokens.len() - 2], TokenKind::VariableEnd);
    }

    #[test]
    fn test_lexer_string_escapes() {
        let tokens = kinds(r#"{{ "a\"b\n" }}"#);
        assert_eq!(tokens[1], TokenKind::Str("a\"b\n".into()));
    }

    #[test]
    fn test_lexer_minus_trims_horizontal_only() {
        let config = EnvironmentConfig::default();
        let out = texts("a {%- if true -%} b {%- endif -%} c", &config);
        assert_eq!(out, vec!["a", "b", "c"]);

        let out = texts("a \n{%- x -%}\n b", &config);
        assert_eq!(out, vec!["a \n", "\n b"]);
    }

    #[test]
    fn test_lexer_minus_with_trim_blocks_takes_newline() {
        let config = EnvironmentConfig {
            trim_blocks: true,
            ..Default::default()
        };
        let out = texts("a\n{%- x -%}\nb", &config);
        assert_eq!(out, vec!["a", "b"]);
    }

    #[test]
    fn test_lexer_trim_blocks() {
        let config = EnvironmentConfig {
            trim_blocks: true,
            ..Default::default()
        };
        let out = texts("{% if x %}\nyes\n{% endif %}\nafter", &config);
        assert_eq!(out, vec!["yes\n", "after"]);
        // print statements are not affected
        let out = texts("{{ x }}\nnext", &config);
        assert_eq!(out, vec!["\nnext"]);
    }

    #[test]
    fn test_lexer_lstrip_blocks() {
        let config = EnvironmentConfig {
            lstrip_blocks: true,
            ..Default::default()
        };
        let out = texts("line\n    {% if x %}", &config);
        assert_eq!(out, vec!["line\n"]);
        let out = texts("text {% if x %}", &config);
        assert_eq!(out, vec!["text "]);
        let out = texts("line\n    {%+ if x %}", &config);
        assert_eq!(out, vec!["line\n    "]);
    }

    #[test]
    fn test_lexer_raw_block() {
        let tokens = kinds("{% raw %}{{ not parsed }}{% endraw %}!");
        assert_eq!(tokens[0], TokenKind::Raw("{{ not parsed }}".into()));
        assert!(matches!(&tokens[1], TokenKind::Text(t) if t.raw == "!"));
    }

    #[test]
    fn test_lexer_comment() {
        let tokens = kinds("a{# note #}b");
        assert_eq!(tokens[1], TokenKind::Comment(" note ".into()));
    }

    #[test]
    fn test_lexer_custom_delimiters() {
        let mut config = EnvironmentConfig::default();
        config.syntax.variable_start = "<<".into();
        config.syntax.variable_end = ">>".into();
        let tokens = tokenize("t", "hi << name >>", &config).unwrap();
        assert_eq!(tokens[1].kind, TokenKind::VariableStart);
        assert_eq!(tokens[2].kind, TokenKind::Ident("name".into()));
    }

    #[test]
    fn test_lexer_spans() {
        let tokens = tokenize("t", "ab\n  {{ x }}", &EnvironmentConfig::default()).unwrap();
        assert_eq!(tokens[1].span, Span { line: 2, column: 3 });
        assert_eq!(tokens[2].span, Span { line: 2, column: 6 });
    }

    #[test]
    fn test_lexer_unterminated_errors() {
        let config = EnvironmentConfig::default();
        for source in ["{{ x", "{% if", "{# open", "{% raw %}never closed", "{{ 'abc }}"] {
            let err = tokenize("t", source, &config).unwrap_err();
            assert!(matches!(err, Error::Lex { .. }), "{}: {:?}", source, err);
        }
    }
}
