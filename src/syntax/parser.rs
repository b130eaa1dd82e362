//! Recursive-descent parser producing [`TemplateAst`]

use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;

use super::ast::*;
use super::lexer::{Token, TokenKind};
use crate::error::{Error, InheritanceError, Result};

/// Words that end an unparenthesised test argument
const RESERVED: &[&str] = &[
    "and", "or", "not", "is", "in", "if", "else", "recursive", "for", "with", "without",
];

/// Parser over the token stream of one template
pub struct Parser<'a> {
    name: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    /// Lexically enclosing `{% autoescape %}` settings
    autoescape: Vec<bool>,
    loop_depth: usize,
    nesting: usize,
    block_names: HashSet<String>,
    extends: Option<Expr>,
}

impl<'a> Parser<'a> {
    pub fn new(name: &'a str, tokens: Vec<Token>) -> Self {
        Self {
            name,
            tokens,
            pos: 0,
            autoescape: Vec::new(),
            loop_depth: 0,
            nesting: 0,
            block_names: HashSet::new(),
            extends: None,
        }
    }

    /// Parse the whole template
    pub fn parse(mut self) -> Result<TemplateAst> {
        let (nodes, _) = self.parse_nodes(&[])?;
        Ok(TemplateAst {
            name: self.name.to_string(),
            nodes,
            extends: self.extends,
        })
    }

    // ========================================================================
    // Token helpers
    // ========================================================================

    fn peek(&self) -> &Token {
        let idx = self.pos.min(self.tokens.len().saturating_sub(1));
        &self.tokens[idx]
    }

    fn peek_kind_at(&self, offset: usize) -> Option<&TokenKind> {
        self.tokens.get(self.pos + offset).map(|t| &t.kind)
    }

    fn span(&self) -> Span {
        self.peek().span
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn is_ident(&self, word: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Ident(name) if name == word)
    }

    fn eat_ident(&mut self, word: &str) -> bool {
        if self.is_ident(word) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error_at(&self, span: Span, message: impl Into<String>) -> Error {
        Error::Parse {
            template: self.name.to_string(),
            line: span.line,
            column: span.column,
            message: message.into(),
        }
    }

    fn unexpected(&self, expected: &str) -> Error {
        let token = self.peek();
        self.error_at(
            token.span,
            format!("expected {}, found {}", expected, token.kind.describe()),
        )
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token> {
        if self.check(&kind) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(&kind.describe()))
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        match &self.peek().kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    fn expect_word(&mut self, word: &str) -> Result<()> {
        if self.eat_ident(word) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}'", word)))
        }
    }

    fn expect_block_end(&mut self) -> Result<()> {
        self.expect(TokenKind::BlockEnd).map(|_| ())
    }

    // ========================================================================
    // Statements
    // ========================================================================

    /// Parse nodes until one of `terminators` opens a block tag.
    ///
    /// The terminator keyword is consumed; the rest of its tag is left to the caller.
    fn parse_nodes(&mut self, terminators: &[&str]) -> Result<(Vec<Node>, Option<String>)> {
        let mut nodes = Vec::new();
        loop {
            let token = self.peek().clone();
            match token.kind {
                TokenKind::Eof => {
                    if terminators.is_empty() {
                        return Ok((nodes, None));
                    }
                    return Err(self.error_at(
                        token.span,
                        format!(
                            "unexpected end of template, expected {}",
                            describe_words(terminators)
                        ),
                    ));
                }
                TokenKind::Text(text) => {
                    self.advance();
                    nodes.push(Node::Text(text));
                }
                TokenKind::Raw(text) => {
                    self.advance();
                    nodes.push(Node::Raw(text));
                }
                TokenKind::Comment(text) => {
                    self.advance();
                    nodes.push(Node::Comment(text));
                }
                TokenKind::VariableStart => {
                    self.advance();
                    let expr = self.parse_expression()?;
                    self.expect(TokenKind::VariableEnd)?;
                    nodes.push(Node::Output {
                        expr,
                        autoescape: self.autoescape.last().copied(),
                    });
                }
                TokenKind::BlockStart => {
                    let keyword = match self.peek_kind_at(1) {
                        Some(TokenKind::Ident(word)) => word.clone(),
                        _ => {
                            self.advance();
                            return Err(self.unexpected("statement name"));
                        }
                    };
                    if terminators.contains(&keyword.as_str()) {
                        self.advance();
                        self.advance();
                        return Ok((nodes, Some(keyword)));
                    }
                    if keyword.starts_with("end") || keyword == "elif" || keyword == "else" {
                        let span = self.tokens[self.pos + 1].span;
                        let message = if terminators.is_empty() {
                            format!("unexpected '{}'", keyword)
                        } else {
                            format!(
                                "unexpected '{}', expected {}",
                                keyword,
                                describe_words(terminators)
                            )
                        };
                        return Err(self.error_at(span, message));
                    }
                    if let Some(node) = self.parse_statement()? {
                        nodes.push(node);
                    }
                }
                _ => return Err(self.unexpected("template text or tag")),
            }
        }
    }

    /// Parse a nested body that must end with one of `terminators`
    fn parse_body(&mut self, terminators: &[&str]) -> Result<(Vec<Node>, String)> {
        self.nesting += 1;
        let result = self.parse_nodes(terminators);
        self.nesting -= 1;
        let (nodes, end) = result?;
        Ok((nodes, end.unwrap_or_default()))
    }

    fn parse_statement(&mut self) -> Result<Option<Node>> {
        self.expect(TokenKind::BlockStart)?;
        let span = self.span();
        let keyword = self.expect_ident()?;
        let node = match keyword.as_str() {
            "if" => self.parse_if()?,
            "for" => self.parse_for(span)?,
            "block" => self.parse_block(span)?,
            "extends" => {
                self.parse_extends(span)?;
                return Ok(None);
            }
            "include" => self.parse_include(span)?,
            "import" => self.parse_import(span)?,
            "from" => self.parse_from_import(span)?,
            "macro" => self.parse_macro(span)?,
            "call" => self.parse_call_block(span)?,
            "set" => self.parse_set(span)?,
            "with" => self.parse_with()?,
            "filter" => self.parse_filter_block(span)?,
            "do" => {
                let expr = self.parse_expression()?;
                self.expect_block_end()?;
                Node::Do(expr)
            }
            "autoescape" => self.parse_autoescape()?,
            "break" | "continue" => {
                if self.loop_depth == 0 {
                    return Err(self.error_at(span, format!("'{}' outside of a loop", keyword)));
                }
                self.expect_block_end()?;
                if keyword == "break" {
                    Node::Break(span)
                } else {
                    Node::Continue(span)
                }
            }
            other => {
                return Err(self.error_at(span, format!("unknown statement '{}'", other)));
            }
        };
        Ok(Some(node))
    }

    fn parse_if(&mut self) -> Result<Node> {
        let terminators = ["elif", "else", "endif"];
        let mut branches = Vec::new();
        let mut else_body = None;

        let condition = self.parse_expression()?;
        self.expect_block_end()?;
        let (body, mut end) = self.parse_body(&terminators)?;
        branches.push((condition, body));

        loop {
            match end.as_str() {
                "elif" => {
                    let condition = self.parse_expression()?;
                    self.expect_block_end()?;
                    let (body, next) = self.parse_body(&terminators)?;
                    branches.push((condition, body));
                    end = next;
                }
                "else" => {
                    self.expect_block_end()?;
                    let (body, _) = self.parse_body(&["endif"])?;
                    else_body = Some(body);
                    self.expect_block_end()?;
                    break;
                }
                _ => {
                    self.expect_block_end()?;
                    break;
                }
            }
        }

        Ok(Node::If {
            branches,
            else_body,
        })
    }

    fn parse_for(&mut self, span: Span) -> Result<Node> {
        let targets = self.parse_targets()?;
        self.expect_word("in")?;
        let iter = self.parse_or()?;
        let filter = if self.eat_ident("if") {
            Some(self.parse_or()?)
        } else {
            None
        };
        let recursive = self.eat_ident("recursive");
        self.expect_block_end()?;

        self.loop_depth += 1;
        let body = self.parse_body(&["else", "endfor"]);
        self.loop_depth -= 1;
        let (body, end) = body?;

        let else_body = if end == "else" {
            self.expect_block_end()?;
            let (nodes, _) = self.parse_body(&["endfor"])?;
            Some(nodes)
        } else {
            None
        };
        self.expect_block_end()?;

        Ok(Node::For(Arc::new(ForLoop {
            targets,
            iter,
            filter,
            body,
            else_body,
            recursive,
            span,
        })))
    }

    fn parse_block(&mut self, span: Span) -> Result<Node> {
        let name = self.expect_ident()?;
        let mut required = false;
        loop {
            if self.eat_ident("scoped") {
                continue;
            }
            if self.eat_ident("required") {
                required = true;
                continue;
            }
            break;
        }
        self.expect_block_end()?;
        if !self.block_names.insert(name.clone()) {
            return Err(self.error_at(span, format!("block '{}' defined twice", name)));
        }

        let saved_loops = std::mem::take(&mut self.loop_depth);
        let body = self.parse_body(&["endblock"]);
        self.loop_depth = saved_loops;
        let (body, _) = body?;

        self.parse_end_name(&name)?;
        Ok(Node::Block(Arc::new(Block {
            name,
            body,
            required,
            span,
        })))
    }

    /// Optional repeated name after `endblock`/`endmacro`
    fn parse_end_name(&mut self, name: &str) -> Result<()> {
        if let TokenKind::Ident(end_name) = &self.peek().kind {
            if end_name != name {
                let message = format!("mismatched end tag: expected '{}', found '{}'", name, end_name);
                return Err(self.error_at(self.span(), message));
            }
            self.advance();
        }
        self.expect_block_end()
    }

    fn parse_extends(&mut self, span: Span) -> Result<()> {
        if self.nesting > 0 {
            return Err(self.error_at(span, InheritanceError::NestedExtends.to_string()));
        }
        if self.extends.is_some() {
            return Err(self.error_at(span, "extends defined twice"));
        }
        let parent = self.parse_expression()?;
        self.expect_block_end()?;
        self.extends = Some(parent);
        Ok(())
    }

    /// Trailing `with context` / `without context`
    fn parse_context_modifier(&mut self, default: bool) -> Result<bool> {
        let with = if self.is_ident("with") {
            true
        } else if self.is_ident("without") {
            false
        } else {
            return Ok(default);
        };
        if !matches!(self.peek_kind_at(1), Some(TokenKind::Ident(w)) if w == "context") {
            return Ok(default);
        }
        self.advance();
        self.advance();
        Ok(with)
    }

    fn parse_include(&mut self, span: Span) -> Result<Node> {
        let names = self.parse_expression()?;
        let mut ignore_missing = false;
        if self.eat_ident("ignore") {
            self.expect_word("missing")?;
            ignore_missing = true;
        }
        let with_context = self.parse_context_modifier(true)?;
        self.expect_block_end()?;
        Ok(Node::Include {
            names,
            ignore_missing,
            with_context,
            span,
        })
    }

    fn parse_import(&mut self, span: Span) -> Result<Node> {
        let template = self.parse_expression()?;
        self.expect_word("as")?;
        let alias = self.expect_ident()?;
        let with_context = self.parse_context_modifier(false)?;
        self.expect_block_end()?;
        Ok(Node::Import {
            template,
            alias,
            with_context,
            span,
        })
    }

    fn parse_from_import(&mut self, span: Span) -> Result<Node> {
        let template = self.parse_expression()?;
        self.expect_word("import")?;
        let mut names = Vec::new();
        let mut with_context = false;
        loop {
            if self.is_ident("with") || self.is_ident("without") {
                with_context = self.parse_context_modifier(false)?;
                break;
            }
            let name = self.expect_ident()?;
            let alias = if self.eat_ident("as") {
                Some(self.expect_ident()?)
            } else {
                None
            };
            names.push((name, alias));
            if !self.eat(&TokenKind::Comma) {
                with_context = self.parse_context_modifier(false)?;
                break;
            }
        }
        if names.is_empty() {
            return Err(self.error_at(span, "from-import needs at least one name"));
        }
        self.expect_block_end()?;
        Ok(Node::FromImport {
            template,
            names,
            with_context,
            span,
        })
    }

    /// `(a, b=1, c='x')` parameter list of a macro or call block
    fn parse_params(&mut self) -> Result<(Vec<String>, IndexMap<String, Expr>)> {
        let mut params = Vec::new();
        let mut defaults = IndexMap::new();
        self.expect(TokenKind::LParen)?;
        while !self.check(&TokenKind::RParen) {
            let span = self.span();
            let name = self.expect_ident()?;
            if params.contains(&name) {
                return Err(self.error_at(span, format!("duplicate parameter '{}'", name)));
            }
            if self.eat(&TokenKind::Assign) {
                defaults.insert(name.clone(), self.parse_expression()?);
            }
            params.push(name);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok((params, defaults))
    }

    fn parse_macro(&mut self, span: Span) -> Result<Node> {
        let name = self.expect_ident()?;
        let (params, defaults) = self.parse_params()?;
        self.expect_block_end()?;

        let saved_loops = std::mem::take(&mut self.loop_depth);
        let body = self.parse_body(&["endmacro"]);
        self.loop_depth = saved_loops;
        let (body, _) = body?;

        self.parse_end_name(&name)?;
        Ok(Node::Macro(Arc::new(MacroDef {
            name,
            params,
            defaults,
            body,
            span,
        })))
    }

    fn parse_call_block(&mut self, span: Span) -> Result<Node> {
        let (params, defaults) = if self.check(&TokenKind::LParen) {
            self.parse_params()?
        } else {
            (Vec::new(), IndexMap::new())
        };
        let call = self.parse_expression()?;
        if !matches!(call.kind, ExprKind::Call { .. }) {
            return Err(self.error_at(call.span, "call block expects a macro call"));
        }
        self.expect_block_end()?;

        let saved_loops = std::mem::take(&mut self.loop_depth);
        let body = self.parse_body(&["endcall"]);
        self.loop_depth = saved_loops;
        let (body, _) = body?;
        self.expect_block_end()?;

        Ok(Node::CallBlock {
            call,
            caller: Arc::new(MacroDef {
                name: "caller".to_string(),
                params,
                defaults,
                body,
                span,
            }),
        })
    }

    fn parse_assign_target(&mut self) -> Result<AssignTarget> {
        let span = self.span();
        let first = self.expect_ident()?;
        if self.eat(&TokenKind::Dot) {
            let attr = self.expect_ident()?;
            if self.check(&TokenKind::Dot) || self.check(&TokenKind::LBracket) {
                return Err(self.error_at(span, "only one level of namespace attribute can be assigned"));
            }
            return Ok(AssignTarget::Attr {
                namespace: first,
                attr,
            });
        }
        if self.check(&TokenKind::LBracket) {
            return Err(self.error_at(span, "cannot assign to a subscript"));
        }
        if self.check(&TokenKind::Comma) {
            let mut names = vec![first];
            while self.eat(&TokenKind::Comma) {
                names.push(self.expect_ident()?);
            }
            return Ok(AssignTarget::Unpack(names));
        }
        Ok(AssignTarget::Name(first))
    }

    fn parse_set(&mut self, span: Span) -> Result<Node> {
        let target = self.parse_assign_target()?;
        if self.eat(&TokenKind::Assign) {
            let value = self.parse_tuple_or_expression()?;
            self.expect_block_end()?;
            return Ok(Node::Set {
                target,
                value,
                span,
            });
        }

        if matches!(target, AssignTarget::Unpack(_)) {
            return Err(self.error_at(span, "block assignment needs a single target"));
        }
        let mut filters = Vec::new();
        while self.eat(&TokenKind::Pipe) {
            filters.push(self.parse_filter_call()?);
        }
        self.expect_block_end()?;
        // captured bodies cannot break out of an enclosing loop
        let saved_loops = std::mem::take(&mut self.loop_depth);
        let body = self.parse_body(&["endset"]);
        self.loop_depth = saved_loops;
        let (body, _) = body?;
        self.expect_block_end()?;
        Ok(Node::SetBlock {
            target,
            filters,
            body,
            autoescape: self.autoescape.last().copied(),
            span,
        })
    }

    fn parse_with(&mut self) -> Result<Node> {
        let mut bindings = Vec::new();
        while !self.check(&TokenKind::BlockEnd) {
            let name = self.expect_ident()?;
            self.expect(TokenKind::Assign)?;
            bindings.push((name, self.parse_expression()?));
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect_block_end()?;
        let (body, _) = self.parse_body(&["endwith"])?;
        self.expect_block_end()?;
        Ok(Node::With { bindings, body })
    }

    fn parse_filter_block(&mut self, span: Span) -> Result<Node> {
        let mut filters = vec![self.parse_filter_call()?];
        while self.eat(&TokenKind::Pipe) {
            filters.push(self.parse_filter_call()?);
        }
        self.expect_block_end()?;
        // captured bodies cannot break out of an enclosing loop
        let saved_loops = std::mem::take(&mut self.loop_depth);
        let body = self.parse_body(&["endfilter"]);
        self.loop_depth = saved_loops;
        let (body, _) = body?;
        self.expect_block_end()?;
        Ok(Node::FilterBlock {
            filters,
            body,
            autoescape: self.autoescape.last().copied(),
            span,
        })
    }

    fn parse_autoescape(&mut self) -> Result<Node> {
        let expr = self.parse_expression()?;
        let enabled = match expr.kind {
            ExprKind::Literal(Literal::Bool(b)) => b,
            _ => return Err(self.error_at(expr.span, "autoescape expects true or false")),
        };
        self.expect_block_end()?;
        self.autoescape.push(enabled);
        let body = self.parse_body(&["endautoescape"]);
        self.autoescape.pop();
        let (body, _) = body?;
        self.expect_block_end()?;
        Ok(Node::Autoescape { enabled, body })
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    /// Loop or unpacking targets: `a`, `a, b` or `(a, b)`
    fn parse_targets(&mut self) -> Result<Vec<String>> {
        let parens = self.eat(&TokenKind::LParen);
        let mut targets = vec![self.expect_ident()?];
        while self.eat(&TokenKind::Comma) {
            if parens && self.check(&TokenKind::RParen) {
                break;
            }
            targets.push(self.expect_ident()?);
        }
        if parens {
            self.expect(TokenKind::RParen)?;
        }
        Ok(targets)
    }

    /// An expression, or a bare tuple `a, b` as used by `set x, y = 1, 2`
    fn parse_tuple_or_expression(&mut self) -> Result<Expr> {
        let first = self.parse_expression()?;
        if !self.check(&TokenKind::Comma) {
            return Ok(first);
        }
        let span = first.span;
        let mut items = vec![first];
        while self.eat(&TokenKind::Comma) {
            if self.check(&TokenKind::BlockEnd) {
                break;
            }
            items.push(self.parse_expression()?);
        }
        Ok(Expr::new(ExprKind::Tuple(items), span))
    }

    pub fn parse_expression(&mut self) -> Result<Expr> {
        let expr = self.parse_or()?;
        if !self.is_ident("if") {
            return Ok(expr);
        }
        let span = expr.span;
        self.advance();
        let condition = self.parse_or()?;
        let otherwise = if self.eat_ident("else") {
            Some(Box::new(self.parse_expression()?))
        } else {
            None
        };
        Ok(Expr::new(
            ExprKind::Ternary {
                condition: Box::new(condition),
                then: Box::new(expr),
                otherwise,
            },
            span,
        ))
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while self.eat_ident("or") {
            let right = self.parse_and()?;
            left = binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_not()?;
        while self.eat_ident("and") {
            let right = self.parse_not()?;
            left = binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if self.is_ident("not") {
            let span = self.advance().span;
            let operand = self.parse_not()?;
            return Ok(Expr::new(
                ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                span,
            ));
        }
        self.parse_is()
    }

    fn parse_is(&mut self) -> Result<Expr> {
        let mut expr = self.parse_compare()?;
        while self.eat_ident("is") {
            let negated = self.eat_ident("not");
            let name = self.expect_ident()?;
            let args = if self.check(&TokenKind::LParen) {
                let span = self.span();
                let args = self.parse_call_args()?;
                if !args.keyword.is_empty() {
                    return Err(self.error_at(span, "tests do not accept keyword arguments"));
                }
                args.positional
            } else if self.starts_test_argument() {
                vec![self.parse_postfix()?]
            } else {
                Vec::new()
            };
            let span = expr.span;
            expr = Expr::new(
                ExprKind::Test {
                    value: Box::new(expr),
                    name,
                    args,
                    negated,
                },
                span,
            );
        }
        Ok(expr)
    }

    fn starts_test_argument(&self) -> bool {
        match &self.peek().kind {
            TokenKind::Str(_)
            | TokenKind::Int(_)
            | TokenKind::Float(_)
            | TokenKind::LBracket
            | TokenKind::LBrace => true,
            TokenKind::Ident(word) => !RESERVED.contains(&word.as_str()),
            _ => false,
        }
    }

    fn parse_compare(&mut self) -> Result<Expr> {
        let left = self.parse_concat()?;
        let mut ops = Vec::new();
        loop {
            let op = match &self.peek().kind {
                TokenKind::Eq => CompareOp::Eq,
                TokenKind::Ne => CompareOp::Ne,
                TokenKind::Lt => CompareOp::Lt,
                TokenKind::Le => CompareOp::Le,
                TokenKind::Gt => CompareOp::Gt,
                TokenKind::Ge => CompareOp::Ge,
                TokenKind::Ident(w) if w == "in" => CompareOp::In,
                TokenKind::Ident(w)
                    if w == "not"
                        && matches!(self.peek_kind_at(1), Some(TokenKind::Ident(n)) if n == "in") =>
                {
                    CompareOp::NotIn
                }
                _ => break,
            };
            if op == CompareOp::NotIn {
                self.advance();
            }
            self.advance();
            ops.push((op, self.parse_concat()?));
        }
        if ops.is_empty() {
            return Ok(left);
        }
        let span = left.span;
        Ok(Expr::new(
            ExprKind::Compare {
                left: Box::new(left),
                ops,
            },
            span,
        ))
    }

    fn parse_concat(&mut self) -> Result<Expr> {
        let mut left = self.parse_additive()?;
        while self.eat(&TokenKind::Tilde) {
            let right = self.parse_additive()?;
            left = binary(BinaryOp::Concat, left, right);
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::DoubleSlash => BinaryOp::FloorDiv,
                TokenKind::Percent => BinaryOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        let op = match self.peek().kind {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Plus => UnaryOp::Pos,
            _ => return self.parse_power(),
        };
        let span = self.advance().span;
        let operand = self.parse_unary()?;
        Ok(Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            span,
        ))
    }

    fn parse_power(&mut self) -> Result<Expr> {
        let base = self.parse_filtered()?;
        if self.eat(&TokenKind::Power) {
            let exponent = self.parse_unary()?;
            return Ok(binary(BinaryOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn parse_filtered(&mut self) -> Result<Expr> {
        let mut expr = self.parse_postfix()?;
        while self.eat(&TokenKind::Pipe) {
            let call = self.parse_filter_call()?;
            expr = Expr::new(
                ExprKind::Filter {
                    value: Box::new(expr),
                    name: call.name,
                    args: call.args,
                },
                call.span,
            );
        }
        Ok(expr)
    }

    fn parse_filter_call(&mut self) -> Result<FilterCall> {
        let span = self.span();
        let name = self.expect_ident()?;
        let args = if self.check(&TokenKind::LParen) {
            self.parse_call_args()?
        } else {
            CallArgs::default()
        };
        Ok(FilterCall { name, args, span })
    }

    fn parse_call_args(&mut self) -> Result<CallArgs> {
        self.expect(TokenKind::LParen)?;
        let mut args = CallArgs::default();
        while !self.check(&TokenKind::RParen) {
            let is_keyword = matches!(self.peek().kind, TokenKind::Ident(_))
                && matches!(self.peek_kind_at(1), Some(TokenKind::Assign));
            if is_keyword {
                let name = self.expect_ident()?;
                self.advance();
                args.keyword.push((name, self.parse_expression()?));
            } else {
                let span = self.span();
                if !args.keyword.is_empty() {
                    return Err(self.error_at(span, "positional argument follows keyword argument"));
                }
                args.positional.push(self.parse_expression()?);
            }
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok(args)
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            let span = self.span();
            match self.peek().kind.clone() {
                TokenKind::Dot => {
                    self.advance();
                    match self.advance().kind {
                        TokenKind::Ident(attr) => {
                            expr = Expr::new(
                                ExprKind::GetAttr {
                                    value: Box::new(expr),
                                    attr,
                                },
                                span,
                            );
                        }
                        TokenKind::Int(n) => {
                            let index = Expr::new(ExprKind::Literal(Literal::Int(n)), span);
                            expr = Expr::new(
                                ExprKind::GetItem {
                                    value: Box::new(expr),
                                    index: Box::new(index),
                                },
                                span,
                            );
                        }
                        other => {
                            return Err(self.error_at(
                                span,
                                format!("expected attribute name, found {}", other.describe()),
                            ));
                        }
                    }
                }
                TokenKind::LBracket => {
                    self.advance();
                    expr = self.parse_subscript(expr, span)?;
                }
                TokenKind::LParen => {
                    let args = self.parse_call_args()?;
                    expr = Expr::new(
                        ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                        span,
                    );
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_subscript(&mut self, value: Expr, span: Span) -> Result<Expr> {
        let start = if self.check(&TokenKind::Colon) {
            None
        } else {
            Some(Box::new(self.parse_expression()?))
        };
        if !self.eat(&TokenKind::Colon) {
            self.expect(TokenKind::RBracket)?;
            return match start {
                Some(index) => Ok(Expr::new(
                    ExprKind::GetItem {
                        value: Box::new(value),
                        index,
                    },
                    span,
                )),
                None => Err(self.error_at(span, "empty subscript")),
            };
        }
        let stop = if self.check(&TokenKind::Colon) || self.check(&TokenKind::RBracket) {
            None
        } else {
            Some(Box::new(self.parse_expression()?))
        };
        let step = if self.eat(&TokenKind::Colon) && !self.check(&TokenKind::RBracket) {
            Some(Box::new(self.parse_expression()?))
        } else {
            None
        };
        self.expect(TokenKind::RBracket)?;
        Ok(Expr::new(
            ExprKind::Slice {
                value: Box::new(value),
                start,
                stop,
                step,
            },
            span,
        ))
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let token = self.peek().clone();
        let span = token.span;
        let kind = match token.kind {
            TokenKind::Ident(name) => {
                self.advance();
                match name.as_str() {
                    "true" | "True" => ExprKind::Literal(Literal::Bool(true)),
                    "false" | "False" => ExprKind::Literal(Literal::Bool(false)),
                    "none" | "None" => ExprKind::Literal(Literal::None),
                    "super"
                        if self.check(&TokenKind::LParen)
                            && matches!(self.peek_kind_at(1), Some(TokenKind::RParen)) =>
                    {
                        self.advance();
                        self.advance();
                        ExprKind::Super
                    }
                    _ => ExprKind::Var(name),
                }
            }
            TokenKind::Str(first) => {
                self.advance();
                let mut value = first;
                while let TokenKind::Str(next) = &self.peek().kind {
                    value.push_str(next);
                    self.advance();
                }
                ExprKind::Literal(Literal::Str(value))
            }
            TokenKind::Int(n) => {
                self.advance();
                ExprKind::Literal(Literal::Int(n))
            }
            TokenKind::Float(n) => {
                self.advance();
                ExprKind::Literal(Literal::Float(n))
            }
            TokenKind::LParen => {
                self.advance();
                return self.parse_parenthesized(span);
            }
            TokenKind::LBracket => {
                self.advance();
                return self.parse_list(span);
            }
            TokenKind::LBrace => {
                self.advance();
                return self.parse_dict(span);
            }
            _ => return Err(self.unexpected("expression")),
        };
        Ok(Expr::new(kind, span))
    }

    fn parse_parenthesized(&mut self, span: Span) -> Result<Expr> {
        if self.eat(&TokenKind::RParen) {
            return Ok(Expr::new(ExprKind::Tuple(Vec::new()), span));
        }
        let first = self.parse_expression()?;
        if self.eat(&TokenKind::RParen) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&TokenKind::Comma) {
            if self.check(&TokenKind::RParen) {
                break;
            }
            items.push(self.parse_expression()?);
        }
        self.expect(TokenKind::RParen)?;
        Ok(Expr::new(ExprKind::Tuple(items), span))
    }

    fn parse_list(&mut self, span: Span) -> Result<Expr> {
        if self.eat(&TokenKind::RBracket) {
            return Ok(Expr::new(ExprKind::List(Vec::new()), span));
        }
        let first = self.parse_expression()?;
        if self.is_ident("for") {
            let (clauses, conditions) = self.parse_comprehension()?;
            self.expect(TokenKind::RBracket)?;
            return Ok(Expr::new(
                ExprKind::ListComp {
                    element: Box::new(first),
                    clauses,
                    conditions,
                },
                span,
            ));
        }
        let mut items = vec![first];
        while self.eat(&TokenKind::Comma) {
            if self.check(&TokenKind::RBracket) {
                break;
            }
            items.push(self.parse_expression()?);
        }
        self.expect(TokenKind::RBracket)?;
        Ok(Expr::new(ExprKind::List(items), span))
    }

    fn parse_dict(&mut self, span: Span) -> Result<Expr> {
        if self.eat(&TokenKind::RBrace) {
            return Ok(Expr::new(ExprKind::Dict(Vec::new()), span));
        }
        let key = self.parse_expression()?;
        self.expect(TokenKind::Colon)?;
        let value = self.parse_expression()?;
        if self.is_ident("for") {
            let (clauses, conditions) = self.parse_comprehension()?;
            self.expect(TokenKind::RBrace)?;
            return Ok(Expr::new(
                ExprKind::DictComp {
                    key: Box::new(key),
                    value: Box::new(value),
                    clauses,
                    conditions,
                },
                span,
            ));
        }
        let mut pairs = vec![(key, value)];
        while self.eat(&TokenKind::Comma) {
            if self.check(&TokenKind::RBrace) {
                break;
            }
            let key = self.parse_expression()?;
            self.expect(TokenKind::Colon)?;
            pairs.push((key, self.parse_expression()?));
        }
        self.expect(TokenKind::RBrace)?;
        Ok(Expr::new(ExprKind::Dict(pairs), span))
    }

    /// `for x in xs [for y in ys]* [if cond]*`
    fn parse_comprehension(&mut self) -> Result<(Vec<CompFor>, Vec<Expr>)> {
        let mut clauses = Vec::new();
        while self.eat_ident("for") {
            let targets = self.parse_targets()?;
            self.expect_word("in")?;
            let iter = self.parse_or()?;
            clauses.push(CompFor { targets, iter });
        }
        let mut conditions = Vec::new();
        while self.eat_ident("if") {
            conditions.push(self.parse_or()?);
        }
        Ok((clauses, conditions))
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    let span = left.span;
    Expr::new(
        ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        span,
    )
}

fn describe_words(words: &[&str]) -> String {
    words
        .iter()
        .map(|w| format!("'{}'", w))
        .collect::<Vec<_>>()
        .join(" or ")
}

/// Lex and parse `source` into a template AST
pub fn parse(
    name: &str,
    source: &str,
    config: &crate::environment::EnvironmentConfig,
) -> Result<TemplateAst> {
    let tokens = super::lexer::tokenize(name, source, config)?;
    Parser::new(name, tokens).parse()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::EnvironmentConfig;

    fn parse_str(source: &str) -> Result<TemplateAst> {
        parse("test", source, &EnvironmentConfig::default())
    }

    fn parse_expr(source: &str) -> Expr {
        let ast = parse_str(&format!("{{{{ {} }}}}", source)).unwrap();
        match ast.nodes.into_iter().next() {
            Some(Node::Output { expr, .. }) => expr,
            other => panic!("expected output node, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_precedence_mul_over_add() {
        let expr = parse_expr("1 + 2 * 3");
        match expr.kind {
            ExprKind::Binary {
                op: BinaryOp::Add,
                right,
                ..
            } => assert!(matches!(right.kind, ExprKind::Binary { op: BinaryOp::Mul, .. })),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_power_is_right_associative() {
        let expr = parse_expr("2 ** 3 ** 2");
        match expr.kind {
            ExprKind::Binary {
                op: BinaryOp::Pow,
                left,
                right,
            } => {
                assert!(matches!(left.kind, ExprKind::Literal(Literal::Int(2))));
                assert!(matches!(right.kind, ExprKind::Binary { op: BinaryOp::Pow, .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_unary_minus_below_power() {
        let expr = parse_expr("-2 ** 2");
        assert!(matches!(expr.kind, ExprKind::Unary { op: UnaryOp::Neg, .. }));
    }

    #[test]
    fn test_parse_filter_chain_left_associative() {
        let expr = parse_expr("'Hi'|lower|upper");
        match expr.kind {
            ExprKind::Filter { value, name, .. } => {
                assert_eq!(name, "upper");
                assert!(matches!(value.kind, ExprKind::Filter { ref name, .. } if name == "lower"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_chained_comparison() {
        let expr = parse_expr("1 < x <= 3");
        match expr.kind {
            ExprKind::Compare { ops, .. } => {
                assert_eq!(ops.len(), 2);
                assert_eq!(ops[0].0, CompareOp::Lt);
                assert_eq!(ops[1].0, CompareOp::Le);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_not_in_and_is_not() {
        let expr = parse_expr("a not in b");
        assert!(matches!(&expr.kind, ExprKind::Compare { ops, .. } if ops[0].0 == CompareOp::NotIn));

        let expr = parse_expr("not x is divisibleby 3 and y");
        match expr.kind {
            ExprKind::Binary {
                op: BinaryOp::And,
                left,
                ..
            } => match left.kind {
                ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand,
                } => assert!(
                    matches!(&operand.kind, ExprKind::Test { name, args, negated: false, .. } if name == "divisibleby" && args.len() == 1)
                ),
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_ternary_without_else() {
        let expr = parse_expr("'a' if x");
        assert!(matches!(expr.kind, ExprKind::Ternary { otherwise: None, .. }));
    }

    #[test]
    fn test_parse_comprehension() {
        let expr = parse_expr("[x * y for x in xs for y in ys if x if y]");
        match expr.kind {
            ExprKind::ListComp {
                clauses,
                conditions,
                ..
            } => {
                assert_eq!(clauses.len(), 2);
                assert_eq!(conditions.len(), 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_slice() {
        let expr = parse_expr("items[1:-1:2]");
        assert!(matches!(
            expr.kind,
            ExprKind::Slice {
                start: Some(_),
                stop: Some(_),
                step: Some(_),
                ..
            }
        ));
        let expr = parse_expr("items[::-1]");
        assert!(matches!(
            expr.kind,
            ExprKind::Slice {
                start: None,
                stop: None,
                step: Some(_),
                ..
            }
        ));
    }

    #[test]
    fn test_parse_statements() {
        let ast = parse_str(
            "{% extends 'base.html' %}{% block title required %}{% for a, b in items if a recursive %}{{ loop(b) }}{% else %}none{% endfor %}{% endblock title %}",
        )
        .unwrap();
        assert!(ast.extends.is_some());
        match &ast.nodes[0] {
            Node::Block(block) => {
                assert!(block.required);
                match &block.body[0] {
                    Node::For(f) => {
                        assert_eq!(f.targets, vec!["a", "b"]);
                        assert!(f.filter.is_some());
                        assert!(f.recursive);
                        assert!(f.else_body.is_some());
                    }
                    other => panic!("unexpected {:?}", other),
                }
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_set_targets() {
        let ast = parse_str("{% set ns.total = 1 %}{% set a, b = 1, 2 %}{% set x %}hi{% endset %}").unwrap();
        assert!(matches!(&ast.nodes[0], Node::Set { target: AssignTarget::Attr { namespace, attr }, .. } if namespace == "ns" && attr == "total"));
        assert!(matches!(&ast.nodes[1], Node::Set { target: AssignTarget::Unpack(names), value, .. } if names.len() == 2 && matches!(value.kind, ExprKind::Tuple(_))));
        assert!(matches!(&ast.nodes[2], Node::SetBlock { target: AssignTarget::Name(n), .. } if n == "x"));

        assert!(parse_str("{% set a.b.c = 1 %}").is_err());
        assert!(parse_str("{% set a[0] = 1 %}").is_err());
    }

    #[test]
    fn test_parse_macro_and_call_block() {
        let ast = parse_str(
            "{% macro greet(name, greeting='Hello') %}{{ greeting }} {{ name }}{% endmacro %}{% call(x) greet('a') %}{{ x }}{% endcall %}",
        )
        .unwrap();
        match &ast.nodes[0] {
            Node::Macro(def) => {
                assert_eq!(def.params, vec!["name", "greeting"]);
                assert!(def.defaults.contains_key("greeting"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(&ast.nodes[1], Node::CallBlock { caller, .. } if caller.params == vec!["x"]));
    }

    #[test]
    fn test_parse_autoescape_annotates_outputs() {
        let ast = parse_str("{% autoescape false %}{{ a }}{% endautoescape %}{{ b }}").unwrap();
        match &ast.nodes[0] {
            Node::Autoescape { enabled, body } => {
                assert!(!enabled);
                assert!(matches!(body[0], Node::Output { autoescape: Some(false), .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(ast.nodes[1], Node::Output { autoescape: None, .. }));
    }

    #[test]
    fn test_parse_errors() {
        let cases = [
            "{% if x %}open",
            "{% if x %}{% endfor %}",
            "{% endif %}",
            "{% for x in y %}{% endif %}",
            "{% block a %}{% endblock %}{% block a %}{% endblock %}",
            "{% if x %}{% extends 'a' %}{% endif %}",
            "{% extends 'a' %}{% extends 'b' %}",
            "{{ f(a=1, 2) }}",
            "{% break %}",
            "{% frobnicate %}",
            "{{ 1 + }}",
            "{% macro m() %}{% endmacro other %}",
            "{% for i in x %}{% filter upper %}{% break %}{% endfilter %}{% endfor %}",
            "{% for i in x %}{% set s %}{% continue %}{% endset %}{% endfor %}",
        ];
        for source in cases {
            let err = parse_str(source).unwrap_err();
            assert!(matches!(err, Error::Parse { .. }), "{}: {:?}", source, err);
        }
    }

    #[test]
    fn test_parse_include_and_imports() {
        let ast = parse_str(
            "{% include ['a', 'b'] ignore missing without context %}{% import 'm' as m with context %}{% from 'm' import x as y, z %}",
        )
        .unwrap();
        assert!(matches!(
            ast.nodes[0],
            Node::Include {
                ignore_missing: true,
                with_context: false,
                ..
            }
        ));
        assert!(matches!(&ast.nodes[1], Node::Import { alias, with_context: true, .. } if alias == "m"));
        assert!(matches!(&ast.nodes[2], Node::FromImport { names, with_context: false, .. } if names.len() == 2 && names[0].1.as_deref() == Some("y")));
    }
}
