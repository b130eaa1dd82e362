//! Abstract syntax tree shared by the parser and the evaluator

use std::sync::Arc;

use indexmap::IndexMap;

pub use super::lexer::{Span, TextToken, Trim};

/// A parsed template
#[derive(Debug, Clone)]
pub struct TemplateAst {
    pub name: String,
    pub nodes: Vec<Node>,
    /// Parent template expression from `{% extends %}`
    pub extends: Option<Expr>,
}

// ============================================================================
// Statements
// ============================================================================

#[derive(Debug, Clone)]
pub enum Node {
    Text(TextToken),
    Output {
        expr: Expr,
        /// Override from an enclosing `{% autoescape %}` block
        autoescape: Option<bool>,
    },
    If {
        branches: Vec<(Expr, Vec<Node>)>,
        else_body: Option<Vec<Node>>,
    },
    For(Arc<ForLoop>),
    Block(Arc<Block>),
    Include {
        names: Expr,
        ignore_missing: bool,
        with_context: bool,
        span: Span,
    },
    Import {
        template: Expr,
        alias: String,
        with_context: bool,
        span: Span,
    },
    FromImport {
        template: Expr,
        /// `(exported name, local alias)`
        names: Vec<(String, Option<String>)>,
        with_context: bool,
        span: Span,
    },
    Macro(Arc<MacroDef>),
    CallBlock {
        call: Expr,
        caller: Arc<MacroDef>,
    },
    Set {
        target: AssignTarget,
        value: Expr,
        span: Span,
    },
    SetBlock {
        target: AssignTarget,
        filters: Vec<FilterCall>,
        body: Vec<Node>,
        autoescape: Option<bool>,
        span: Span,
    },
    With {
        bindings: Vec<(String, Expr)>,
        body: Vec<Node>,
    },
    FilterBlock {
        filters: Vec<FilterCall>,
        body: Vec<Node>,
        autoescape: Option<bool>,
        span: Span,
    },
    Do(Expr),
    Autoescape {
        enabled: bool,
        body: Vec<Node>,
    },
    Raw(String),
    Comment(String),
    Break(Span),
    Continue(Span),
}

impl Node {
    /// Line used when reporting render errors for this node
    pub fn line(&self) -> Option<usize> {
        match self {
            Node::Output { expr, .. } | Node::Do(expr) => Some(expr.span.line),
            Node::If { branches, .. } => branches.first().map(|(c, _)| c.span.line),
            Node::For(f) => Some(f.span.line),
            Node::Block(b) => Some(b.span.line),
            Node::Macro(m) => Some(m.span.line),
            Node::CallBlock { call, .. } => Some(call.span.line),
            Node::Include { span, .. }
            | Node::Import { span, .. }
            | Node::FromImport { span, .. }
            | Node::Set { span, .. }
            | Node::SetBlock { span, .. }
            | Node::FilterBlock { span, .. }
            | Node::Break(span)
            | Node::Continue(span) => Some(span.line),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ForLoop {
    pub targets: Vec<String>,
    pub iter: Expr,
    pub filter: Option<Expr>,
    pub body: Vec<Node>,
    pub else_body: Option<Vec<Node>>,
    pub recursive: bool,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct Block {
    pub name: String,
    pub body: Vec<Node>,
    pub required: bool,
    pub span: Span,
}

/// A macro definition (also used for the anonymous body of a call block)
#[derive(Debug, Clone)]
pub struct MacroDef {
    pub name: String,
    pub params: Vec<String>,
    pub defaults: IndexMap<String, Expr>,
    pub body: Vec<Node>,
    pub span: Span,
}

/// Left-hand side of `{% set %}`
#[derive(Debug, Clone, PartialEq)]
pub enum AssignTarget {
    /// `set x = ...`
    Name(String),
    /// `set ns.attr = ...`, only valid on namespace objects
    Attr { namespace: String, attr: String },
    /// `set a, b = ...`
    Unpack(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct FilterCall {
    pub name: String,
    pub args: CallArgs,
    pub span: Span,
}

// ============================================================================
// Expressions
// ============================================================================

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Expr { kind, span }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Pos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    Concat,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

/// Positional and keyword arguments of a call, filter or test
#[derive(Debug, Clone, Default)]
pub struct CallArgs {
    pub positional: Vec<Expr>,
    pub keyword: Vec<(String, Expr)>,
}

/// One `for targets in iter` clause of a comprehension
#[derive(Debug, Clone)]
pub struct CompFor {
    pub targets: Vec<String>,
    pub iter: Expr,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Literal(Literal),
    Var(String),
    GetAttr {
        value: Box<Expr>,
        attr: String,
    },
    GetItem {
        value: Box<Expr>,
        index: Box<Expr>,
    },
    Slice {
        value: Box<Expr>,
        start: Option<Box<Expr>>,
        stop: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Chained comparison: `a < b <= c`
    Compare {
        left: Box<Expr>,
        ops: Vec<(CompareOp, Expr)>,
    },
    Ternary {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Option<Box<Expr>>,
    },
    Filter {
        value: Box<Expr>,
        name: String,
        args: CallArgs,
    },
    Test {
        value: Box<Expr>,
        name: String,
        args: Vec<Expr>,
        negated: bool,
    },
    Call {
        callee: Box<Expr>,
        args: CallArgs,
    },
    Super,
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    ListComp {
        element: Box<Expr>,
        clauses: Vec<CompFor>,
        conditions: Vec<Expr>,
    },
    DictComp {
        key: Box<Expr>,
        value: Box<Expr>,
        clauses: Vec<CompFor>,
        conditions: Vec<Expr>,
    },
}
