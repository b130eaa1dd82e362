//! Template syntax: lexer, parser and AST

pub mod ast;
pub mod lexer;
pub mod parser;

pub use ast::TemplateAst;
pub use lexer::{Span, Token, TokenKind};
pub use parser::parse;
