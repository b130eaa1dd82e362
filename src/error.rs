//! Error types for template compilation and rendering

use thiserror::Error;

/// Convenience alias used throughout the crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Template lexing, parsing and rendering errors
#[derive(Error, Debug)]
pub enum Error {
    #[error("syntax error in {template} at line {line}, column {column}: {message}")]
    Lex {
        template: String,
        line: usize,
        column: usize,
        message: String,
    },

    #[error("parse error in {template} at line {line}, column {column}: {message}")]
    Parse {
        template: String,
        line: usize,
        column: usize,
        message: String,
    },

    #[error("undefined variable: {0}")]
    UndefinedVariable(String),

    #[error("unknown filter: {0}")]
    UnknownFilter(String),

    #[error("unknown test: {0}")]
    UnknownTest(String),

    #[error("filter '{name}' failed: {message}")]
    FilterExecution { name: String, message: String },

    #[error("test '{name}' failed: {message}")]
    TestExecution { name: String, message: String },

    #[error("function '{name}' failed: {message}")]
    FunctionExecution { name: String, message: String },

    #[error("{0} is not callable")]
    NotCallable(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("template not found: {0}")]
    TemplateNotFound(String),

    #[error("template '{template}' does not export '{name}'")]
    ImportNotFound { template: String, name: String },

    #[error(transparent)]
    Macro(#[from] MacroError),

    #[error(transparent)]
    Inheritance(#[from] InheritanceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{source} (in {template}, line {line})")]
    Located {
        template: String,
        line: usize,
        source: Box<Error>,
    },
}

/// Macro registration and argument binding failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MacroError {
    #[error("macro '{macro_name}' is missing required parameter '{param}'")]
    MissingParameter { macro_name: String, param: String },

    #[error("macro '{macro_name}' has no parameter named '{param}'")]
    UnknownParameter { macro_name: String, param: String },

    #[error("macro '{macro_name}' takes {expected} positional arguments but {given} were given")]
    TooManyArguments {
        macro_name: String,
        expected: usize,
        given: usize,
    },

    #[error("macro '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("macro '{0}' is not registered")]
    NotFound(String),
}

/// Template inheritance failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InheritanceError {
    #[error("parent template '{parent}' of '{child}' not found")]
    MissingParent { child: String, parent: String },

    #[error("cyclic template inheritance: {}", .0.join(" -> "))]
    CyclicExtends(Vec<String>),

    #[error("super() in block '{0}' has no parent block")]
    NoParentBlock(String),

    #[error("super() called outside of a block")]
    SuperOutsideBlock,

    #[error("required block '{0}' was not overridden")]
    RequiredBlock(String),

    #[error("extends must be used at the top level of a template")]
    NestedExtends,
}

impl Error {
    /// Attach a render location unless an inner construct already did
    pub fn located(self, template: &str, line: usize) -> Self {
        match self {
            Error::Located { .. } | Error::Lex { .. } | Error::Parse { .. } => self,
            other => Error::Located {
                template: template.to_string(),
                line,
                source: Box::new(other),
            },
        }
    }

    /// The underlying error with any location wrappers removed
    pub fn root(&self) -> &Error {
        match self {
            Error::Located { source, .. } => source.root(),
            other => other,
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidOperation(message.into())
    }
}

/// Error returned by filter, test and function implementations.
///
/// The evaluator wraps it into [`Error::FilterExecution`],
/// [`Error::TestExecution`] or [`Error::FunctionExecution`] together with
/// the name used at the call site.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct CallError(pub String);

impl CallError {
    pub fn new(message: impl Into<String>) -> Self {
        CallError(message.into())
    }
}

impl From<Error> for CallError {
    fn from(err: Error) -> Self {
        CallError(err.to_string())
    }
}
