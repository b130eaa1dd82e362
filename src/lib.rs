//! miya: a Jinja2-compatible template engine
//!
//! Templates are compiled once into an immutable AST and rendered any number
//! of times, from any number of threads, against a [`Context`] of values.
//! The [`Environment`] owns configuration, filters, tests, globals, the
//! template loader and the compiled-template cache.
//!
//! ```
//! use miya::{Context, Environment};
//!
//! let env = Environment::new();
//! env.add_template("base.html", "<h1>{% block title %}{% endblock %}</h1>");
//! env.add_template(
//!     "page.html",
//!     "{% extends 'base.html' %}{% block title %}{{ name|title }}{% endblock %}",
//! );
//!
//! let mut ctx = Context::new();
//! ctx.set("name", "hello world");
//! assert_eq!(env.render_template("page.html", &ctx).unwrap(), "<h1>Hello World</h1>");
//! ```

pub mod cache;
pub mod environment;
pub mod error;
pub mod filters;
pub mod functions;
pub mod helpers;
pub mod loader;
pub mod macros;
pub mod runtime;
pub mod syntax;
pub mod tests;

pub use cache::CacheStats;
pub use environment::{AutoEscape, Environment, EnvironmentConfig, SyntaxConfig, Template};
pub use error::{CallError, Error, InheritanceError, MacroError, Result};
pub use loader::{FileSystemLoader, FnLoader, Loader, MemoryLoader};
pub use macros::Macro;
pub use runtime::{Context, Kwargs, Value};
