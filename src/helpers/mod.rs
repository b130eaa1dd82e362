//! Text helpers shared by the evaluator and the filter library

mod html;
mod url;

pub use html::*;
pub use url::*;
