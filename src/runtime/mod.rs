//! Render-time machinery: values, scopes, helper objects and the evaluator

mod context;
mod evaluator;
mod state;
mod value;

pub use context::Context;
pub use evaluator::Evaluator;
pub use state::{Cycler, Joiner, LoopState, Namespace};
pub use value::{slice_indices, Callable, FunctionFn, Kwargs, Value};
pub(crate) use value::{check_repeat, MAX_REPEAT_LEN};
