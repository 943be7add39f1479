//! Template resolution engine
//!
//! The recursive tree rewriter, the intrinsic-function implementations,
//! reference resolution, condition evaluation and resource pruning.

mod context;
mod engine;
mod error;

pub use context::TemplateContext;
pub use engine::{NO_VALUE, Resolved, TemplateEngine};
pub use error::{ResolveError, ResolveResult};
