//! CloudFormation template resolver
//!
//! Evaluates a declarative template document into a fully resolved,
//! intrinsic-function-free document: constant folding over the `Fn::*`
//! expression language, condition evaluation with resource pruning, and
//! reference resolution against a caller-supplied context. No network calls
//! are made; account ids, exports and SSM values all come from the context.

pub mod engine;
pub mod evaluator;
pub mod model;
pub mod registry;

// Re-export main types
pub use engine::{ResolveOptions, ResolvedTemplate, resolve_template};
pub use evaluator::{
    NO_VALUE, Resolved, ResolveError, ResolveResult, TemplateContext, TemplateEngine,
};
pub use registry::{AttributeResolver, EchoAttributeResolver, StandardAttributeResolver};
