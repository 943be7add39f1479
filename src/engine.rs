//! High-level entry point wiring the engine to the standard registry

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use crate::evaluator::{ResolveResult, TemplateContext, TemplateEngine};
use crate::registry::StandardAttributeResolver;

/// Options for one resolution run
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveOptions {
    /// Fill parameters without a caller override from template defaults
    pub use_parameter_defaults: bool,
}

/// Outcome of a successful resolution run
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTemplate {
    /// The document with every expression folded and bookkeeping sections
    /// stripped
    pub document: Value,
    /// Resolved parameter values
    pub parameters: IndexMap<String, Value>,
    /// Resolved condition values
    pub conditions: IndexMap<String, bool>,
}

/// Resolve a template against a context using the standard attribute
/// registry
pub fn resolve_template(
    context: TemplateContext,
    template: Value,
    options: ResolveOptions,
) -> ResolveResult<ResolvedTemplate> {
    let mut engine = TemplateEngine::new(context, template, Arc::new(StandardAttributeResolver))
        .with_parameter_defaults(options.use_parameter_defaults);
    engine.resolve()?;
    let parameters = engine.parameters().clone();
    let conditions = engine.conditions().clone();
    Ok(ResolvedTemplate {
        document: engine.into_document(),
        parameters,
        conditions,
    })
}
