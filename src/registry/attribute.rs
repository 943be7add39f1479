// Attribute resolution seam between the engine and per-type policy

use serde_json::Value;

use crate::evaluator::{ResolveError, ResolveResult, TemplateEngine};
use crate::model::scalar_to_string;

/// Namespace for identifiers memoized into a resource's metadata
const MEMO_PREFIX: &str = "aws:resolver:";

/// Supplies resource attribute values (`Ref`, `Arn`, type-specific names)
///
/// Injected into the engine at construction. Implementations receive the
/// live engine so they can resolve nested expressions inside the referenced
/// resource's own properties and read pseudo references.
pub trait AttributeResolver: Send + Sync {
    /// Resolve one attribute of one resource
    fn resolve_attribute(
        &self,
        logical_id: &str,
        attribute: &str,
        engine: &mut TemplateEngine,
    ) -> ResolveResult<Value>;
}

/// Test double that echoes `<!--logicalId.attribute-->` for every surviving
/// resource, without any resource-type awareness
pub struct EchoAttributeResolver;

impl AttributeResolver for EchoAttributeResolver {
    fn resolve_attribute(
        &self,
        logical_id: &str,
        attribute: &str,
        engine: &mut TemplateEngine,
    ) -> ResolveResult<Value> {
        if engine.has_resource(logical_id) {
            Ok(Value::String(format!("<!--{logical_id}.{attribute}-->")))
        } else {
            Err(ResolveError::ReferenceNotFound {
                name: logical_id.to_string(),
            })
        }
    }
}

/// A resource property value, resolved in place; no synthesis
///
/// Returns `None` when the property is not declared (or resolved away).
pub fn declared_value(
    engine: &mut TemplateEngine,
    logical_id: &str,
    property: &str,
) -> ResolveResult<Option<Value>> {
    engine.resource_property(logical_id, property)
}

/// A resource's identifying property, synthesizing a placeholder when unset
///
/// The declared property wins. Otherwise the lower-cased `seed` becomes the
/// identifier and is memoized into the resource's metadata under a
/// resolver-namespaced key, so every later lookup of the same property sees
/// the identical value. This mimics a provisioning system assigning a stable
/// physical identifier to a resource that does not pin one explicitly.
pub fn identifier(
    engine: &mut TemplateEngine,
    logical_id: &str,
    property: &str,
    seed: &str,
) -> ResolveResult<Value> {
    if let Some(value) = engine.resource_property(logical_id, property)? {
        if !value.is_null() {
            return Ok(value);
        }
    }
    let memo_key = format!("{MEMO_PREFIX}{property}");
    if let Some(memoized) = engine.resource_metadata(logical_id, &memo_key) {
        return Ok(memoized);
    }
    let synthesized = Value::String(seed.to_lowercase());
    engine.set_resource_metadata(logical_id, &memo_key, synthesized.clone());
    Ok(synthesized)
}

/// Like [`identifier`], but coerced to a string for ARN assembly
pub fn identifier_string(
    engine: &mut TemplateEngine,
    logical_id: &str,
    property: &str,
    seed: &str,
) -> ResolveResult<String> {
    let value = identifier(engine, logical_id, property, seed)?;
    scalar_to_string(&value).ok_or_else(|| ResolveError::MalformedArguments {
        function: "Fn::GetAtt".to_string(),
        message: format!("property '{property}' of '{logical_id}' is not a scalar"),
    })
}
