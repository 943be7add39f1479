// Resource records collected from the template

use serde_json::Value;

/// A resource that survived condition pruning
///
/// Holds the resource's original JSON subtree (`Properties`, `Metadata` and
/// any other keys) plus its declared type. The subtree is mutated in place as
/// nested expressions inside it are resolved, which lets memoized synthetic
/// identifiers persist across repeated attribute requests within one run.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceRecord {
    /// Declared resource type, e.g. `AWS::S3::Bucket`
    pub resource_type: String,
    /// The resource's JSON subtree
    pub json: Value,
}

impl ResourceRecord {
    /// Wrap a resource subtree together with its declared type
    pub fn new(resource_type: impl Into<String>, json: Value) -> Self {
        Self {
            resource_type: resource_type.into(),
            json,
        }
    }

    /// The `Properties` mapping, if the resource declares one
    pub fn properties(&self) -> Option<&Value> {
        self.json.get("Properties")
    }
}
