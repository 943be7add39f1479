// Error types for template resolution

use thiserror::Error;

/// Result type for resolution operations
pub type ResolveResult<T> = Result<T, ResolveError>;

/// Errors that can occur while resolving a template
///
/// Every variant is fatal to the current resolution run: a document with one
/// unresolved expression is not usable, so there is no partial output.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolveError {
    /// A `Ref` or bare symbol names something that is neither a pseudo
    /// parameter, a surviving resource, nor a resolved parameter
    #[error(
        "Reference '{name}' not found. A reference should be either a parameter, a pseudo parameter or the logical name of a resource"
    )]
    ReferenceNotFound {
        /// The unresolved symbol
        name: String,
    },

    /// A condition name used by `Fn::If`, a `Condition` guard or a boolean
    /// intrinsic is not defined
    #[error("Condition '{name}' not found")]
    ConditionNotFound {
        /// Condition name
        name: String,
    },

    /// `Fn::FindInMap` names a map that is not declared under `Mappings`
    #[error("Mapping '{name}' not found")]
    MappingNotFound {
        /// Map name
        name: String,
    },

    /// `Fn::FindInMap` names a key missing from a declared map
    #[error("Key '{key}' not found in mapping '{name}'")]
    MappingKeyNotFound {
        /// Map name
        name: String,
        /// Missing first- or second-level key
        key: String,
    },

    /// An `Fn::*` key outside the supported set
    #[error("Unknown intrinsic function '{name}'")]
    UnknownIntrinsic {
        /// The intrinsic key as written in the template
        name: String,
    },

    /// The resource type is known but does not expose the requested
    /// attribute, or no resolver is registered for the type at all
    #[error("Unknown attribute '{attribute}' for {resource_type} '{logical_id}'")]
    UnknownAttribute {
        /// Declared resource type
        resource_type: String,
        /// Logical id of the resource
        logical_id: String,
        /// Requested attribute name
        attribute: String,
    },

    /// A `{{resolve:...}}` string uses an unsupported provider or is
    /// malformed
    #[error("Dynamic reference error: '{reference}' (only '{{{{resolve:ssm:<name>:<version>}}}}' is supported)")]
    DynamicReference {
        /// The offending string
        reference: String,
    },

    /// An intrinsic received arguments of the wrong shape
    #[error("{function}: {message}")]
    MalformedArguments {
        /// The intrinsic (or processing stage) that rejected its input
        function: String,
        /// What was wrong with it
        message: String,
    },

    /// `Fn::ImportValue` names an export absent from the context
    #[error("Export '{name}' not found in context")]
    ExportNotFound {
        /// Export name
        name: String,
    },

    /// An SSM parameter name is absent from the context
    #[error("SSM parameter '{name}' not found in context")]
    SsmParameterNotFound {
        /// Parameter name
        name: String,
    },

    /// An SSM parameter exists but the requested version does not
    #[error("SSM parameter '{name}' has no version '{version}'")]
    SsmVersionNotFound {
        /// Parameter name
        name: String,
        /// Requested version key
        version: String,
    },

    /// `Fn::Select` index outside the sequence
    #[error("Index {index} out of bounds for sequence of length {size}")]
    IndexOutOfBounds {
        /// Requested index
        index: i64,
        /// Sequence length
        size: usize,
    },

    /// The rewriter descended deeper than the nesting limit; almost always a
    /// self-referential resource or condition cycle
    #[error("Recursion limit of {limit} exceeded while resolving; the template likely contains a reference cycle")]
    RecursionLimitExceeded {
        /// The configured depth limit
        limit: usize,
    },
}
