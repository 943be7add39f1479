//! Attribute resolution: the seam, ARN policy and the per-type registry

pub mod arn;
pub mod attribute;
pub mod types;

pub use arn::ArnTemplate;
pub use attribute::{AttributeResolver, EchoAttributeResolver, declared_value, identifier};
pub use types::StandardAttributeResolver;
