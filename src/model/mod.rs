//! Value model shared by the engine and the attribute resolvers

mod resource;
mod value;

pub use resource::ResourceRecord;
pub use value::{scalar_to_string, type_name};
