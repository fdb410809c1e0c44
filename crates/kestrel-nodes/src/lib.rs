pub mod builtin;
pub mod context;
pub mod contract;
pub mod loader;
pub mod node;
pub mod registry;

pub use context::RunContext;
pub use contract::{placeholders, references_profile, resolve_variables, validate};
pub use node::NodeHandler;
pub use registry::{CatalogueEntry, NodeRegistry, NodeTypeId, RegistryEntry};
