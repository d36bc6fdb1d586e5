pub mod policy;
pub mod store;

pub use policy::{OperationCategory, Policy, PolicyError};
pub use store::PolicyStore;
