pub mod classifier;
pub mod interceptor;
pub mod registry;
pub mod traits;

pub use classifier::{ClassifierError, OperationClassifier};
pub use interceptor::Interceptor;
pub use registry::ToolRegistry;
pub use traits::{Tool, ToolError, ToolResult};
