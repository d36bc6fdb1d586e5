use async_trait::async_trait;
use capgate_engine::DecisionKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Execution error: {0}")]
    Execution(String),
    /// The permission engine denied the invocation. Carries the public
    /// reason only, never the policy detail.
    #[error("Permission denied ({kind}): {reason}")]
    PermissionDenied { kind: DecisionKind, reason: String },
    /// The audit trail could not be written; the invocation was not
    /// executed.
    #[error("Audit unavailable: {0}")]
    AuditUnavailable(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: serde_json::Value,
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(output: serde_json::Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
        }
    }
}

/// A named, callable capability an agent may invoke. Implementations
/// are opaque to the permission layer; only the name is policy-visible.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;

    async fn execute(&self, args: serde_json::Value) -> Result<ToolResult, ToolError>;
}
