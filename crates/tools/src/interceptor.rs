use crate::classifier::{ClassifierError, OperationClassifier};
use crate::registry::ToolRegistry;
use crate::traits::{Tool, ToolError, ToolResult};
use async_trait::async_trait;
use capgate_engine::{AccessDecision, EngineError, PermissionEngine};
use capgate_policy::OperationCategory;
use std::sync::Arc;
use tracing::info;

/// Transparent wrapper around an agent's tool set. Every call through a
/// wrapped tool is classified, checked against the permission engine,
/// and only then forwarded; a denial short-circuits before the inner
/// tool is ever invoked.
pub struct Interceptor {
    registry: Arc<ToolRegistry>,
    engine: Arc<PermissionEngine>,
    classifier: Arc<OperationClassifier>,
}

impl Interceptor {
    /// Fails fast if any registered tool cannot be classified; a gap in
    /// the rule table would otherwise deny that tool on every call.
    pub fn new(
        registry: Arc<ToolRegistry>,
        engine: Arc<PermissionEngine>,
        classifier: OperationClassifier,
    ) -> Result<Self, ClassifierError> {
        classifier.validate_registry(&registry)?;
        Ok(Self {
            registry,
            engine,
            classifier: Arc::new(classifier),
        })
    }

    pub fn engine(&self) -> &Arc<PermissionEngine> {
        &self.engine
    }

    /// Produce a same-shaped registry whose tools carry `agent_id`'s
    /// permission gate. Signatures are unchanged; callers need not know
    /// they hold guarded tools.
    pub fn wrap(&self, agent_id: &str) -> ToolRegistry {
        let mut guarded = ToolRegistry::new();
        for name in self.registry.list() {
            let Some(inner) = self.registry.get(&name) else {
                continue;
            };
            // Validated at construction, so classification cannot miss.
            let Some(operation) = self.classifier.classify(&name) else {
                continue;
            };
            guarded.register(Arc::new(GuardedTool {
                agent_id: agent_id.to_string(),
                operation,
                inner,
                engine: self.engine.clone(),
            }));
        }
        guarded
    }

    /// Synchronous pre-flight check, usable by blocking callers. The
    /// rate-limit slot is consumed on allow, exactly as a forwarded
    /// call would.
    pub fn authorize(
        &self,
        agent_id: &str,
        tool_name: &str,
    ) -> Result<AccessDecision, ToolError> {
        let operation = self
            .classifier
            .classify(tool_name)
            .ok_or_else(|| ToolError::Validation(format!("unknown tool: {}", tool_name)))?;
        check_engine(&self.engine, agent_id, tool_name, operation)
    }

    /// Direct dispatch path for orchestrators that do not hold a
    /// wrapped registry.
    pub async fn invoke(
        &self,
        agent_id: &str,
        tool_name: &str,
        args: serde_json::Value,
    ) -> Result<ToolResult, ToolError> {
        let tool = self
            .registry
            .get(tool_name)
            .ok_or_else(|| ToolError::Validation(format!("tool not found: {}", tool_name)))?;

        // The permission check completes before the tool future exists.
        match self.authorize(agent_id, tool_name)? {
            AccessDecision::Allowed { .. } => {
                info!(agent = agent_id, tool = tool_name, "forwarding invocation");
                tool.execute(args).await
            }
            AccessDecision::Denied { kind, reason } => {
                Err(ToolError::PermissionDenied { kind, reason })
            }
        }
    }
}

fn check_engine(
    engine: &PermissionEngine,
    agent_id: &str,
    tool_name: &str,
    operation: OperationCategory,
) -> Result<AccessDecision, ToolError> {
    engine
        .check(agent_id, tool_name, operation)
        .map_err(|err| match err {
            // An unaudited invocation must not proceed; surface the
            // fault as a failure, not a policy denial.
            EngineError::Audit(inner) => ToolError::AuditUnavailable(inner.to_string()),
        })
}

struct GuardedTool {
    agent_id: String,
    operation: OperationCategory,
    inner: Arc<dyn Tool>,
    engine: Arc<PermissionEngine>,
}

#[async_trait]
impl Tool for GuardedTool {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn description(&self) -> &str {
        self.inner.description()
    }

    async fn execute(&self, args: serde_json::Value) -> Result<ToolResult, ToolError> {
        let decision = check_engine(&self.engine, &self.agent_id, self.inner.name(), self.operation)?;
        match decision {
            AccessDecision::Allowed { .. } => {
                // Tool failures propagate unchanged; they are not the
                // permission layer's concern.
                self.inner.execute(args).await
            }
            AccessDecision::Denied { kind, reason } => {
                Err(ToolError::PermissionDenied { kind, reason })
            }
        }
    }
}
