use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid policy for '{agent}': {reason}")]
    Invalid { agent: String, reason: String },
}

/// Coarse classification of what a tool does, used for policy matching
/// independent of the tool's specific name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationCategory {
    Read,
    Write,
    Delete,
    Execute,
    DatabaseQuery,
    DatabaseWrite,
    Search,
    ExternalApi,
}

impl std::fmt::Display for OperationCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OperationCategory::Read => "read",
            OperationCategory::Write => "write",
            OperationCategory::Delete => "delete",
            OperationCategory::Execute => "execute",
            OperationCategory::DatabaseQuery => "database_query",
            OperationCategory::DatabaseWrite => "database_write",
            OperationCategory::Search => "search",
            OperationCategory::ExternalApi => "external_api",
        };
        write!(f, "{}", s)
    }
}

/// Permissions and limits for one agent identity. Immutable once loaded
/// into a [`crate::PolicyStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub allowed_tools: HashSet<String>,
    #[serde(default)]
    pub allowed_operations: HashSet<OperationCategory>,
    #[serde(default)]
    pub forbidden_operations: HashSet<OperationCategory>,
    #[serde(default = "default_session_limit")]
    pub max_invocations_per_session: usize,
    #[serde(default = "default_window_limit")]
    pub max_invocations_per_window: usize,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Minimum seconds between two consecutive invocations. Zero disables
    /// spacing enforcement. Never applies to an agent's first invocation.
    #[serde(default)]
    pub min_spacing_secs: u64,
    /// Tools that are allowed but logged at elevated severity.
    #[serde(default)]
    pub requires_approval: HashSet<String>,
}

fn default_session_limit() -> usize {
    100
}

fn default_window_limit() -> usize {
    20
}

fn default_window_secs() -> u64 {
    60
}

impl Policy {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            allowed_tools: HashSet::new(),
            allowed_operations: HashSet::new(),
            forbidden_operations: HashSet::new(),
            max_invocations_per_session: default_session_limit(),
            max_invocations_per_window: default_window_limit(),
            window_secs: default_window_secs(),
            min_spacing_secs: 0,
            requires_approval: HashSet::new(),
        }
    }

    /// A policy that permits nothing. Applied to unknown agents.
    pub fn restrictive(agent_id: impl Into<String>) -> Self {
        Self {
            max_invocations_per_session: 0,
            max_invocations_per_window: 0,
            ..Self::new(agent_id)
        }
    }

    pub fn allow_tool(mut self, tool: impl Into<String>) -> Self {
        self.allowed_tools.insert(tool.into());
        self
    }

    pub fn allow_operation(mut self, op: OperationCategory) -> Self {
        self.allowed_operations.insert(op);
        self
    }

    pub fn forbid_operation(mut self, op: OperationCategory) -> Self {
        self.forbidden_operations.insert(op);
        self
    }

    pub fn session_limit(mut self, max: usize) -> Self {
        self.max_invocations_per_session = max;
        self
    }

    pub fn window_limit(mut self, max: usize, window_secs: u64) -> Self {
        self.max_invocations_per_window = max;
        self.window_secs = window_secs;
        self
    }

    pub fn min_spacing(mut self, secs: u64) -> Self {
        self.min_spacing_secs = secs;
        self
    }

    pub fn require_approval(mut self, tool: impl Into<String>) -> Self {
        self.requires_approval.insert(tool.into());
        self
    }

    /// Load-time validation. Overlapping allowed/forbidden sets and
    /// degenerate windows are configuration faults, not runtime denials.
    pub fn validate(&self) -> Result<(), PolicyError> {
        let overlap: Vec<String> = self
            .allowed_operations
            .intersection(&self.forbidden_operations)
            .map(|op| op.to_string())
            .collect();
        if !overlap.is_empty() {
            return Err(PolicyError::Invalid {
                agent: self.agent_id.clone(),
                reason: format!(
                    "operations both allowed and forbidden: {}",
                    overlap.join(", ")
                ),
            });
        }

        if self.window_secs == 0 && self.max_invocations_per_window > 0 {
            return Err(PolicyError::Invalid {
                agent: self.agent_id.clone(),
                reason: "window_secs must be nonzero when a window limit is set".into(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_chain() {
        let policy = Policy::new("researcher")
            .allow_tool("search")
            .allow_operation(OperationCategory::Search)
            .forbid_operation(OperationCategory::Delete)
            .session_limit(50)
            .window_limit(10, 60)
            .min_spacing(1)
            .require_approval("db_write");

        assert_eq!(policy.agent_id, "researcher");
        assert!(policy.allowed_tools.contains("search"));
        assert!(policy.forbidden_operations.contains(&OperationCategory::Delete));
        assert_eq!(policy.max_invocations_per_session, 50);
        assert_eq!(policy.max_invocations_per_window, 10);
        assert!(policy.requires_approval.contains("db_write"));
    }

    #[test]
    fn test_restrictive_permits_nothing() {
        let policy = Policy::restrictive("ghost_agent");
        assert!(policy.allowed_tools.is_empty());
        assert!(policy.allowed_operations.is_empty());
        assert_eq!(policy.max_invocations_per_session, 0);
    }

    #[test]
    fn test_validate_rejects_overlap() {
        let policy = Policy::new("a")
            .allow_operation(OperationCategory::Delete)
            .forbid_operation(OperationCategory::Delete);

        assert!(matches!(policy.validate(), Err(PolicyError::Invalid { .. })));
    }

    #[test]
    fn test_validate_rejects_zero_width_window() {
        let mut policy = Policy::new("a").allow_tool("search");
        policy.window_secs = 0;
        policy.max_invocations_per_window = 5;

        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_disjoint_sets() {
        let policy = Policy::new("a")
            .allow_operation(OperationCategory::Read)
            .forbid_operation(OperationCategory::Delete);

        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_operation_category_serde_snake_case() {
        let json = serde_json::to_string(&OperationCategory::DatabaseQuery).unwrap();
        assert_eq!(json, "\"database_query\"");

        let op: OperationCategory = serde_json::from_str("\"external_api\"").unwrap();
        assert_eq!(op, OperationCategory::ExternalApi);
    }
}
