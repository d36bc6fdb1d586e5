use crate::registry::ToolRegistry;
use capgate_policy::OperationCategory;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClassifierError {
    /// Registered tools the rule table cannot classify. Startup fault:
    /// an unclassifiable tool would otherwise be denied on every call.
    #[error("Unclassifiable tools: {}", .0.join(", "))]
    Unclassified(Vec<String>),
}

/// Maps tool names to operation categories via an ordered substring
/// rule table, with exact-name overrides that always win. The table is
/// configuration, not business logic: misregistered names are caught by
/// [`OperationClassifier::validate_registry`] at startup instead of
/// silently denying every call.
pub struct OperationClassifier {
    overrides: HashMap<String, OperationCategory>,
    rules: Vec<(String, OperationCategory)>,
}

impl OperationClassifier {
    pub fn new() -> Self {
        Self {
            overrides: HashMap::new(),
            rules: default_rules(),
        }
    }

    /// A classifier with no substring rules; only overrides apply.
    pub fn empty() -> Self {
        Self {
            overrides: HashMap::new(),
            rules: Vec::new(),
        }
    }

    /// Pin a tool name to a category, bypassing the substring rules.
    pub fn with_override(
        mut self,
        tool_name: impl Into<String>,
        category: OperationCategory,
    ) -> Self {
        self.overrides.insert(tool_name.into(), category);
        self
    }

    /// Append a substring rule. Rules are evaluated in order; the first
    /// match wins, so more specific patterns belong earlier.
    pub fn with_rule(mut self, pattern: impl Into<String>, category: OperationCategory) -> Self {
        self.rules.push((pattern.into().to_lowercase(), category));
        self
    }

    pub fn classify(&self, tool_name: &str) -> Option<OperationCategory> {
        if let Some(&category) = self.overrides.get(tool_name) {
            return Some(category);
        }
        let lower = tool_name.to_lowercase();
        self.rules
            .iter()
            .find(|(pattern, _)| lower.contains(pattern))
            .map(|&(_, category)| category)
    }

    /// Verify every registered tool resolves to a category. Call once
    /// at startup, before any invocation is intercepted.
    pub fn validate_registry(&self, registry: &ToolRegistry) -> Result<(), ClassifierError> {
        let mut unclassified: Vec<String> = registry
            .list()
            .into_iter()
            .filter(|name| self.classify(name).is_none())
            .collect();
        if unclassified.is_empty() {
            Ok(())
        } else {
            unclassified.sort();
            Err(ClassifierError::Unclassified(unclassified))
        }
    }
}

impl Default for OperationClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Ordered most-specific-first: database patterns before the generic
/// read/write ones they would otherwise fall into.
fn default_rules() -> Vec<(String, OperationCategory)> {
    [
        ("db_write", OperationCategory::DatabaseWrite),
        ("db_insert", OperationCategory::DatabaseWrite),
        ("db_update", OperationCategory::DatabaseWrite),
        ("db_query", OperationCategory::DatabaseQuery),
        ("sql", OperationCategory::DatabaseQuery),
        ("database", OperationCategory::DatabaseQuery),
        ("delete", OperationCategory::Delete),
        ("remove", OperationCategory::Delete),
        ("drop", OperationCategory::Delete),
        ("purge", OperationCategory::Delete),
        ("write", OperationCategory::Write),
        ("update", OperationCategory::Write),
        ("insert", OperationCategory::Write),
        ("create", OperationCategory::Write),
        ("exec", OperationCategory::Execute),
        ("shell", OperationCategory::Execute),
        ("spawn", OperationCategory::Execute),
        ("run", OperationCategory::Execute),
        ("search", OperationCategory::Search),
        ("http", OperationCategory::ExternalApi),
        ("fetch", OperationCategory::ExternalApi),
        ("download", OperationCategory::ExternalApi),
        ("api", OperationCategory::ExternalApi),
        ("query", OperationCategory::Read),
        ("read", OperationCategory::Read),
        ("list", OperationCategory::Read),
        ("get", OperationCategory::Read),
    ]
    .into_iter()
    .map(|(pattern, category)| (pattern.to_string(), category))
    .collect()
}
