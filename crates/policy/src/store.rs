use crate::policy::{Policy, PolicyError};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct PolicyFile {
    #[serde(default)]
    default: Option<Policy>,
    #[serde(default)]
    agents: HashMap<String, Policy>,
}

/// Loaded-once mapping of agent identity to [`Policy`], with a
/// restrictive fallback for unknown agents.
#[derive(Debug, Clone)]
pub struct PolicyStore {
    policies: HashMap<String, Policy>,
    default_policy: Policy,
}

impl PolicyStore {
    pub fn new() -> Self {
        Self {
            policies: HashMap::new(),
            default_policy: Policy::restrictive("default"),
        }
    }

    pub fn insert(&mut self, policy: Policy) -> Result<(), PolicyError> {
        policy.validate()?;
        self.policies.insert(policy.agent_id.clone(), policy);
        Ok(())
    }

    /// Insert without load-time validation. The engine still checks
    /// forbidden operations before allowed ones, so an overlapping
    /// policy denies at runtime; loaders should prefer [`insert`].
    ///
    /// [`insert`]: PolicyStore::insert
    pub fn insert_unchecked(&mut self, policy: Policy) {
        self.policies.insert(policy.agent_id.clone(), policy);
    }

    pub fn set_default(&mut self, policy: Policy) -> Result<(), PolicyError> {
        policy.validate()?;
        self.default_policy = policy;
        Ok(())
    }

    /// Resolve the policy for an agent. Unknown identities get the
    /// default policy, never an error.
    pub fn get(&self, agent_id: &str) -> &Policy {
        self.policies.get(agent_id).unwrap_or(&self.default_policy)
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.policies.contains_key(agent_id)
    }

    pub fn default_policy(&self) -> &Policy {
        &self.default_policy
    }

    pub fn agent_ids(&self) -> Vec<String> {
        self.policies.keys().cloned().collect()
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, PolicyError> {
        let file: PolicyFile = serde_yaml::from_str(content)?;
        let mut store = Self::new();

        if let Some(mut default) = file.default {
            if default.agent_id.is_empty() {
                default.agent_id = "default".into();
            }
            store.set_default(default)?;
        }

        for (agent_id, mut policy) in file.agents {
            policy.agent_id = agent_id;
            store.insert(policy)?;
        }

        Ok(store)
    }

    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self, PolicyError> {
        let content = tokio::fs::read_to_string(&path).await?;
        Self::from_yaml_str(&content)
    }
}

impl Default for PolicyStore {
    fn default() -> Self {
        Self::new()
    }
}
