use crate::audit::{AuditError, AuditLog, AuditRecord, DecisionKind};
use crate::session::SessionTracker;
use capgate_policy::{OperationCategory, Policy, PolicyStore};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum EngineError {
    /// The audit trail could not be written. The invocation must not
    /// proceed unaudited, so this is fatal to the attempt.
    #[error("Audit write failed: {0}")]
    Audit(#[from] AuditError),
}

/// Result of a permission check. Denials are expected outcomes, not
/// errors; `reason` is the concise public string, never the policy
/// detail (that stays in the audit record).
#[derive(Debug, Clone, PartialEq)]
pub enum AccessDecision {
    Allowed {
        /// True when the tool is on the policy's requires-approval list.
        escalated: bool,
    },
    Denied {
        kind: DecisionKind,
        reason: String,
    },
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allowed { .. })
    }
}

/// Mediates every tool invocation against the policy store, enforcing
/// allow lists, operation categories, and per-agent rate limits, and
/// appending one audit record per decision.
pub struct PermissionEngine {
    policies: Arc<PolicyStore>,
    audit: Arc<AuditLog>,
    sessions: SessionTracker,
}

impl PermissionEngine {
    pub fn new(policies: Arc<PolicyStore>, audit: Arc<AuditLog>) -> Self {
        Self {
            policies,
            audit,
            sessions: SessionTracker::new(),
        }
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub fn policies(&self) -> &Arc<PolicyStore> {
        &self.policies
    }

    /// Allowed invocations recorded for an agent in the current session.
    pub fn session_invocations(&self, agent_id: &str) -> usize {
        self.sessions.invocations(agent_id)
    }

    /// Clear an agent's counters so its next invocation behaves like a
    /// fresh agent's first.
    pub fn reset_session(&self, agent_id: &str) {
        self.sessions.reset(agent_id);
        debug!(agent = agent_id, "session counters reset");
    }

    /// Decide whether `agent_id` may invoke `tool_name` classified as
    /// `operation`. Checks short-circuit in order: forbidden operation,
    /// tool allow list, allowed operations, rate limits. On success the
    /// invocation timestamp and audit record are committed atomically
    /// with respect to other calls for the same agent.
    pub fn check(
        &self,
        agent_id: &str,
        tool_name: &str,
        operation: OperationCategory,
    ) -> Result<AccessDecision, EngineError> {
        let policy = self.policies.get(agent_id);

        // Forbidden wins over allowed, so it is checked first.
        if policy.forbidden_operations.contains(&operation) {
            return self.deny(
                agent_id,
                tool_name,
                operation,
                DecisionKind::DeniedOperation,
                format!("operation '{}' is forbidden by policy", operation),
            );
        }

        if !policy.allowed_tools.contains(tool_name) {
            return self.deny(
                agent_id,
                tool_name,
                operation,
                DecisionKind::DeniedTool,
                format!("tool '{}' is not on the allow list", tool_name),
            );
        }

        if !policy.allowed_operations.contains(&operation) {
            return self.deny(
                agent_id,
                tool_name,
                operation,
                DecisionKind::DeniedOperation,
                format!("operation '{}' is not on the allowed list", operation),
            );
        }

        let escalated = policy.requires_approval.contains(tool_name);

        // Rate-limit check and counter mutation form one critical
        // section per agent; the lock never covers the tool call itself.
        let session = self.sessions.session(agent_id);
        let mut state = session.lock();
        let now = Instant::now();
        let window = Duration::from_secs(policy.window_secs);

        if let Some(detail) = rate_limit_violation(policy, &state, now, window) {
            drop(state);
            return self.deny(
                agent_id,
                tool_name,
                operation,
                DecisionKind::DeniedRateLimit,
                detail,
            );
        }

        // Audit before mutating counters: a sink fault must not leave a
        // recorded invocation without a corresponding audit line.
        let record = AuditRecord::new(agent_id, tool_name, operation, DecisionKind::Allowed)
            .escalated(escalated);
        self.audit.append(record)?;
        state.record(now, window);
        drop(state);

        if escalated {
            warn!(
                agent = agent_id,
                tool = tool_name,
                "invocation allowed but flagged for approval review"
            );
        } else {
            debug!(agent = agent_id, tool = tool_name, "invocation allowed");
        }

        Ok(AccessDecision::Allowed { escalated })
    }

    fn deny(
        &self,
        agent_id: &str,
        tool_name: &str,
        operation: OperationCategory,
        kind: DecisionKind,
        detail: String,
    ) -> Result<AccessDecision, EngineError> {
        let record = AuditRecord::new(agent_id, tool_name, operation, kind).with_reason(detail.clone());
        self.audit.append(record)?;

        warn!(
            agent = agent_id,
            tool = tool_name,
            decision = %kind,
            "permission denied: {}",
            detail
        );

        Ok(AccessDecision::Denied {
            kind,
            reason: public_reason(kind).to_string(),
        })
    }
}

/// Returns the detailed denial reason when any rate limit is violated.
/// The first invocation in a session is exempt from spacing: there is
/// no prior timestamp to compare against.
fn rate_limit_violation(
    policy: &Policy,
    state: &crate::session::AgentSession,
    now: Instant,
    window: Duration,
) -> Option<String> {
    if state.total() >= policy.max_invocations_per_session {
        return Some(format!(
            "session limit of {} invocations reached",
            policy.max_invocations_per_session
        ));
    }

    if state.recent(now, window) >= policy.max_invocations_per_window {
        return Some(format!(
            "window limit of {} invocations per {}s reached",
            policy.max_invocations_per_window, policy.window_secs
        ));
    }

    if policy.min_spacing_secs > 0 {
        if let Some(last) = state.last() {
            let spacing = Duration::from_secs(policy.min_spacing_secs);
            if now.duration_since(last) < spacing {
                return Some(format!(
                    "minimum spacing of {}s between invocations not met",
                    policy.min_spacing_secs
                ));
            }
        }
    }

    None
}

fn public_reason(kind: DecisionKind) -> &'static str {
    match kind {
        DecisionKind::Allowed => "allowed",
        DecisionKind::DeniedTool => "tool not permitted",
        DecisionKind::DeniedOperation => "operation not permitted",
        DecisionKind::DeniedRateLimit => "rate limit exceeded",
    }
}
