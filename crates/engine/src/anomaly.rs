use crate::audit::{AuditFilter, AuditLog, AuditRecord};
use capgate_policy::PolicyStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Risk classification for an anomaly report. Ordered so the maximum
/// across fired rules can be taken directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::None => "NONE",
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        };
        write!(f, "{}", s)
    }
}

/// Report scope: one agent's timeline or the whole system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Agent(String),
    System,
}

impl Scope {
    pub fn as_str(&self) -> &str {
        match self {
            Scope::Agent(id) => id,
            Scope::System => "system",
        }
    }
}

/// Tunable detection thresholds. The defaults follow the shape the
/// rules were tuned to in practice; nothing in the monitor hard-codes
/// them.
#[derive(Debug, Clone)]
pub struct AnomalyThresholds {
    /// Denied-attempt count tiers, evaluated highest-first.
    pub denial_tiers: Vec<(usize, Severity)>,
    /// Fractions of the session ceiling that flag a runaway loop.
    pub session_fraction_tiers: Vec<(f64, Severity)>,
    /// Denial-rate tiers over total attempts.
    pub denial_rate_tiers: Vec<(f64, Severity)>,
    /// Share of attempts on one tool that flags focused targeting.
    pub targeting_share: f64,
    pub targeting_severity: Severity,
    /// Targeting is meaningless for tiny samples.
    pub targeting_min_attempts: usize,
}

impl Default for AnomalyThresholds {
    fn default() -> Self {
        Self {
            denial_tiers: vec![
                (20, Severity::Critical),
                (10, Severity::High),
                (5, Severity::Medium),
                (3, Severity::Low),
            ],
            session_fraction_tiers: vec![
                (0.95, Severity::High),
                (0.90, Severity::Medium),
                (0.80, Severity::Low),
            ],
            denial_rate_tiers: vec![
                (0.5, Severity::Critical),
                (0.3, Severity::High),
                (0.2, Severity::Medium),
            ],
            targeting_share: 0.8,
            targeting_severity: Severity::Medium,
            targeting_min_attempts: 5,
        }
    }
}

/// Derived risk summary over a slice of the audit trail.
#[derive(Debug, Clone, Serialize)]
pub struct AnomalyReport {
    /// Agent identity, or "system" for global reports.
    pub agent_id: String,
    pub generated_at: DateTime<Utc>,
    pub lookback_secs: u64,
    pub total_attempts: usize,
    pub denied_attempts: usize,
    pub denial_rate: f64,
    /// Tool name and attempt count, sorted descending by count.
    pub top_targeted_tools: Vec<(String, usize)>,
    pub severity: Severity,
    pub recommendations: Vec<String>,
}

/// Read-only consumer of the audit log. Never mutates engine state.
pub struct AnomalyMonitor {
    audit: Arc<AuditLog>,
    policies: Arc<PolicyStore>,
    thresholds: AnomalyThresholds,
}

impl AnomalyMonitor {
    pub fn new(audit: Arc<AuditLog>, policies: Arc<PolicyStore>) -> Self {
        Self {
            audit,
            policies,
            thresholds: AnomalyThresholds::default(),
        }
    }

    pub fn with_thresholds(mut self, thresholds: AnomalyThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Build a risk report from audit records within `lookback` of now.
    /// Severity is the maximum across fired rules, never a sum, so
    /// several weak signals do not escalate on their own.
    pub fn report(&self, scope: Scope, lookback: Duration) -> AnomalyReport {
        let now = Utc::now();
        // Out-of-range lookbacks clamp to a window larger than any
        // process lifetime rather than erroring.
        let since = now
            - chrono::Duration::from_std(lookback)
                .unwrap_or_else(|_| chrono::Duration::days(36500));

        let mut filter = AuditFilter::new().since(since);
        if let Scope::Agent(agent_id) = &scope {
            filter = filter.agent(agent_id.clone());
        }
        let records = self.audit.records(&filter);

        let total_attempts = records.len();
        let denied_attempts = records.iter().filter(|r| r.decision.is_denial()).count();
        let denial_rate = if total_attempts == 0 {
            0.0
        } else {
            denied_attempts as f64 / total_attempts as f64
        };
        let top_targeted_tools = tool_attempt_counts(&records);

        let mut severity = Severity::None;
        let mut recommendations = Vec::new();

        if let Some(tier) = self.repeated_violation_tier(denied_attempts) {
            severity = severity.max(tier);
            recommendations.push(format!(
                "investigate agent '{}' for repeated policy violations ({} denials in window)",
                scope.as_str(),
                denied_attempts
            ));
        }

        if let Scope::Agent(agent_id) = &scope {
            if let Some(tier) = self.session_proximity_tier(agent_id, total_attempts) {
                severity = severity.max(tier);
                recommendations.push(format!(
                    "agent '{}' is approaching its session invocation ceiling; check for a runaway loop",
                    agent_id
                ));
            }
        }

        if let Some(tier) = self.denial_rate_tier(total_attempts, denial_rate) {
            severity = severity.max(tier);
            recommendations.push(format!(
                "denial rate of {:.0}% is elevated; review policy configuration or probe activity",
                denial_rate * 100.0
            ));
        }

        if let Some((tool, share)) = self.targeting(&top_targeted_tools, total_attempts) {
            severity = severity.max(self.thresholds.targeting_severity);
            recommendations.push(format!(
                "tool '{}' accounts for {:.0}% of attempts; review policy for that tool",
                tool,
                share * 100.0
            ));
        }

        AnomalyReport {
            agent_id: scope.as_str().to_string(),
            generated_at: now,
            lookback_secs: lookback.as_secs(),
            total_attempts,
            denied_attempts,
            denial_rate,
            top_targeted_tools,
            severity,
            recommendations,
        }
    }

    fn repeated_violation_tier(&self, denied: usize) -> Option<Severity> {
        self.thresholds
            .denial_tiers
            .iter()
            .find(|(count, _)| denied >= *count)
            .map(|(_, sev)| *sev)
    }

    fn session_proximity_tier(&self, agent_id: &str, attempts: usize) -> Option<Severity> {
        let ceiling = self.policies.get(agent_id).max_invocations_per_session;
        if ceiling == 0 {
            return None;
        }
        let fraction = attempts as f64 / ceiling as f64;
        self.thresholds
            .session_fraction_tiers
            .iter()
            .find(|(frac, _)| fraction >= *frac)
            .map(|(_, sev)| *sev)
    }

    fn denial_rate_tier(&self, attempts: usize, rate: f64) -> Option<Severity> {
        if attempts == 0 {
            return None;
        }
        self.thresholds
            .denial_rate_tiers
            .iter()
            .find(|(threshold, _)| rate > *threshold)
            .map(|(_, sev)| *sev)
    }

    fn targeting(
        &self,
        tool_counts: &[(String, usize)],
        total_attempts: usize,
    ) -> Option<(String, f64)> {
        if total_attempts < self.thresholds.targeting_min_attempts {
            return None;
        }
        let (tool, count) = tool_counts.first()?;
        let share = *count as f64 / total_attempts as f64;
        if share > self.thresholds.targeting_share {
            Some((tool.clone(), share))
        } else {
            None
        }
    }
}

fn tool_attempt_counts(records: &[AuditRecord]) -> Vec<(String, usize)> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for record in records {
        *counts.entry(record.tool_name.as_str()).or_insert(0) += 1;
    }
    let mut sorted: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(tool, count)| (tool.to_string(), count))
        .collect();
    // Descending by count, name as a deterministic tiebreaker.
    sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    sorted
}
