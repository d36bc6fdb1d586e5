use capgate_policy::OperationCategory;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Outcome of one permission decision as recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionKind {
    Allowed,
    DeniedTool,
    DeniedOperation,
    DeniedRateLimit,
}

impl DecisionKind {
    pub fn is_denial(&self) -> bool {
        !matches!(self, DecisionKind::Allowed)
    }
}

impl std::fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DecisionKind::Allowed => "ALLOWED",
            DecisionKind::DeniedTool => "DENIED_TOOL",
            DecisionKind::DeniedOperation => "DENIED_OPERATION",
            DecisionKind::DeniedRateLimit => "DENIED_RATE_LIMIT",
        };
        write!(f, "{}", s)
    }
}

/// One append-only entry per invocation attempt, allowed or denied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub agent_id: String,
    pub tool_name: String,
    pub operation: OperationCategory,
    pub decision: DecisionKind,
    /// Detailed reason, retained here only; callers see a generic one.
    pub reason: Option<String>,
    /// Allowed but flagged for human review by the agent's policy.
    #[serde(default)]
    pub escalated: bool,
}

impl AuditRecord {
    pub fn new(
        agent_id: impl Into<String>,
        tool_name: impl Into<String>,
        operation: OperationCategory,
        decision: DecisionKind,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            agent_id: agent_id.into(),
            tool_name: tool_name.into(),
            operation,
            decision,
            reason: None,
            escalated: false,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn escalated(mut self, escalated: bool) -> Self {
        self.escalated = escalated;
        self
    }
}

/// Filter for audit queries. Empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub agent_id: Option<String>,
    pub tool_name: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl AuditFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn tool(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }

    pub fn since(mut self, ts: DateTime<Utc>) -> Self {
        self.since = Some(ts);
        self
    }

    pub fn until(mut self, ts: DateTime<Utc>) -> Self {
        self.until = Some(ts);
        self
    }

    fn matches(&self, record: &AuditRecord) -> bool {
        if let Some(agent) = &self.agent_id {
            if &record.agent_id != agent {
                return false;
            }
        }
        if let Some(tool) = &self.tool_name {
            if &record.tool_name != tool {
                return false;
            }
        }
        if let Some(since) = self.since {
            if record.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if record.timestamp > until {
                return false;
            }
        }
        true
    }
}

const DEFAULT_CAPACITY: usize = 10_000;

/// Bounded in-memory audit trail with an optional JSONL file sink.
/// Oldest entries are evicted once capacity is reached; the file sink,
/// when configured, keeps the full history.
pub struct AuditLog {
    records: RwLock<VecDeque<AuditRecord>>,
    capacity: usize,
    sink: Option<Mutex<File>>,
    #[allow(dead_code)]
    sink_path: Option<PathBuf>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: RwLock::new(VecDeque::new()),
            capacity,
            sink: None,
            sink_path: None,
        }
    }

    /// Attach an append-only JSONL sink. Each record becomes one line.
    pub fn with_sink<P: AsRef<Path>>(mut self, path: P) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        self.sink = Some(Mutex::new(file));
        self.sink_path = Some(path);
        Ok(self)
    }

    /// Append one record. The sink write happens first so a sink fault
    /// never leaves a record visible in memory without a persisted line.
    pub fn append(&self, record: AuditRecord) -> Result<(), AuditError> {
        if let Some(sink) = &self.sink {
            let json = serde_json::to_string(&record)?;
            let mut file = sink.lock();
            writeln!(file, "{}", json)?;
            file.sync_all()?;
        }

        let mut records = self.records.write();
        if records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
        Ok(())
    }

    pub fn records(&self, filter: &AuditFilter) -> Vec<AuditRecord> {
        self.records
            .read()
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn clear(&self) {
        self.records.write().clear();
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}
