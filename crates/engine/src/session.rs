use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Mutable per-agent counter state. Created lazily on first invocation,
/// cleared by an explicit session reset.
#[derive(Debug, Default)]
pub struct AgentSession {
    /// Lifetime allowed-invocation count for the session. Kept separate
    /// from the timestamp window so pruning never loosens the session
    /// ceiling.
    total: usize,
    /// Timestamps of allowed invocations, pruned to the policy window.
    timestamps: VecDeque<Instant>,
    /// Most recent allowed invocation, survives window pruning so
    /// spacing can exceed the window.
    last: Option<Instant>,
}

impl AgentSession {
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn last(&self) -> Option<Instant> {
        self.last
    }

    /// Count of invocations inside the sliding window ending at `now`.
    pub fn recent(&self, now: Instant, window: Duration) -> usize {
        self.timestamps
            .iter()
            .filter(|&&ts| now.duration_since(ts) < window)
            .count()
    }

    /// Record an allowed invocation and drop timestamps older than the
    /// window to bound memory.
    pub fn record(&mut self, now: Instant, window: Duration) {
        self.total += 1;
        self.last = Some(now);
        self.timestamps.push_back(now);
        while let Some(&front) = self.timestamps.front() {
            if now.duration_since(front) >= window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Keyed locks over per-agent session state. The outer lock only guards
/// map access; each agent's counters are guarded by their own mutex so
/// unrelated agents never serialize on one critical section.
pub struct SessionTracker {
    sessions: Mutex<HashMap<String, Arc<Mutex<AgentSession>>>>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Handle to one agent's session, created lazily.
    pub fn session(&self, agent_id: &str) -> Arc<Mutex<AgentSession>> {
        let mut sessions = self.sessions.lock();
        sessions
            .entry(agent_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(AgentSession::default())))
            .clone()
    }

    /// Total allowed invocations recorded for an agent, zero if the
    /// agent has no session yet.
    pub fn invocations(&self, agent_id: &str) -> usize {
        let sessions = self.sessions.lock();
        sessions
            .get(agent_id)
            .map(|s| s.lock().total())
            .unwrap_or(0)
    }

    /// Drop an agent's counters. The next invocation behaves exactly
    /// like a fresh agent's first.
    pub fn reset(&self, agent_id: &str) {
        self.sessions.lock().remove(agent_id);
    }
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new()
    }
}
