pub mod anomaly;
pub mod audit;
pub mod engine;
pub mod session;

pub use anomaly::{AnomalyMonitor, AnomalyReport, AnomalyThresholds, Scope, Severity};
pub use audit::{AuditError, AuditFilter, AuditLog, AuditRecord, DecisionKind};
pub use engine::{AccessDecision, EngineError, PermissionEngine};
pub use session::SessionTracker;
