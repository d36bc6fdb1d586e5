//! End-to-end flow: YAML policy config, registry, interceptor, engine,
//! audit trail, anomaly report.

use async_trait::async_trait;
use capgate_engine::{
    AnomalyMonitor, AuditFilter, AuditLog, DecisionKind, PermissionEngine, Scope, Severity,
};
use capgate_policy::PolicyStore;
use capgate_tools::{Interceptor, OperationClassifier, Tool, ToolError, ToolRegistry, ToolResult};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

struct StubTool {
    name: &'static str,
}

#[async_trait]
impl Tool for StubTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "stub"
    }

    async fn execute(&self, args: serde_json::Value) -> Result<ToolResult, ToolError> {
        Ok(ToolResult::ok(json!({ "tool": self.name, "args": args })))
    }
}

const POLICIES: &str = r#"
agents:
  researcher:
    allowed_tools: [web_search, db_query]
    allowed_operations: [search, database_query]
    forbidden_operations: [delete]
    max_invocations_per_session: 10
    max_invocations_per_window: 5
    window_secs: 60
    requires_approval: [db_query]
"#;

fn setup() -> (Interceptor, Arc<AuditLog>, Arc<PolicyStore>) {
    let store = Arc::new(PolicyStore::from_yaml_str(POLICIES).unwrap());
    let audit = Arc::new(AuditLog::new());
    let engine = Arc::new(PermissionEngine::new(store.clone(), audit.clone()));

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(StubTool { name: "web_search" }));
    registry.register(Arc::new(StubTool { name: "db_query" }));
    registry.register(Arc::new(StubTool { name: "file_delete" }));

    let interceptor =
        Interceptor::new(Arc::new(registry), engine, OperationClassifier::new()).unwrap();
    (interceptor, audit, store)
}

#[tokio::test]
async fn researcher_can_search_but_not_delete() {
    let (interceptor, audit, _) = setup();
    let tools = interceptor.wrap("researcher");

    let result = tools
        .get("web_search")
        .unwrap()
        .execute(json!({"q": "permissions"}))
        .await
        .unwrap();
    assert!(result.success);

    let err = tools
        .get("file_delete")
        .unwrap()
        .execute(json!({"path": "/tmp/x"}))
        .await
        .unwrap_err();
    match err {
        ToolError::PermissionDenied { kind, reason } => {
            // Delete is forbidden outright, which outranks the missing
            // tool allow-list entry.
            assert_eq!(kind, DecisionKind::DeniedOperation);
            // Public reason stays generic; the allow list is not leaked.
            assert!(!reason.contains("web_search"));
        }
        other => panic!("expected permission denial, got {other:?}"),
    }

    let records = audit.records(&AuditFilter::new().agent("researcher"));
    assert_eq!(records.len(), 2);
}

#[tokio::test]
async fn approval_flagged_tool_is_allowed_and_marked() {
    let (interceptor, audit, _) = setup();
    let tools = interceptor.wrap("researcher");

    let result = tools
        .get("db_query")
        .unwrap()
        .execute(json!({"sql": "select 1"}))
        .await
        .unwrap();
    assert!(result.success);

    let records = audit.records(&AuditFilter::new().agent("researcher").tool("db_query"));
    assert_eq!(records.len(), 1);
    assert!(records[0].escalated);
    assert_eq!(records[0].decision, DecisionKind::Allowed);
}

#[tokio::test]
async fn parallel_wrapped_calls_respect_window_limit() {
    let (interceptor, audit, _) = setup();
    let tools = Arc::new(interceptor.wrap("researcher"));

    let mut handles = Vec::new();
    for _ in 0..20 {
        let tools = Arc::clone(&tools);
        handles.push(tokio::spawn(async move {
            tools.get("web_search").unwrap().execute(json!({})).await
        }));
    }

    let mut allowed = 0;
    let mut denied = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => allowed += 1,
            Err(ToolError::PermissionDenied {
                kind: DecisionKind::DeniedRateLimit,
                ..
            }) => denied += 1,
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!(allowed, 5);
    assert_eq!(denied, 15);
    assert_eq!(
        audit.records(&AuditFilter::new().agent("researcher")).len(),
        20
    );
}

#[tokio::test]
async fn denied_agent_activity_raises_anomaly_severity() {
    let (interceptor, audit, store) = setup();
    let tools = interceptor.wrap("intruder");

    for _ in 0..6 {
        let err = tools
            .get("file_delete")
            .unwrap()
            .execute(json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::PermissionDenied { .. }));
    }

    let monitor = AnomalyMonitor::new(audit, store);
    let report = monitor.report(Scope::Agent("intruder".into()), Duration::from_secs(3600));
    assert_eq!(report.denied_attempts, 6);
    assert!(report.severity >= Severity::High);
    assert!(!report.recommendations.is_empty());
}

#[tokio::test]
async fn session_reset_clears_rate_limits_between_scenarios() {
    let (interceptor, _, _) = setup();
    let tools = interceptor.wrap("researcher");
    let search = tools.get("web_search").unwrap();

    for _ in 0..5 {
        search.execute(json!({})).await.unwrap();
    }
    assert!(search.execute(json!({})).await.is_err());

    interceptor.engine().reset_session("researcher");
    assert!(search.execute(json!({})).await.is_ok());
}

#[tokio::test]
async fn authorize_gives_blocking_callers_the_same_gate() {
    let (interceptor, _, _) = setup();

    let decision = interceptor.authorize("researcher", "web_search").unwrap();
    assert!(decision.is_allowed());

    let denied = interceptor.authorize("researcher", "file_delete").unwrap();
    assert!(!denied.is_allowed());
}
