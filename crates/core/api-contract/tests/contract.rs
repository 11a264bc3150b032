use api_contract::{
    ConnectionTestDto, GatewayActionDto, HealthStatus, IntegrityIssueDto, PollingHealthDto,
    PollingStatusDto,
};
use serde_json::Value;

fn issue(kind: &str, gateway_id: &str) -> IntegrityIssueDto {
    IntegrityIssueDto {
        kind: kind.to_string(),
        gateway_id: gateway_id.to_string(),
        detail: "no lease and no recent reading".to_string(),
    }
}

#[test]
fn health_without_issues_is_healthy() {
    let health = PollingHealthDto::from_issues(Vec::new());
    assert_eq!(health.status, HealthStatus::Healthy);
    let value = serde_json::to_value(health).expect("serialize");
    assert_eq!(value["status"], "healthy");
    assert_eq!(value["issuesCount"], 0);
    assert!(value.get("issues_count").is_none());
}

#[test]
fn health_with_issues_is_warning() {
    let health = PollingHealthDto::from_issues(vec![issue("stuck", "gw-1"), issue("stalled", "gw-2")]);
    assert_eq!(health.status, HealthStatus::Warning);
    assert_eq!(health.issues_count, 2);
    let value = serde_json::to_value(&health).expect("serialize");
    assert_eq!(value["status"], "warning");
    assert_eq!(value["issues"][0]["gatewayId"], "gw-1");
    assert!(health.summary.contains('2'));
}

#[test]
fn health_error_has_no_issues() {
    let value = serde_json::to_value(PollingHealthDto::error("health check failed")).expect("serialize");
    assert_eq!(value["status"], "error");
    assert_eq!(value["issues"], Value::Array(Vec::new()));
}

#[test]
fn health_status_parses_lowercase() {
    let status: HealthStatus = serde_json::from_str("\"warning\"").expect("parse");
    assert_eq!(status, HealthStatus::Warning);
}

#[test]
fn status_wraps_scheduler_and_metrics() {
    let dto = PollingStatusDto {
        scheduler: serde_json::json!({ "totalGateways": 3 }),
        metrics: serde_json::json!({ "pollsStarted": 10 }),
    };
    let value = serde_json::to_value(dto).expect("serialize");
    assert_eq!(value["scheduler"]["totalGateways"], 3);
    assert_eq!(value["metrics"]["pollsStarted"], 10);
}

#[test]
fn action_and_connection_test_are_camel_case() {
    let action = GatewayActionDto {
        gateway_id: "gw-1".to_string(),
        action: "activate".to_string(),
        is_active: true,
        dispatched: true,
        changed: true,
    };
    let value = serde_json::to_value(action).expect("serialize");
    assert_eq!(value["gatewayId"], "gw-1");
    assert_eq!(value["isActive"], true);

    let check = ConnectionTestDto {
        gateway_id: "gw-1".to_string(),
        host: "10.0.0.5".to_string(),
        port: 502,
        unit_id: 1,
        success: false,
        latency_ms: 12,
        sample_value: None,
        error: Some("connection refused".to_string()),
    };
    let value = serde_json::to_value(check).expect("serialize");
    assert_eq!(value["unitId"], 1);
    assert_eq!(value["latencyMs"], 12);
    assert!(value["sampleValue"].is_null());
}
