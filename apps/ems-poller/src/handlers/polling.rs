//! 轮询诊断与运维 handlers
//!
//! - GET /polling/health：调度完整性检查（200 无问题 / 207 有问题 / 500 检查失败）
//! - GET /polling/status：调度快照 + 进程指标
//! - POST /polling/audit：巡检并清理
//! - POST /polling/sweep：补调度
//! - POST /polling/gateways/{id}/activate | deactivate：运维启停
//! - POST /polling/gateways/{id}/test-connection：连接诊断

use crate::AppState;
use crate::utils::response::{internal_error, not_found_error, ok, polling_error};
use api_contract::{
    ConnectionTestDto, GatewayActionDto, IntegrityIssueDto, PollingHealthDto, PollingStatusDto,
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use ems_polling::IntegrityIssue;
use ems_protocol::GatewayEndpoint;
use ems_telemetry::metrics;
use tracing::{error, info};

#[derive(serde::Deserialize)]
pub struct GatewayPath {
    gateway_id: String,
}

/// 进程存活检查
pub async fn liveness() -> impl IntoResponse {
    Json(serde_json::json!({ "ok": true }))
}

/// 调度健康检查
pub async fn polling_health(State(state): State<AppState>) -> Response {
    match state.auditor.validate_integrity().await {
        Ok(issues) => {
            let health =
                PollingHealthDto::from_issues(issues.into_iter().map(issue_to_dto).collect());
            let status = if health.issues_count == 0 {
                StatusCode::OK
            } else {
                StatusCode::MULTI_STATUS
            };
            (status, Json(health)).into_response()
        }
        Err(err) => {
            error!(target: "ems.polling", error = %err, "polling_health_check_failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(PollingHealthDto::error("polling health check failed")),
            )
                .into_response()
        }
    }
}

/// 调度快照
pub async fn polling_status(State(state): State<AppState>) -> Response {
    match state.scheduler.status().await {
        Ok(scheduler) => ok(PollingStatusDto {
            scheduler,
            metrics: metrics().snapshot(),
        }),
        Err(err) => polling_error("status", err),
    }
}

/// 巡检并清理
pub async fn run_audit(State(state): State<AppState>) -> Response {
    match state.auditor.audit_and_cleanup().await {
        Ok(report) => ok(report),
        Err(err) => polling_error("audit", err),
    }
}

/// 补调度
pub async fn run_sweep(State(state): State<AppState>) -> Response {
    match state.auditor.run_sweep().await {
        Ok(report) => ok(report),
        Err(err) => polling_error("sweep", err),
    }
}

/// 启用网关并立即调度
pub async fn activate_gateway(
    State(state): State<AppState>,
    Path(path): Path<GatewayPath>,
) -> Response {
    match state.scheduler.activate(&path.gateway_id).await {
        Ok(activation) => {
            let dispatched = activation.is_dispatched();
            info!(gateway_id = %path.gateway_id, dispatched, changed = activation.changed, "gateway_activated");
            ok(GatewayActionDto {
                gateway_id: path.gateway_id,
                action: "activate".to_string(),
                is_active: true,
                dispatched,
                changed: activation.changed,
            })
        }
        Err(err) => polling_error("activate", err),
    }
}

/// 停用网关；进行中的轮询周期会正常结束，但不再调度下一轮
pub async fn deactivate_gateway(
    State(state): State<AppState>,
    Path(path): Path<GatewayPath>,
) -> Response {
    match state.scheduler.deactivate(&path.gateway_id).await {
        Ok(changed) => {
            info!(gateway_id = %path.gateway_id, changed, "gateway_deactivated");
            ok(GatewayActionDto {
                gateway_id: path.gateway_id,
                action: "deactivate".to_string(),
                is_active: false,
                dispatched: false,
                changed,
            })
        }
        Err(err) => polling_error("deactivate", err),
    }
}

/// 连接诊断（读取保持寄存器 0），不写读数、不改计数
pub async fn test_connection(
    State(state): State<AppState>,
    Path(path): Path<GatewayPath>,
) -> Response {
    let gateway = match state.repository.get_gateway(&path.gateway_id).await {
        Ok(Some(gateway)) => gateway,
        Ok(None) => return not_found_error(),
        Err(err) => return internal_error("test_connection", &err),
    };
    let endpoint = GatewayEndpoint::from(&gateway);
    let check = state.reader.test_connection(&endpoint).await;
    ok(ConnectionTestDto {
        gateway_id: gateway.gateway_id,
        host: endpoint.host,
        port: endpoint.port,
        unit_id: endpoint.unit_id,
        success: check.success,
        latency_ms: check.latency_ms,
        sample_value: check.sample_value,
        error: check.error,
    })
}

fn issue_to_dto(issue: IntegrityIssue) -> IntegrityIssueDto {
    IntegrityIssueDto {
        kind: issue.kind.as_str().to_string(),
        gateway_id: issue.gateway_id,
        detail: issue.detail,
    }
}

#[cfg(test)]
mod tests {
    use crate::AppState;
    use crate::middleware::request_context;
    use crate::routes::create_router;
    use async_trait::async_trait;
    use axum::{
        Router,
        body::Body,
        http::{Request, StatusCode},
    };
    use domain::Gateway;
    use ems_polling::{
        AuditorConfig, NoopNotifier, PollExecutor, PollScheduler, QueueWorker, SchedulingAuditor,
        TaskOptions, TokioTaskQueue,
    };
    use ems_protocol::{GatewayEndpoint, ProtocolError, ReadRequest, RegisterReader};
    use ems_storage::{
        DispatchLease, InMemoryLeaseStore, InMemoryPollingRepository, LeaseStore, StorageError,
    };
    use http_body_util::BodyExt;
    use serde_json::Value;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    /// 非 10.x 地址一律拒绝连接
    struct StubReader;

    #[async_trait]
    impl RegisterReader for StubReader {
        async fn read_registers(
            &self,
            endpoint: &GatewayEndpoint,
            _request: &ReadRequest,
        ) -> Result<Vec<u16>, ProtocolError> {
            if endpoint.host.starts_with("10.") {
                Ok(vec![1234])
            } else {
                Err(ProtocolError::Connection("connection refused".to_string()))
            }
        }
    }

    /// 所有操作都失败的租约存储
    struct BrokenLeaseStore;

    #[async_trait]
    impl LeaseStore for BrokenLeaseStore {
        async fn try_acquire(&self, _: &str, _: &str, _: Duration) -> Result<bool, StorageError> {
            Err(StorageError::new("redis unavailable"))
        }

        async fn renew(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: Duration,
        ) -> Result<bool, StorageError> {
            Err(StorageError::new("redis unavailable"))
        }

        async fn release(&self, _: &str, _: &str) -> Result<bool, StorageError> {
            Err(StorageError::new("redis unavailable"))
        }

        async fn force_release(&self, _: &str) -> Result<bool, StorageError> {
            Err(StorageError::new("redis unavailable"))
        }

        async fn current(&self, _: &str) -> Result<Option<DispatchLease>, StorageError> {
            Err(StorageError::new("redis unavailable"))
        }

        async fn list(&self) -> Result<Vec<DispatchLease>, StorageError> {
            Err(StorageError::new("redis unavailable"))
        }
    }

    struct TestApp {
        router: Router,
        repository: Arc<InMemoryPollingRepository>,
        _worker: QueueWorker,
    }

    fn gateway(id: &str, host: &str, is_active: bool) -> Gateway {
        Gateway {
            gateway_id: id.to_string(),
            name: format!("gateway {}", id),
            host: host.to_string(),
            port: 502,
            unit_id: 1,
            poll_interval_seconds: 30,
            is_active,
            last_seen_at_ms: None,
            success_count: 0,
            failure_count: 0,
        }
    }

    fn build_app(leases: Arc<dyn LeaseStore>) -> TestApp {
        let repository = Arc::new(InMemoryPollingRepository::new());
        let reader: Arc<dyn RegisterReader> = Arc::new(StubReader);
        // 不启动工作池：任务只入队，便于检查调度结果
        let (queue, worker) = TokioTaskQueue::new(TaskOptions::default(), 1);
        let executor = PollExecutor::new(repository.clone(), reader.clone());
        let scheduler = Arc::new(PollScheduler::new(
            repository.clone(),
            leases.clone(),
            Arc::new(queue),
            executor,
            Arc::new(NoopNotifier),
        ));
        let auditor = Arc::new(SchedulingAuditor::new(
            repository.clone(),
            leases,
            scheduler.clone(),
            AuditorConfig::default(),
        ));
        let state = AppState {
            repository: repository.clone(),
            scheduler,
            auditor,
            reader,
        };
        let router = create_router()
            .with_state(state)
            .layer(axum::middleware::from_fn(request_context));
        TestApp {
            router,
            repository,
            _worker: worker,
        }
    }

    async fn call(app: &TestApp, method: &str, uri: &str) -> (StatusCode, Value) {
        let response = app
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        let value = serde_json::from_slice(&bytes).expect("json");
        (status, value)
    }

    #[tokio::test]
    async fn health_is_ok_without_issues() {
        let app = build_app(Arc::new(InMemoryLeaseStore::new()));
        let (status, body) = call(&app, "GET", "/polling/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["issuesCount"], 0);
    }

    #[tokio::test]
    async fn health_reports_stuck_gateway_as_multi_status() {
        let app = build_app(Arc::new(InMemoryLeaseStore::new()));
        app.repository
            .insert_gateway(gateway("gw-1", "10.0.0.5", true))
            .unwrap();

        let (status, body) = call(&app, "GET", "/polling/health").await;

        assert_eq!(status, StatusCode::MULTI_STATUS);
        assert_eq!(body["status"], "warning");
        assert_eq!(body["issuesCount"], 1);
        assert_eq!(body["issues"][0]["kind"], "stuck");
        assert_eq!(body["issues"][0]["gatewayId"], "gw-1");
    }

    #[tokio::test]
    async fn health_failure_returns_generic_error() {
        let app = build_app(Arc::new(BrokenLeaseStore));
        let (status, body) = call(&app, "GET", "/polling/health").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["status"], "error");
        assert!(!body["summary"].as_str().unwrap().contains("redis"));
    }

    #[tokio::test]
    async fn sweep_then_audit_leaves_no_issues() {
        let app = build_app(Arc::new(InMemoryLeaseStore::new()));
        app.repository
            .insert_gateway(gateway("gw-1", "10.0.0.5", true))
            .unwrap();

        let (status, body) = call(&app, "POST", "/polling/sweep").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["scheduled"], 1);
        assert_eq!(body["data"]["total"], 1);

        let (status, body) = call(&app, "POST", "/polling/audit").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["issues"], Value::Array(Vec::new()));
    }

    #[tokio::test]
    async fn status_embeds_scheduler_and_metrics() {
        let app = build_app(Arc::new(InMemoryLeaseStore::new()));
        app.repository
            .insert_gateway(gateway("gw-1", "10.0.0.5", false))
            .unwrap();

        let (status, body) = call(&app, "GET", "/polling/status").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["scheduler"]["totalGateways"], 1);
        assert_eq!(body["data"]["scheduler"]["gateways"][0]["state"], "idle");
        assert!(body["data"]["metrics"]["pollsStarted"].is_u64());
    }

    #[tokio::test]
    async fn activate_and_deactivate_gateway() {
        let app = build_app(Arc::new(InMemoryLeaseStore::new()));
        app.repository
            .insert_gateway(gateway("gw-1", "10.0.0.5", false))
            .unwrap();

        let (status, body) = call(&app, "POST", "/polling/gateways/gw-1/activate").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["dispatched"], true);
        assert_eq!(body["data"]["changed"], true);

        let (_, body) = call(&app, "POST", "/polling/gateways/gw-1/activate").await;
        assert_eq!(body["data"]["dispatched"], false);
        assert_eq!(body["data"]["changed"], false);

        let (status, body) = call(&app, "POST", "/polling/gateways/gw-1/deactivate").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["isActive"], false);
        assert_eq!(body["data"]["changed"], true);
    }

    #[tokio::test]
    async fn unknown_gateway_is_not_found() {
        let app = build_app(Arc::new(InMemoryLeaseStore::new()));
        for action in ["activate", "deactivate", "test-connection"] {
            let uri = format!("/polling/gateways/missing/{action}");
            let (status, body) = call(&app, "POST", &uri).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{action}");
            assert_eq!(body["error"]["code"], "RESOURCE.NOT_FOUND");
        }
    }

    #[tokio::test]
    async fn test_connection_reports_read_result() {
        let app = build_app(Arc::new(InMemoryLeaseStore::new()));
        app.repository
            .insert_gateway(gateway("gw-up", "10.0.0.5", false))
            .unwrap();
        app.repository
            .insert_gateway(gateway("gw-down", "192.168.1.9", false))
            .unwrap();

        let (status, body) = call(&app, "POST", "/polling/gateways/gw-up/test-connection").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["success"], true);
        assert_eq!(body["data"]["sampleValue"], 1234);

        let (_, body) = call(&app, "POST", "/polling/gateways/gw-down/test-connection").await;
        assert_eq!(body["data"]["success"], false);
        assert!(body["data"]["error"].as_str().unwrap().contains("refused"));
        assert!(app.repository.readings().is_empty());
    }

    #[tokio::test]
    async fn responses_carry_request_ids() {
        let app = build_app(Arc::new(InMemoryLeaseStore::new()));
        let response = app
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header("x-request-id", "req-42")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.headers()["x-request-id"], "req-42");
        assert!(response.headers().contains_key("x-trace-id"));
    }
}
