//! 路由定义
//!
//! - 诊断：GET /polling/health, GET /polling/status
//! - 巡检：POST /polling/audit, POST /polling/sweep
//! - 运维：POST /polling/gateways/{id}/activate | deactivate | test-connection

use super::AppState;
use super::handlers::*;
use axum::{
    Router,
    routing::{get, post},
};

/// 创建诊断与运维路由
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(liveness))
        .route("/polling/health", get(polling_health))
        .route("/polling/status", get(polling_status))
        .route("/polling/audit", post(run_audit))
        .route("/polling/sweep", post(run_sweep))
        .route(
            "/polling/gateways/:gateway_id/activate",
            post(activate_gateway),
        )
        .route(
            "/polling/gateways/:gateway_id/deactivate",
            post(deactivate_gateway),
        )
        .route(
            "/polling/gateways/:gateway_id/test-connection",
            post(test_connection),
        )
}
