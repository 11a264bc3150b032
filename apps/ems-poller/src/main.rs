//! 网关轮询服务：装配存储、租约、Modbus 客户端与任务队列，
//! 启动工作池、巡检循环和诊断 HTTP。

mod handlers;
mod middleware;
mod routes;
mod runtime;
mod utils;

use axum::middleware as axum_middleware;
use ems_config::AppConfig;
use ems_polling::{PollScheduler, SchedulingAuditor};
use ems_protocol::RegisterReader;
use ems_storage::PollingRepository;
use ems_telemetry::init_tracing;
use std::sync::Arc;
use tower_http::request_id::{MakeRequestUuid, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<dyn PollingRepository>,
    pub scheduler: Arc<PollScheduler>,
    pub auditor: Arc<SchedulingAuditor>,
    pub reader: Arc<dyn RegisterReader>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在），便于直接 cargo run 启动
    dotenvy::dotenv().ok();
    // 从环境变量加载运行配置
    let config = AppConfig::from_env()?;
    // 初始化结构化日志
    init_tracing();

    let services = runtime::build(&config).await?;
    let state = services.state.clone();

    // 状态变更事件写日志
    let _status_logger = ems_polling::spawn_status_logger(services.notifier.subscribe());
    // 工作池消费轮询任务，调度器本身即任务处理器
    let _workers = services.worker.spawn(services.state.scheduler.clone());
    // 启动补调度 + 周期巡检
    let _auditor_loop = runtime::spawn_auditor_loop(
        services.state.auditor.clone(),
        std::time::Duration::from_secs(config.audit_interval_seconds),
    );

    let app = routes::create_router()
        .with_state(state)
        // 注入 request_id/trace_id
        .layer(axum_middleware::from_fn(middleware::request_context))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    let listener = tokio::net::TcpListener::bind(config.http_addr).await?;
    info!(addr = %config.http_addr, "polling_http_listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("polling_service_stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "shutdown_signal_failed");
    }
}
