//! # 网关轮询能力模块
//!
//! 周期性轮询 Modbus TCP 网关，解码寄存器值并写入读数，跟踪网关健康并自愈。
//!
//! ## 架构设计
//!
//! ```text
//! SchedulingAuditor / PollScheduler
//!       │ dispatch（租约 + 入队）
//!       ▼
//! TaskQueue ──► PollScheduler::handle ──► PollExecutor::poll_gateway
//!                      │                         │
//!                      │                         ├─► RegisterReader（网络）
//!                      │                         ├─► decode / scale（纯计算）
//!                      │                         └─► PollingRepository（读数 + 计数）
//!                      ▼
//!              GatewayHealthPolicy ──► 自动停用 + StatusNotifier
//!                      │
//!                      └─► 仍启用：延迟 poll_interval 重新调度
//! ```
//!
//! ## 失败计数规则
//!
//! - 周期内有任一点位响应（good / uncertain）：成功 +1
//! - 周期内所有点位失败：失败 +1
//! - 周期级错误（存储不可达、任务超时）交给队列重试；重试耗尽后在
//!   `on_final_failure` 中失败 +1，且只计一次
//! - 没有启用点位的网关不改变计数

mod auditor;
mod error;
mod executor;
mod health;
mod notify;
mod queue;
mod scheduler;

pub use auditor::{
    AuditorConfig, CleanupReport, IntegrityIssue, IntegrityIssueKind, SchedulingAuditor,
    SweepReport,
};
pub use error::PollingError;
pub use executor::{PointError, PointErrorKind, PollExecutor, PollOutcome};
pub use health::{DEFAULT_FAILURE_RATE_THRESHOLD, DEFAULT_MIN_ATTEMPTS, GatewayHealthPolicy};
pub use notify::{BroadcastNotifier, NoopNotifier, StatusNotifier, spawn_status_logger};
pub use queue::{
    PollTask, QueueError, QueueStatsSnapshot, QueueWorker, TaskHandler, TaskOptions, TaskQueue,
    TokioTaskQueue,
};
pub use scheduler::{
    Activation, DispatchOutcome, GatewaySchedule, GatewayScheduleState, PollScheduler,
    SchedulerStatus,
};
