use ems_storage::StorageError;
use std::time::Duration;

/// 轮询链路错误。
///
/// 点位级错误（连接、协议、解码）不会出现在这里，它们被收集进 `PollOutcome::errors`。
#[derive(Debug, thiserror::Error)]
pub enum PollingError {
    /// 网关已停用：调度链的正常终止信号，不计为失败。
    #[error("gateway {0} is inactive")]
    GatewayInactive(String),
    #[error("gateway {0} not found")]
    GatewayNotFound(String),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("queue error: {0}")]
    Queue(String),
    #[error("poll task timed out after {0:?}")]
    Timeout(Duration),
    /// 租约竞争失败；调度方吸收该信号，不入队。
    #[error("gateway {0} already has a scheduled poll task")]
    SchedulingRace(String),
}
