//! 存储接口 Trait 定义
//!
//! 轮询子系统只通过以下窄接口访问外部持久化：
//! - PollingRepository：网关、点位、读数
//! - LeaseStore（见 `lease.rs`）：调度租约
//!
//! 设计原则：
//! - 所有接口返回 StorageError
//! - 计数器使用原子自增，不做应用内读-改-写
//! - 使用 async_trait 支持动态分发

use crate::error::StorageError;
use async_trait::async_trait;
use domain::{DataPoint, Gateway, Reading};

/// 轮询仓储接口
#[async_trait]
pub trait PollingRepository: Send + Sync {
    /// 查找指定网关（读取最新持久化状态）
    async fn get_gateway(&self, gateway_id: &str) -> Result<Option<Gateway>, StorageError>;

    /// 列出所有启用的网关
    async fn get_active_gateways(&self) -> Result<Vec<Gateway>, StorageError>;

    /// 列出所有网关
    async fn list_gateways(&self) -> Result<Vec<Gateway>, StorageError>;

    /// 列出网关下所有启用的点位，按 point_id 排序
    async fn get_enabled_data_points(
        &self,
        gateway_id: &str,
    ) -> Result<Vec<DataPoint>, StorageError>;

    /// 写入读数
    async fn insert_reading(&self, reading: &Reading) -> Result<(), StorageError>;

    /// 成功计数原子 +1
    async fn increment_gateway_success(&self, gateway_id: &str) -> Result<(), StorageError>;

    /// 失败计数原子 +1
    async fn increment_gateway_failure(&self, gateway_id: &str) -> Result<(), StorageError>;

    /// 设置启用状态，返回修改前的状态（网关不存在时为 None）
    async fn set_gateway_active(
        &self,
        gateway_id: &str,
        is_active: bool,
    ) -> Result<Option<bool>, StorageError>;

    /// 更新最近在线时间
    async fn update_gateway_last_seen(
        &self,
        gateway_id: &str,
        ts_ms: i64,
    ) -> Result<(), StorageError>;

    /// 网关下最新读数的时间戳
    async fn last_reading_at_ms(&self, gateway_id: &str) -> Result<Option<i64>, StorageError>;

    /// 删除网关（级联删除点位与读数）
    async fn delete_gateway(&self, gateway_id: &str) -> Result<bool, StorageError>;
}
