//! 调度租约（DispatchLease）
//!
//! 以网关 ID 为键的短期标记，表示“该网关已有一个排队中或执行中的轮询任务”。
//! 每个租约带一个随机 token，由对应任务携带；释放时必须 token 匹配，
//! 避免过期后被他人重新获取的租约被误删。

use crate::error::StorageError;
use async_trait::async_trait;
use std::time::Duration;

/// 调度租约记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchLease {
    pub gateway_id: String,
    pub token: String,
    pub acquired_at_ms: i64,
    pub expires_at_ms: i64,
}

impl DispatchLease {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

/// 租约存储接口
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// 原子“不存在则获取”；已有未过期租约时返回 false
    async fn try_acquire(
        &self,
        gateway_id: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, StorageError>;

    /// 仅当当前租约 token 为 `current_token` 时原子替换为 `new_token` 并重置 TTL
    async fn renew(
        &self,
        gateway_id: &str,
        current_token: &str,
        new_token: &str,
        ttl: Duration,
    ) -> Result<bool, StorageError>;

    /// 仅当 token 匹配时释放
    async fn release(&self, gateway_id: &str, token: &str) -> Result<bool, StorageError>;

    /// 无条件清除（孤儿租约清理、网关删除）
    async fn force_release(&self, gateway_id: &str) -> Result<bool, StorageError>;

    /// 当前有效租约
    async fn current(&self, gateway_id: &str) -> Result<Option<DispatchLease>, StorageError>;

    /// 所有有效租约
    async fn list(&self) -> Result<Vec<DispatchLease>, StorageError>;
}
