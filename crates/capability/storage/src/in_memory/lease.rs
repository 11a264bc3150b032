//! 调度租约内存实现
//!
//! 过期租约在读取时惰性清除，获取操作在同一把写锁内完成“检查 + 写入”。

use crate::error::StorageError;
use crate::lease::{DispatchLease, LeaseStore};
use domain::now_epoch_ms;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

pub struct InMemoryLeaseStore {
    leases: RwLock<HashMap<String, DispatchLease>>,
}

impl InMemoryLeaseStore {
    pub fn new() -> Self {
        Self {
            leases: RwLock::new(HashMap::new()),
        }
    }

    /// 直接写入租约（用于构造孤儿租约等测试场景）
    pub fn insert(&self, lease: DispatchLease) -> Result<(), StorageError> {
        let mut leases = self
            .leases
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        leases.insert(lease.gateway_id.clone(), lease);
        Ok(())
    }
}

impl Default for InMemoryLeaseStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl LeaseStore for InMemoryLeaseStore {
    async fn try_acquire(
        &self,
        gateway_id: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, StorageError> {
        let now_ms = now_epoch_ms();
        let mut leases = self
            .leases
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        if let Some(existing) = leases.get(gateway_id) {
            if !existing.is_expired(now_ms) {
                return Ok(false);
            }
        }
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        leases.insert(
            gateway_id.to_string(),
            DispatchLease {
                gateway_id: gateway_id.to_string(),
                token: token.to_string(),
                acquired_at_ms: now_ms,
                expires_at_ms: now_ms.saturating_add(ttl_ms),
            },
        );
        Ok(true)
    }

    async fn renew(
        &self,
        gateway_id: &str,
        current_token: &str,
        new_token: &str,
        ttl: Duration,
    ) -> Result<bool, StorageError> {
        let now_ms = now_epoch_ms();
        let mut leases = self
            .leases
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let Some(existing) = leases.get_mut(gateway_id) else {
            return Ok(false);
        };
        if existing.token != current_token || existing.is_expired(now_ms) {
            return Ok(false);
        }
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        existing.token = new_token.to_string();
        existing.acquired_at_ms = now_ms;
        existing.expires_at_ms = now_ms.saturating_add(ttl_ms);
        Ok(true)
    }

    async fn release(&self, gateway_id: &str, token: &str) -> Result<bool, StorageError> {
        let mut leases = self
            .leases
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        match leases.get(gateway_id) {
            Some(existing) if existing.token == token => {
                leases.remove(gateway_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn force_release(&self, gateway_id: &str) -> Result<bool, StorageError> {
        let mut leases = self
            .leases
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(leases.remove(gateway_id).is_some())
    }

    async fn current(&self, gateway_id: &str) -> Result<Option<DispatchLease>, StorageError> {
        let now_ms = now_epoch_ms();
        let leases = self
            .leases
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(leases
            .get(gateway_id)
            .filter(|lease| !lease.is_expired(now_ms))
            .cloned())
    }

    async fn list(&self) -> Result<Vec<DispatchLease>, StorageError> {
        let now_ms = now_epoch_ms();
        let mut leases = self
            .leases
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        leases.retain(|_, lease| !lease.is_expired(now_ms));
        let mut items: Vec<DispatchLease> = leases.values().cloned().collect();
        items.sort_by(|a, b| a.gateway_id.cmp(&b.gateway_id));
        Ok(items)
    }
}
