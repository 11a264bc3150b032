//! 轮询仓储内存实现
//!
//! 网关、点位使用 BTreeMap 保存（遍历顺序稳定），读数按写入顺序追加。

use crate::error::StorageError;
use crate::traits::PollingRepository;
use domain::{DataPoint, Gateway, Reading};
use std::collections::BTreeMap;
use std::sync::RwLock;

/// 轮询仓储内存存储
///
/// 使用 RwLock + BTreeMap 提供线程安全的内存存储。
pub struct InMemoryPollingRepository {
    gateways: RwLock<BTreeMap<String, Gateway>>,
    points: RwLock<BTreeMap<String, DataPoint>>,
    readings: RwLock<Vec<Reading>>,
}

impl InMemoryPollingRepository {
    pub fn new() -> Self {
        Self {
            gateways: RwLock::new(BTreeMap::new()),
            points: RwLock::new(BTreeMap::new()),
            readings: RwLock::new(Vec::new()),
        }
    }

    /// 写入或覆盖网关
    pub fn insert_gateway(&self, gateway: Gateway) -> Result<(), StorageError> {
        let mut gateways = self
            .gateways
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        gateways.insert(gateway.gateway_id.clone(), gateway);
        Ok(())
    }

    /// 写入或覆盖点位（写入前校验寄存器范围与数据类型）
    pub fn insert_data_point(&self, point: DataPoint) -> Result<(), StorageError> {
        point.validate()?;
        let gateways = self
            .gateways
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        if !gateways.contains_key(&point.gateway_id) {
            return Err(StorageError::new(format!(
                "gateway {} not found",
                point.gateway_id
            )));
        }
        drop(gateways);
        let mut points = self
            .points
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        points.insert(point.point_id.clone(), point);
        Ok(())
    }

    /// 修改轮询间隔，返回网关是否存在
    pub fn set_poll_interval(
        &self,
        gateway_id: &str,
        poll_interval_seconds: u32,
    ) -> Result<bool, StorageError> {
        let mut gateways = self
            .gateways
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let Some(gateway) = gateways.get_mut(gateway_id) else {
            return Ok(false);
        };
        gateway.poll_interval_seconds = poll_interval_seconds;
        Ok(true)
    }

    /// 已写入的全部读数
    pub fn readings(&self) -> Vec<Reading> {
        self.readings
            .read()
            .map(|items| items.clone())
            .unwrap_or_default()
    }

    /// 指定网关的读数
    pub fn readings_for(&self, gateway_id: &str) -> Vec<Reading> {
        self.readings
            .read()
            .map(|items| {
                items
                    .iter()
                    .filter(|item| item.gateway_id == gateway_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn update_gateway<F>(&self, gateway_id: &str, apply: F) -> Result<(), StorageError>
    where
        F: FnOnce(&mut Gateway),
    {
        let mut gateways = self
            .gateways
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        if let Some(gateway) = gateways.get_mut(gateway_id) {
            apply(gateway);
        }
        Ok(())
    }
}

impl Default for InMemoryPollingRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PollingRepository for InMemoryPollingRepository {
    async fn get_gateway(&self, gateway_id: &str) -> Result<Option<Gateway>, StorageError> {
        let gateways = self
            .gateways
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(gateways.get(gateway_id).cloned())
    }

    async fn get_active_gateways(&self) -> Result<Vec<Gateway>, StorageError> {
        let gateways = self
            .gateways
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(gateways
            .values()
            .filter(|item| item.is_active)
            .cloned()
            .collect())
    }

    async fn list_gateways(&self) -> Result<Vec<Gateway>, StorageError> {
        let gateways = self
            .gateways
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(gateways.values().cloned().collect())
    }

    async fn get_enabled_data_points(
        &self,
        gateway_id: &str,
    ) -> Result<Vec<DataPoint>, StorageError> {
        let points = self
            .points
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(points
            .values()
            .filter(|item| item.gateway_id == gateway_id && item.enabled)
            .cloned()
            .collect())
    }

    async fn insert_reading(&self, reading: &Reading) -> Result<(), StorageError> {
        let mut readings = self
            .readings
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        readings.push(reading.clone());
        Ok(())
    }

    async fn increment_gateway_success(&self, gateway_id: &str) -> Result<(), StorageError> {
        self.update_gateway(gateway_id, |gateway| gateway.success_count += 1)
    }

    async fn increment_gateway_failure(&self, gateway_id: &str) -> Result<(), StorageError> {
        self.update_gateway(gateway_id, |gateway| gateway.failure_count += 1)
    }

    async fn set_gateway_active(
        &self,
        gateway_id: &str,
        is_active: bool,
    ) -> Result<Option<bool>, StorageError> {
        let mut gateways = self
            .gateways
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let Some(gateway) = gateways.get_mut(gateway_id) else {
            return Ok(None);
        };
        let previous = gateway.is_active;
        gateway.is_active = is_active;
        Ok(Some(previous))
    }

    async fn update_gateway_last_seen(
        &self,
        gateway_id: &str,
        ts_ms: i64,
    ) -> Result<(), StorageError> {
        self.update_gateway(gateway_id, |gateway| {
            gateway.last_seen_at_ms = Some(ts_ms)
        })
    }

    async fn last_reading_at_ms(&self, gateway_id: &str) -> Result<Option<i64>, StorageError> {
        let readings = self
            .readings
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(readings
            .iter()
            .filter(|item| item.gateway_id == gateway_id)
            .map(|item| item.ts_ms)
            .max())
    }

    async fn delete_gateway(&self, gateway_id: &str) -> Result<bool, StorageError> {
        let removed = self
            .gateways
            .write()
            .map_err(|_| StorageError::new("lock failed"))?
            .remove(gateway_id)
            .is_some();
        if !removed {
            return Ok(false);
        }
        self.points
            .write()
            .map_err(|_| StorageError::new("lock failed"))?
            .retain(|_, point| point.gateway_id != gateway_id);
        self.readings
            .write()
            .map_err(|_| StorageError::new("lock failed"))?
            .retain(|reading| reading.gateway_id != gateway_id);
        Ok(true)
    }
}
