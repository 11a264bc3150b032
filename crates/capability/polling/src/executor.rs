//! 单网关轮询执行器
//!
//! 一个周期内按 point_id 顺序逐个读取启用点位（不并发），点位之间的失败互相隔离。
//! 周期结束后只更新一次网关计数：有任何响应读数则成功 +1，全部失败则失败 +1。

use crate::error::PollingError;
use domain::{Gateway, Quality, Reading, now_epoch_ms};
use ems_protocol::{GatewayEndpoint, ProtocolError, ReadRequest, RegisterReader, decode, scale};
use ems_storage::PollingRepository;
use ems_telemetry::{
    record_poll_finished, record_poll_started, record_reading_bad, record_reading_good,
    record_reading_uncertain,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// 点位级错误分类。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointErrorKind {
    /// 网络层失败（不可达、拒绝、超时）
    Connection,
    /// 设备异常码或帧异常
    Protocol,
    /// 寄存器数量与数据类型不匹配
    Decode,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PointError {
    pub point_id: String,
    pub kind: PointErrorKind,
    pub message: String,
}

/// 一个轮询周期的结果（不持久化）。
#[derive(Debug, Clone)]
pub struct PollOutcome {
    pub gateway_id: String,
    pub success: bool,
    /// 本周期写入的全部读数（含 bad/uncertain）
    pub readings: Vec<Reading>,
    pub errors: Vec<PointError>,
    pub duration: Duration,
}

impl PollOutcome {
    pub fn count_quality(&self, quality: Quality) -> usize {
        self.readings
            .iter()
            .filter(|reading| reading.quality == quality)
            .count()
    }
}

pub struct PollExecutor {
    repository: Arc<dyn PollingRepository>,
    reader: Arc<dyn RegisterReader>,
}

impl PollExecutor {
    pub fn new(repository: Arc<dyn PollingRepository>, reader: Arc<dyn RegisterReader>) -> Self {
        Self { repository, reader }
    }

    /// 轮询一个网关的全部启用点位。
    ///
    /// 网关状态以存储中的最新记录为准，传入的 `gateway` 只提供 ID。
    pub async fn poll_gateway(&self, gateway: &Gateway) -> Result<PollOutcome, PollingError> {
        let started = Instant::now();
        let current = self
            .repository
            .get_gateway(&gateway.gateway_id)
            .await?
            .ok_or_else(|| PollingError::GatewayNotFound(gateway.gateway_id.clone()))?;
        if !current.is_active {
            return Err(PollingError::GatewayInactive(current.gateway_id));
        }
        record_poll_started();

        let endpoint = GatewayEndpoint::from(&current);
        let mut points = self
            .repository
            .get_enabled_data_points(&current.gateway_id)
            .await?;
        points.sort_by(|a, b| a.point_id.cmp(&b.point_id));

        let mut readings = Vec::with_capacity(points.len());
        let mut errors = Vec::new();
        let mut responsive = 0usize;

        for point in &points {
            let reading_id = uuid::Uuid::new_v4().to_string();
            let result = self
                .reader
                .read_registers(&endpoint, &ReadRequest::from(point))
                .await;
            let ts_ms = now_epoch_ms();
            let reading = match result {
                Ok(words) => match decode(&words, point.data_type, point.byte_order) {
                    Ok(value) => {
                        let scaled = scale(value, point.scale_factor);
                        responsive += 1;
                        if scaled.is_finite() {
                            record_reading_good();
                            Reading::good(
                                reading_id,
                                &point.point_id,
                                &current.gateway_id,
                                words,
                                scaled,
                                ts_ms,
                            )
                        } else {
                            record_reading_uncertain();
                            debug!(
                                target: "ems.polling",
                                gateway_id = %current.gateway_id,
                                point_id = %point.point_id,
                                "reading_not_finite"
                            );
                            Reading::without_value(
                                reading_id,
                                &point.point_id,
                                &current.gateway_id,
                                Some(words),
                                Quality::Uncertain,
                                ts_ms,
                            )
                        }
                    }
                    Err(err) => {
                        record_reading_bad();
                        errors.push(PointError {
                            point_id: point.point_id.clone(),
                            kind: PointErrorKind::Decode,
                            message: err.to_string(),
                        });
                        Reading::without_value(
                            reading_id,
                            &point.point_id,
                            &current.gateway_id,
                            Some(words),
                            Quality::Bad,
                            ts_ms,
                        )
                    }
                },
                Err(err) => {
                    record_reading_bad();
                    errors.push(point_error(&point.point_id, &err));
                    Reading::without_value(
                        reading_id,
                        &point.point_id,
                        &current.gateway_id,
                        None,
                        Quality::Bad,
                        ts_ms,
                    )
                }
            };
            self.repository.insert_reading(&reading).await?;
            readings.push(reading);
        }

        let success = points.is_empty() || responsive > 0;
        if !points.is_empty() {
            if responsive > 0 {
                self.repository
                    .increment_gateway_success(&current.gateway_id)
                    .await?;
                self.repository
                    .update_gateway_last_seen(&current.gateway_id, now_epoch_ms())
                    .await?;
            } else {
                self.repository
                    .increment_gateway_failure(&current.gateway_id)
                    .await?;
            }
        }

        let duration = started.elapsed();
        let latency_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        record_poll_finished(success, latency_ms);
        if success {
            info!(
                target: "ems.polling",
                gateway_id = %current.gateway_id,
                points = points.len(),
                responsive,
                errors = errors.len(),
                latency_ms,
                "gateway_polled"
            );
        } else {
            warn!(
                target: "ems.polling",
                gateway_id = %current.gateway_id,
                points = points.len(),
                errors = errors.len(),
                latency_ms,
                "gateway_poll_failed"
            );
        }

        Ok(PollOutcome {
            gateway_id: current.gateway_id,
            success,
            readings,
            errors,
            duration,
        })
    }
}

fn point_error(point_id: &str, err: &ProtocolError) -> PointError {
    let kind = if err.is_connection_error() {
        PointErrorKind::Connection
    } else {
        PointErrorKind::Protocol
    };
    PointError {
        point_id: point_id.to_string(),
        kind,
        message: err.to_string(),
    }
}
