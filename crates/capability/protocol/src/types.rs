//! 协议相关类型定义

use crate::error::ProtocolError;
use async_trait::async_trait;
use domain::{DataPoint, FunctionCode, Gateway};
use serde::Serialize;
use std::time::Instant;

/// 网关通信地址
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GatewayEndpoint {
    pub host: String,
    pub port: u16,
    /// 从站 ID
    pub unit_id: u8,
}

impl GatewayEndpoint {
    pub fn new(host: impl Into<String>, port: u16, unit_id: u8) -> Self {
        Self {
            host: host.into(),
            port,
            unit_id,
        }
    }

    /// 连接池键（同一 host:port 共用连接）
    pub fn pool_key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl From<&Gateway> for GatewayEndpoint {
    fn from(gateway: &Gateway) -> Self {
        Self::new(gateway.host.clone(), gateway.port, gateway.unit_id)
    }
}

/// 单次读寄存器请求（一个点位对应一次设备事务）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    pub function_code: FunctionCode,
    pub start_address: u16,
    pub count: u16,
}

impl From<&DataPoint> for ReadRequest {
    fn from(point: &DataPoint) -> Self {
        Self {
            function_code: point.function_code,
            start_address: point.register_address,
            count: point.register_count,
        }
    }
}

/// 连接诊断结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionCheck {
    pub success: bool,
    pub latency_ms: u64,
    pub sample_value: Option<u16>,
    pub error: Option<String>,
}

/// 寄存器读取抽象（便于替换为测试桩）
#[async_trait]
pub trait RegisterReader: Send + Sync {
    /// 读取寄存器，返回原始字序列
    async fn read_registers(
        &self,
        endpoint: &GatewayEndpoint,
        request: &ReadRequest,
    ) -> Result<Vec<u16>, ProtocolError>;

    /// 轻量诊断：读取保持寄存器 0 的一个字
    ///
    /// 异常应答也算连通成功，异常信息放在 `error` 中。
    async fn test_connection(&self, endpoint: &GatewayEndpoint) -> ConnectionCheck {
        let started_at = Instant::now();
        let request = ReadRequest {
            function_code: FunctionCode::ReadHoldingRegisters,
            start_address: 0,
            count: 1,
        };
        let result = self.read_registers(endpoint, &request).await;
        let latency_ms = started_at.elapsed().as_millis() as u64;
        match result {
            Ok(words) => ConnectionCheck {
                success: true,
                latency_ms,
                sample_value: words.first().copied(),
                error: None,
            },
            // 设备应答了异常码：链路可达，只是寄存器 0 不可读
            Err(err @ ProtocolError::Exception { .. }) => ConnectionCheck {
                success: true,
                latency_ms,
                sample_value: None,
                error: Some(err.to_string()),
            },
            Err(err) => ConnectionCheck {
                success: false,
                latency_ms,
                sample_value: None,
                error: Some(err.to_string()),
            },
        }
    }
}
