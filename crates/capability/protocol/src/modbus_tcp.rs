//! Modbus TCP 客户端实现
//!
//! 每个点位发起一次读寄存器事务（功能码 3/4），多字载荷不拆分。
//! 同一 `host:port` 的连接在空闲期内复用，任何传输层错误都会丢弃该连接。
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! let client = ModbusGatewayClient::new(ModbusClientConfig::default());
//! let endpoint = GatewayEndpoint::new("192.168.1.100", 502, 1);
//! let words = client.read_registers(&endpoint, &ReadRequest::from(&point)).await?;
//! ```

use crate::error::ProtocolError;
use crate::types::{GatewayEndpoint, ReadRequest, RegisterReader};
use async_trait::async_trait;
use domain::FunctionCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tokio_modbus::prelude::*;
use tracing::{debug, warn};

/// 连接超时上限（毫秒）
pub const MAX_CONNECT_TIMEOUT_MS: u64 = 5000;
/// 读取超时上限（毫秒）
pub const MAX_READ_TIMEOUT_MS: u64 = 3000;

/// Modbus TCP 客户端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusClientConfig {
    /// 连接超时（毫秒，≤ 5000）
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// 读取超时（毫秒，≤ 3000）
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
    /// 连接空闲复用时长（毫秒，0 表示每次读取新建连接）
    #[serde(default = "default_idle_ttl")]
    pub idle_ttl_ms: u64,
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_read_timeout() -> u64 {
    3000
}

fn default_idle_ttl() -> u64 {
    10_000
}

impl Default for ModbusClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout(),
            read_timeout_ms: default_read_timeout(),
            idle_ttl_ms: default_idle_ttl(),
        }
    }
}

impl ModbusClientConfig {
    /// 将超时限制在允许范围内
    pub fn sanitized(mut self) -> Self {
        self.connect_timeout_ms = self.connect_timeout_ms.clamp(1, MAX_CONNECT_TIMEOUT_MS);
        self.read_timeout_ms = self.read_timeout_ms.clamp(1, MAX_READ_TIMEOUT_MS);
        self
    }
}

struct PooledConnection {
    ctx: client::Context,
    last_used: Instant,
}

type ConnectionSlot = Arc<tokio::sync::Mutex<Option<PooledConnection>>>;

/// Modbus TCP 网关客户端
pub struct ModbusGatewayClient {
    config: ModbusClientConfig,
    slots: Mutex<HashMap<String, ConnectionSlot>>,
}

impl ModbusGatewayClient {
    pub fn new(config: ModbusClientConfig) -> Self {
        Self {
            config: config.sanitized(),
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ModbusClientConfig {
        &self.config
    }

    fn slot_for(&self, endpoint: &GatewayEndpoint) -> Result<ConnectionSlot, ProtocolError> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| ProtocolError::Connection("connection pool lock poisoned".to_string()))?;
        Ok(slots.entry(endpoint.pool_key()).or_default().clone())
    }

    async fn resolve(&self, endpoint: &GatewayEndpoint) -> Result<SocketAddr, ProtocolError> {
        let connect_timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let mut addrs = timeout(
            connect_timeout,
            tokio::net::lookup_host((endpoint.host.as_str(), endpoint.port)),
        )
        .await
        .map_err(|_| ProtocolError::Timeout(format!("resolve {} timed out", endpoint.pool_key())))?
        .map_err(|e| ProtocolError::Connection(format!("resolve {}: {}", endpoint.pool_key(), e)))?;
        addrs.next().ok_or_else(|| {
            ProtocolError::Connection(format!("no address for {}", endpoint.pool_key()))
        })
    }

    async fn connect(&self, endpoint: &GatewayEndpoint) -> Result<PooledConnection, ProtocolError> {
        let addr = self.resolve(endpoint).await?;
        let ctx = timeout(
            Duration::from_millis(self.config.connect_timeout_ms),
            tcp::connect_slave(addr, Slave(endpoint.unit_id)),
        )
        .await
        .map_err(|_| {
            ProtocolError::Timeout(format!(
                "connect to {} timed out after {}ms",
                addr, self.config.connect_timeout_ms
            ))
        })?
        .map_err(|e| ProtocolError::Connection(format!("connect to {}: {}", addr, e)))?;
        debug!(target: "ems.protocol", %addr, unit_id = endpoint.unit_id, "modbus_connected");
        Ok(PooledConnection {
            ctx,
            last_used: Instant::now(),
        })
    }

    async fn transact(
        &self,
        conn: &mut PooledConnection,
        unit_id: u8,
        request: &ReadRequest,
    ) -> Result<Vec<u16>, ProtocolError> {
        conn.ctx.set_slave(Slave(unit_id));
        let ctx = &mut conn.ctx;
        let call = async move {
            match request.function_code {
                FunctionCode::ReadHoldingRegisters => {
                    ctx.read_holding_registers(request.start_address, request.count)
                        .await
                }
                FunctionCode::ReadInputRegisters => {
                    ctx.read_input_registers(request.start_address, request.count)
                        .await
                }
            }
        };
        let response = timeout(Duration::from_millis(self.config.read_timeout_ms), call)
            .await
            .map_err(|_| {
                ProtocolError::Timeout(format!(
                    "read timed out after {}ms",
                    self.config.read_timeout_ms
                ))
            })?;
        let words = response
            .map_err(transport_error)?
            .map_err(|code| ProtocolError::Exception {
                function: request.function_code.code(),
                code: format!("{:?}", code),
            })?;
        if words.len() != usize::from(request.count) {
            return Err(ProtocolError::Frame(format!(
                "expected {} registers, got {}",
                request.count,
                words.len()
            )));
        }
        Ok(words)
    }
}

fn transport_error(err: tokio_modbus::Error) -> ProtocolError {
    match err {
        tokio_modbus::Error::Transport(io) => ProtocolError::Connection(io.to_string()),
        other => ProtocolError::Frame(other.to_string()),
    }
}

#[async_trait]
impl RegisterReader for ModbusGatewayClient {
    async fn read_registers(
        &self,
        endpoint: &GatewayEndpoint,
        request: &ReadRequest,
    ) -> Result<Vec<u16>, ProtocolError> {
        let slot = self.slot_for(endpoint)?;
        let mut guard = slot.lock().await;
        let idle_ttl = Duration::from_millis(self.config.idle_ttl_ms);
        let mut conn = match guard.take() {
            Some(conn) if conn.last_used.elapsed() <= idle_ttl => conn,
            _ => self.connect(endpoint).await?,
        };

        let result = self.transact(&mut conn, endpoint.unit_id, request).await;
        match &result {
            Ok(words) => {
                debug!(
                    target: "ems.protocol",
                    endpoint = %endpoint.pool_key(),
                    unit_id = endpoint.unit_id,
                    function = request.function_code.code(),
                    register = request.start_address,
                    count = request.count,
                    values = ?words,
                    "read modbus registers"
                );
                conn.last_used = Instant::now();
                *guard = Some(conn);
            }
            // 设备正常应答了异常码，连接仍然可用
            Err(ProtocolError::Exception { .. }) => {
                conn.last_used = Instant::now();
                *guard = Some(conn);
            }
            Err(err) => {
                warn!(
                    target: "ems.protocol",
                    endpoint = %endpoint.pool_key(),
                    unit_id = endpoint.unit_id,
                    register = request.start_address,
                    error = %err,
                    "modbus connection dropped"
                );
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config_defaults() {
        let config: ModbusClientConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.connect_timeout_ms, 5000);
        assert_eq!(config.read_timeout_ms, 3000);
        assert_eq!(config.idle_ttl_ms, 10_000);
    }

    #[test]
    fn test_timeouts_are_clamped() {
        let config = ModbusClientConfig {
            connect_timeout_ms: 30_000,
            read_timeout_ms: 0,
            idle_ttl_ms: 0,
        }
        .sanitized();
        assert_eq!(config.connect_timeout_ms, MAX_CONNECT_TIMEOUT_MS);
        assert_eq!(config.read_timeout_ms, 1);
    }

    #[test]
    fn test_pool_key_ignores_unit_id() {
        let a = GatewayEndpoint::new("10.0.0.1", 502, 1);
        let b = GatewayEndpoint::new("10.0.0.1", 502, 7);
        assert_eq!(a.pool_key(), b.pool_key());
    }
}
