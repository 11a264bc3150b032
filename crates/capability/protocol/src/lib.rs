//! # 协议通信能力模块
//!
//! 提供 Modbus TCP 网关的寄存器读取与解码能力：
//! - **codec**：寄存器字 → 标量值（int16/uint16/int32/uint32/float32/float64），支持三种字节序
//! - **ModbusGatewayClient**：按点位发起单次读寄存器事务（功能码 3/4），短时复用连接
//!
//! ## 架构设计
//!
//! ```text
//! Gateway (host/port/unit_id) + DataPoint (function/address/count)
//!       │
//!       ▼
//! RegisterReader::read_registers ──► Vec<u16>
//!       │
//!       ▼
//! codec::decode(words, data_type, byte_order) ──► RegisterValue
//!       │
//!       ▼
//! codec::scale(value, factor) ──► f64
//! ```
//!
//! ## 错误分类
//!
//! - `ProtocolError::Connection` / `ProtocolError::Timeout`：网络层失败，下个周期可重试
//! - `ProtocolError::Exception` / `ProtocolError::Frame`：设备拒绝或帧异常，按点位记录
//! - `DecodeError`：寄存器数量与数据类型不匹配（配置错误）

pub mod codec;
mod error;
mod modbus_tcp;
mod types;

pub use codec::{decode, scale, DecodeError, RegisterValue};
pub use error::ProtocolError;
pub use modbus_tcp::{ModbusClientConfig, ModbusGatewayClient};
pub use types::*;
