//! 采集轮询领域模型：网关、点位、读数与网关状态事件。
//!
//! 本 crate 不依赖任何 I/O，仅定义各模块共享的数据结构与不变量校验。

pub mod event;
pub mod gateway;
pub mod point;
pub mod reading;

pub use event::{GatewayStatus, GatewayStatusEvent, StatusChangeSource};
pub use gateway::Gateway;
pub use point::{ByteOrder, DataPoint, DataPointError, DataType, FunctionCode};
pub use reading::{Quality, Reading};

/// 获取当前时间戳（毫秒）。
pub fn now_epoch_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
