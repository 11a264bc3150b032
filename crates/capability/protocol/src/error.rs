//! 协议错误类型定义

/// 协议通信错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// 连接错误（不可达、拒绝连接、连接中断）
    #[error("connection error: {0}")]
    Connection(String),

    /// 超时错误（连接或读取）
    #[error("timeout: {0}")]
    Timeout(String),

    /// 设备返回 Modbus 异常码
    #[error("modbus exception on function {function}: {code}")]
    Exception { function: u8, code: String },

    /// 帧格式异常
    #[error("malformed frame: {0}")]
    Frame(String),
}

impl ProtocolError {
    /// 网络层错误可在下个轮询周期重试。
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout(_))
    }
}
