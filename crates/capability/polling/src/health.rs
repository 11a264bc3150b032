//! 网关健康策略
//!
//! 无状态：只根据累计成功/失败计数判断是否需要自动停用。

use domain::Gateway;

/// 冷启动保护：累计尝试次数不足时不判定。
pub const DEFAULT_MIN_ATTEMPTS: u64 = 10;
/// 失败率阈值（达到即停用）。
pub const DEFAULT_FAILURE_RATE_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GatewayHealthPolicy {
    pub min_attempts: u64,
    pub failure_rate_threshold: f64,
}

impl Default for GatewayHealthPolicy {
    fn default() -> Self {
        Self {
            min_attempts: DEFAULT_MIN_ATTEMPTS,
            failure_rate_threshold: DEFAULT_FAILURE_RATE_THRESHOLD,
        }
    }
}

impl GatewayHealthPolicy {
    pub fn should_disable(&self, gateway: &Gateway) -> bool {
        gateway.total_polls() >= self.min_attempts
            && gateway.failure_rate() >= self.failure_rate_threshold
    }
}
