/// 在线判定的额外宽限时间（毫秒）。
const ONLINE_GRACE_MS: i64 = 30_000;

/// 轮询目标网关（Modbus TCP 网关）。
#[derive(Debug, Clone, PartialEq)]
pub struct Gateway {
    pub gateway_id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    /// Modbus 从站 ID。
    pub unit_id: u8,
    /// 轮询间隔（秒，≥1）。
    pub poll_interval_seconds: u32,
    pub is_active: bool,
    pub last_seen_at_ms: Option<i64>,
    pub success_count: u64,
    pub failure_count: u64,
}

impl Gateway {
    /// 轮询间隔（毫秒），不足 1 秒按 1 秒计。
    pub fn poll_interval_ms(&self) -> i64 {
        i64::from(self.poll_interval_seconds.max(1)) * 1000
    }

    /// 最近一次成功在 `2 × poll_interval + 30s` 内视为在线。
    pub fn is_online(&self, now_ms: i64) -> bool {
        match self.last_seen_at_ms {
            Some(last_seen) => now_ms - last_seen <= 2 * self.poll_interval_ms() + ONLINE_GRACE_MS,
            None => false,
        }
    }

    /// 累计尝试次数。
    pub fn total_polls(&self) -> u64 {
        self.success_count.saturating_add(self.failure_count)
    }

    /// 累计失败率；没有任何尝试时为 0。
    pub fn failure_rate(&self) -> f64 {
        let total = self.total_polls();
        if total == 0 {
            return 0.0;
        }
        self.failure_count as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway(interval: u32, last_seen: Option<i64>) -> Gateway {
        Gateway {
            gateway_id: "gw-1".to_string(),
            name: "Meter gateway".to_string(),
            host: "10.0.0.5".to_string(),
            port: 502,
            unit_id: 1,
            poll_interval_seconds: interval,
            is_active: true,
            last_seen_at_ms: last_seen,
            success_count: 0,
            failure_count: 0,
        }
    }

    #[test]
    fn online_window_is_two_intervals_plus_grace() {
        let gw = gateway(60, Some(1_000_000));
        assert!(gw.is_online(1_000_000 + 150_000));
        assert!(!gw.is_online(1_000_000 + 150_001));
    }

    #[test]
    fn never_seen_gateway_is_offline() {
        assert!(!gateway(10, None).is_online(0));
    }

    #[test]
    fn failure_rate_handles_zero_attempts() {
        let mut gw = gateway(10, None);
        assert_eq!(gw.failure_rate(), 0.0);
        gw.success_count = 1;
        gw.failure_count = 3;
        assert_eq!(gw.failure_rate(), 0.75);
    }
}
