//! 轮询服务运行配置加载。

use std::env;
use std::net::SocketAddr;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// 轮询服务运行配置。
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub http_addr: SocketAddr,
    /// 未配置时使用内存仓储
    pub database_url: Option<String>,
    /// 未配置时使用内存租约
    pub redis_url: Option<String>,
    pub lease_key_prefix: String,
    /// 为 true 时必须配置数据库与 Redis
    pub require_persistence: bool,
    pub modbus_connect_timeout_ms: u64,
    pub modbus_read_timeout_ms: u64,
    pub modbus_idle_ttl_ms: u64,
    pub poll_task_timeout_seconds: u64,
    pub poll_task_max_attempts: u32,
    pub poll_task_backoff_seconds: u64,
    pub poll_workers: usize,
    pub audit_interval_seconds: u64,
    pub audit_stuck_intervals: u32,
    pub audit_stalled_intervals: u32,
}

impl AppConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let http_addr_raw =
            env::var("EMS_HTTP_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let http_addr = http_addr_raw
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::Invalid("EMS_HTTP_ADDR".to_string(), http_addr_raw))?;
        let require_persistence = read_bool_with_default("EMS_REQUIRE_PERSISTENCE", false);
        let database_url = read_optional("EMS_DATABASE_URL");
        let redis_url = read_optional("EMS_REDIS_URL");
        if require_persistence {
            if database_url.is_none() {
                return Err(ConfigError::Missing("EMS_DATABASE_URL".to_string()));
            }
            if redis_url.is_none() {
                return Err(ConfigError::Missing("EMS_REDIS_URL".to_string()));
            }
        }
        let lease_key_prefix =
            read_optional("EMS_LEASE_KEY_PREFIX").unwrap_or_else(|| "ems:polling".to_string());
        let modbus_connect_timeout_ms =
            read_u64_with_default("EMS_MODBUS_CONNECT_TIMEOUT_MS", 5000)?.clamp(1, 5000);
        let modbus_read_timeout_ms =
            read_u64_with_default("EMS_MODBUS_READ_TIMEOUT_MS", 3000)?.clamp(1, 3000);
        let modbus_idle_ttl_ms = read_u64_with_default("EMS_MODBUS_IDLE_TTL_MS", 10_000)?;
        let poll_task_timeout_seconds =
            read_u64_with_default("EMS_POLL_TASK_TIMEOUT_SECONDS", 60)?.max(1);
        let poll_task_max_attempts =
            read_u32_with_default("EMS_POLL_TASK_MAX_ATTEMPTS", 3)?.max(1);
        let poll_task_backoff_seconds = read_u64_with_default("EMS_POLL_TASK_BACKOFF_SECONDS", 10)?;
        let poll_workers = read_u32_with_default("EMS_POLL_WORKERS", 16)?.max(1) as usize;
        let audit_interval_seconds =
            read_u64_with_default("EMS_AUDIT_INTERVAL_SECONDS", 300)?.max(1);
        let audit_stuck_intervals = read_u32_with_default("EMS_AUDIT_STUCK_INTERVALS", 3)?.max(1);
        let audit_stalled_intervals =
            read_u32_with_default("EMS_AUDIT_STALLED_INTERVALS", 5)?.max(1);

        Ok(Self {
            http_addr,
            database_url,
            redis_url,
            lease_key_prefix,
            require_persistence,
            modbus_connect_timeout_ms,
            modbus_read_timeout_ms,
            modbus_idle_ttl_ms,
            poll_task_timeout_seconds,
            poll_task_max_attempts,
            poll_task_backoff_seconds,
            poll_workers,
            audit_interval_seconds,
            audit_stuck_intervals,
            audit_stalled_intervals,
        })
    }
}

fn read_u32_with_default(key: &str, default: u32) -> Result<u32, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .trim()
        .parse::<u32>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}

fn read_bool_with_default(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "on"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_numeric_uses_default() {
        assert_eq!(
            read_u64_with_default("EMS_CONFIG_TEST_UNSET_U64", 42).unwrap(),
            42
        );
    }

    #[test]
    fn invalid_numeric_is_reported() {
        unsafe {
            std::env::set_var("EMS_CONFIG_TEST_BAD_U32", "ten");
        }
        let err = read_u32_with_default("EMS_CONFIG_TEST_BAD_U32", 3).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(key, value)
            if key == "EMS_CONFIG_TEST_BAD_U32" && value == "ten"));
    }

    #[test]
    fn blank_optional_is_none() {
        unsafe {
            std::env::set_var("EMS_CONFIG_TEST_BLANK", "  ");
        }
        assert_eq!(read_optional("EMS_CONFIG_TEST_BLANK"), None);
    }
}
