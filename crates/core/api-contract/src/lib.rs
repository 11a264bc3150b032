//! 稳定的 DTO 与 API 响应契约。

use serde::{Deserialize, Serialize};

/// 标准 API 响应封装。
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ApiError>,
}

/// 失败响应的错误体。
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ApiError {
                code: code.into(),
                message: message.into(),
            }),
        }
    }
}

/// 轮询健康等级。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Error,
}

/// 单条调度完整性问题。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityIssueDto {
    /// stuck / orphaned_lease / stalled
    pub kind: String,
    pub gateway_id: String,
    pub detail: String,
}

/// `GET /polling/health` 返回结构。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollingHealthDto {
    pub status: HealthStatus,
    pub summary: String,
    pub issues_count: usize,
    pub issues: Vec<IntegrityIssueDto>,
}

impl PollingHealthDto {
    /// 无问题为 healthy，否则为 warning。
    pub fn from_issues(issues: Vec<IntegrityIssueDto>) -> Self {
        let issues_count = issues.len();
        if issues_count == 0 {
            return Self {
                status: HealthStatus::Healthy,
                summary: "polling scheduler healthy".to_string(),
                issues_count,
                issues,
            };
        }
        Self {
            status: HealthStatus::Warning,
            summary: format!("{issues_count} scheduling issue(s) detected"),
            issues_count,
            issues,
        }
    }

    pub fn error(summary: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Error,
            summary: summary.into(),
            issues_count: 0,
            issues: Vec::new(),
        }
    }
}

/// `GET /polling/status` 返回结构：调度快照 + 进程指标。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollingStatusDto<S, M> {
    pub scheduler: S,
    pub metrics: M,
}

/// 运维启停网关的返回结构。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayActionDto {
    pub gateway_id: String,
    /// activate / deactivate
    pub action: String,
    pub is_active: bool,
    /// 本次是否新派发了轮询任务
    pub dispatched: bool,
    /// 是否发生了状态翻转
    pub changed: bool,
}

/// 连接诊断返回结构。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionTestDto {
    pub gateway_id: String,
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
    pub success: bool,
    pub latency_ms: u64,
    pub sample_value: Option<u16>,
    pub error: Option<String>,
}
