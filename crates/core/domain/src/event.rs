use serde::{Deserialize, Serialize};

/// 网关启用状态（对外通知用）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayStatus {
    Active,
    Inactive,
}

impl GatewayStatus {
    pub fn from_active(is_active: bool) -> Self {
        if is_active { Self::Active } else { Self::Inactive }
    }
}

/// 状态变更来源。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusChangeSource {
    Operator,
    HealthPolicy,
}

/// `is_active` 翻转时发出的事件。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStatusEvent {
    pub gateway_id: String,
    pub previous_status: GatewayStatus,
    pub current_status: GatewayStatus,
    pub source: StatusChangeSource,
    pub ts_ms: i64,
}
