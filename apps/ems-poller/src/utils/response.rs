//! HTTP 响应辅助函数
//!
//! 诊断层不向外暴露内部错误细节：内部失败统一返回通用消息，细节写日志。

use api_contract::ApiResponse;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use ems_polling::PollingError;
use tracing::error;

/// 成功响应
pub fn ok<T: serde::Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
}

/// 资源未找到错误响应
pub fn not_found_error() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ApiResponse::<()>::error("RESOURCE.NOT_FOUND", "not found")),
    )
        .into_response()
}

/// 内部错误响应（通用消息）
pub fn internal_error(operation: &str, err: &dyn std::fmt::Display) -> Response {
    error!(target: "ems.polling", operation, error = %err, "polling_endpoint_failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiResponse::<()>::error(
            "INTERNAL.ERROR",
            "internal error",
        )),
    )
        .into_response()
}

/// 轮询错误响应
pub fn polling_error(operation: &str, err: PollingError) -> Response {
    match err {
        PollingError::GatewayNotFound(_) => not_found_error(),
        other => internal_error(operation, &other),
    }
}
