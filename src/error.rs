use serde::{Serialize, Deserialize};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response, Json},
};

/// 闸门构造错误
///
/// 只在构造阶段出现：limit / backlog_limit / 状态码等参数不合法。
/// 属于编程错误，调用方应当直接中止启动，而不是重试。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ThrottleError {
    /// 配置无效
    #[error("invalid throttle configuration: {0}")]
    InvalidConfiguration(String),
}

/// 服务器错误类型
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum ServerError {
    /// 配置错误
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// 网络错误
    #[error("Network error: {0}")]
    Network(String),
    /// 资源未找到
    #[error("Not found: {0}")]
    NotFound(String),
    /// 服务不可用
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status_code = match &self {
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Configuration(_) | ServerError::Network(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let error_response = ErrorResponse::new(&self);
        (status_code, Json(error_response)).into_response()
    }
}

impl From<ThrottleError> for ServerError {
    fn from(err: ThrottleError) -> Self {
        ServerError::Configuration(err.to_string())
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        ServerError::Network(err.to_string())
    }
}

/// 错误代码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// 网络错误
    Network = 2001,
    /// 配置错误
    Configuration = 2003,
    /// 服务不可用
    ServiceUnavailable = 5000,
    /// 资源未找到
    NotFound = 5005,
}

impl From<&ServerError> for ErrorCode {
    fn from(error: &ServerError) -> Self {
        match error {
            ServerError::Configuration(_) => ErrorCode::Configuration,
            ServerError::Network(_) => ErrorCode::Network,
            ServerError::NotFound(_) => ErrorCode::NotFound,
            ServerError::ServiceUnavailable(_) => ErrorCode::ServiceUnavailable,
        }
    }
}

/// 错误响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// 错误代码
    pub code: ErrorCode,
    /// 错误消息
    pub message: String,
    /// 时间戳
    pub timestamp: u64,
}

impl ErrorResponse {
    /// 创建错误响应
    pub fn new(error: &ServerError) -> Self {
        Self {
            code: ErrorCode::from(error),
            message: error.to_string(),
            timestamp: chrono::Utc::now().timestamp() as u64,
        }
    }
}
