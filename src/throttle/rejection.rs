//! 拒绝策略：把拒绝原因渲染成状态码、纯文本消息和可选的 Retry-After

use std::fmt;
use std::time::Duration;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};

use super::gate::RejectReason;
use super::opts::{RetryAfterFn, ThrottleOpts, DEFAULT_STATUS_CODE};

/// 容量拒绝消息
pub const MSG_CAPACITY_EXCEEDED: &str = "Server capacity exceeded.";
/// 积压超时消息（闸门超时与调用方取消共用）
pub const MSG_BACKLOG_TIMEOUT: &str = "Timed out while waiting for a pending request to complete.";

const TEXT_PLAIN_UTF8: &str = "text/plain; charset=utf-8";

/// 拒绝策略
#[derive(Clone)]
pub struct RejectionPolicy {
    status_code: StatusCode,
    retry_after: Option<RetryAfterFn>,
}

impl RejectionPolicy {
    pub fn new(status_code: StatusCode, retry_after: Option<RetryAfterFn>) -> Self {
        Self {
            status_code,
            retry_after,
        }
    }

    pub fn from_opts(opts: &ThrottleOpts) -> Self {
        Self::new(opts.status_code, opts.retry_after.clone())
    }

    /// 拒绝状态码
    pub fn status_code(&self) -> StatusCode {
        self.status_code
    }

    /// 渲染拒绝结果。
    ///
    /// 只有调用方上下文导致的放弃才以 `true` 调用重试函数。
    pub fn reject(&self, reason: RejectReason) -> Rejection {
        let (message, ambient_cancel) = match reason {
            RejectReason::Capacity => (MSG_CAPACITY_EXCEEDED, false),
            RejectReason::Timeout { ambient_cancel } => (MSG_BACKLOG_TIMEOUT, ambient_cancel),
        };

        Rejection {
            reason,
            status: self.status_code,
            message,
            retry_after: self.retry_after.as_ref().map(|f| f(ambient_cancel)),
        }
    }
}

impl Default for RejectionPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_STATUS_CODE, None)
    }
}

impl fmt::Debug for RejectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RejectionPolicy")
            .field("status_code", &self.status_code)
            .field("retry_after", &self.retry_after.is_some())
            .finish()
    }
}

/// 一次拒绝
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} ({status})")]
pub struct Rejection {
    /// 拒绝原因
    pub reason: RejectReason,
    /// 状态码
    pub status: StatusCode,
    /// 固定消息
    pub message: &'static str,
    /// 建议的重试间隔
    pub retry_after: Option<Duration>,
}

impl Rejection {
    /// 响应体（与消息相同，带换行）
    pub fn body(&self) -> String {
        format!("{}\n", self.message)
    }

    /// Retry-After 头部值：整秒数，向下取整
    pub fn retry_after_header(&self) -> Option<HeaderValue> {
        self.retry_after
            .map(|retry_after| HeaderValue::from(retry_after.as_secs()))
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.body()).into_response();
        let headers = response.headers_mut();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(TEXT_PLAIN_UTF8));
        headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
        if let Some(value) = self.retry_after_header() {
            headers.insert(header::RETRY_AFTER, value);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn policy_with_retry() -> RejectionPolicy {
        RejectionPolicy::new(
            StatusCode::TOO_MANY_REQUESTS,
            Some(Arc::new(|ambient_cancel| {
                if ambient_cancel {
                    Duration::from_secs(2)
                } else {
                    Duration::from_secs(1)
                }
            })),
        )
    }

    #[test]
    fn test_capacity_rejection() {
        let rejection = policy_with_retry().reject(RejectReason::Capacity);
        assert_eq!(rejection.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(rejection.body(), "Server capacity exceeded.\n");
        assert_eq!(rejection.retry_after, Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_gate_timeout_uses_false_flag() {
        let rejection = policy_with_retry().reject(RejectReason::Timeout { ambient_cancel: false });
        assert_eq!(rejection.message, MSG_BACKLOG_TIMEOUT);
        assert_eq!(rejection.retry_after, Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_ambient_cancel_uses_true_flag_and_same_body() {
        let rejection = policy_with_retry().reject(RejectReason::Timeout { ambient_cancel: true });
        assert_eq!(rejection.message, MSG_BACKLOG_TIMEOUT);
        assert_eq!(rejection.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(rejection.retry_after, Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_no_retry_function_means_no_header() {
        let policy = RejectionPolicy::default();
        for reason in [
            RejectReason::Capacity,
            RejectReason::Timeout { ambient_cancel: false },
            RejectReason::Timeout { ambient_cancel: true },
        ] {
            let response = policy.reject(reason).into_response();
            assert!(response.headers().get(header::RETRY_AFTER).is_none());
        }
    }

    #[test]
    fn test_response_headers() {
        let policy = RejectionPolicy::new(
            StatusCode::IM_A_TEAPOT,
            Some(Arc::new(|_| Duration::from_millis(2_900))),
        );
        let response = policy.reject(RejectReason::Capacity).into_response();

        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
        assert_eq!(response.headers()[header::CONTENT_TYPE], TEXT_PLAIN_UTF8);
        assert_eq!(response.headers()[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
        // 向下取整
        assert_eq!(response.headers()[header::RETRY_AFTER], "2");
    }
}
