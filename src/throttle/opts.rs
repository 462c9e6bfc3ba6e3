//! 闸门配置
//!
//! 构造时一次性校验并冻结。`limit` 必须 > 0，`backlog_limit` 必须 >= 0。

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use tokio::sync::Semaphore;

use crate::error::ThrottleError;

/// `Throttle::with_limit` 使用的默认积压超时
pub const DEFAULT_BACKLOG_TIMEOUT: Duration = Duration::from_secs(60);

/// 默认拒绝状态码（429 Too Many Requests）
pub const DEFAULT_STATUS_CODE: StatusCode = StatusCode::TOO_MANY_REQUESTS;

/// 重试建议函数：参数为“是否因调用方上下文取消而放弃等待”
pub type RetryAfterFn = Arc<dyn Fn(bool) -> Duration + Send + Sync>;

/// 积压等待策略
///
/// 零时长始终表示“不等待”；无限等待必须显式写成 `Unbounded`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BacklogTimeout {
    /// 最多等待给定时长（`Duration::ZERO` = 不等待）
    After(Duration),
    /// 一直等到拿到执行槽，或调用方上下文取消
    Unbounded,
}

impl BacklogTimeout {
    /// 有限的等待时长
    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            BacklogTimeout::After(timeout) => Some(*timeout),
            BacklogTimeout::Unbounded => None,
        }
    }
}

impl Default for BacklogTimeout {
    fn default() -> Self {
        BacklogTimeout::After(Duration::ZERO)
    }
}

impl From<Duration> for BacklogTimeout {
    fn from(timeout: Duration) -> Self {
        BacklogTimeout::After(timeout)
    }
}

/// 闸门配置
#[derive(Clone)]
pub struct ThrottleOpts {
    /// 同时执行的最大请求数
    pub limit: usize,
    /// 执行槽之外允许排队的请求数
    pub backlog_limit: usize,
    /// 排队等待策略
    pub backlog_timeout: BacklogTimeout,
    /// 拒绝时返回的状态码
    pub status_code: StatusCode,
    /// Retry-After 计算函数（可选）
    pub retry_after: Option<RetryAfterFn>,
}

impl ThrottleOpts {
    /// 只限制并发数，不排队
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            backlog_limit: 0,
            backlog_timeout: BacklogTimeout::default(),
            status_code: DEFAULT_STATUS_CODE,
            retry_after: None,
        }
    }

    /// 从有符号整数构造（配置文件、环境变量等外部输入）
    pub fn try_new(
        limit: i64,
        backlog_limit: i64,
        backlog_timeout: BacklogTimeout,
    ) -> Result<Self, ThrottleError> {
        if limit <= 0 {
            return Err(ThrottleError::InvalidConfiguration(format!(
                "limit must be greater than 0, got {}",
                limit
            )));
        }
        if backlog_limit < 0 {
            return Err(ThrottleError::InvalidConfiguration(format!(
                "backlog_limit must not be negative, got {}",
                backlog_limit
            )));
        }
        let limit = usize::try_from(limit).map_err(|_| {
            ThrottleError::InvalidConfiguration(format!("limit {} is too large", limit))
        })?;
        let backlog_limit = usize::try_from(backlog_limit).map_err(|_| {
            ThrottleError::InvalidConfiguration(format!(
                "backlog_limit {} is too large",
                backlog_limit
            ))
        })?;

        let opts = Self::new(limit).with_backlog(backlog_limit, backlog_timeout);
        opts.validate()?;
        Ok(opts)
    }

    /// 设置积压队列
    pub fn with_backlog(
        mut self,
        backlog_limit: usize,
        backlog_timeout: impl Into<BacklogTimeout>,
    ) -> Self {
        self.backlog_limit = backlog_limit;
        self.backlog_timeout = backlog_timeout.into();
        self
    }

    /// 设置拒绝状态码
    pub fn with_status_code(mut self, status_code: StatusCode) -> Self {
        self.status_code = status_code;
        self
    }

    /// 设置 Retry-After 计算函数
    pub fn with_retry_after<F>(mut self, retry_after: F) -> Self
    where
        F: Fn(bool) -> Duration + Send + Sync + 'static,
    {
        self.retry_after = Some(Arc::new(retry_after));
        self
    }

    /// 积压槽总容量（执行中 + 排队中）
    pub fn backlog_capacity(&self) -> Option<usize> {
        self.limit.checked_add(self.backlog_limit)
    }

    /// 校验不变量
    pub fn validate(&self) -> Result<(), ThrottleError> {
        if self.limit == 0 {
            return Err(ThrottleError::InvalidConfiguration(
                "limit must be greater than 0, got 0".to_string(),
            ));
        }
        match self.backlog_capacity() {
            Some(capacity) if capacity <= Semaphore::MAX_PERMITS => Ok(()),
            _ => Err(ThrottleError::InvalidConfiguration(format!(
                "limit + backlog_limit must not exceed {}",
                Semaphore::MAX_PERMITS
            ))),
        }
    }
}

impl fmt::Debug for ThrottleOpts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThrottleOpts")
            .field("limit", &self.limit)
            .field("backlog_limit", &self.backlog_limit)
            .field("backlog_timeout", &self.backlog_timeout)
            .field("status_code", &self.status_code)
            .field("retry_after", &self.retry_after.is_some())
            .finish()
    }
}
