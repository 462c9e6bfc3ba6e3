//! 请求上下文
//!
//! 每个请求携带一个显式的取消信号（`CancellationToken`）和可选的截止时间。
//! 外层组件（截止时间中间件、调用方）负责创建并取消它；闸门只观察它。

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// 请求上下文
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// 请求ID（日志关联用）
    pub request_id: String,
    /// 请求时间戳
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// 取消信号
    cancel: CancellationToken,
    /// 截止时间（可选）
    deadline: Option<Instant>,
}

impl RequestContext {
    /// 创建新的请求上下文（不会自行取消）
    pub fn new() -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now(),
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// 设置相对超时
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// 设置截止时间；已有更早的截止时间时保留更早的那个
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        });
        self
    }

    /// 使用外部传入的取消信号
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// 设置请求ID
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    /// 派生子上下文：父上下文取消时子上下文随之取消，反之不会
    pub fn child(&self) -> Self {
        Self {
            request_id: self.request_id.clone(),
            timestamp: self.timestamp,
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
        }
    }

    /// 取消信号
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// 截止时间
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// 距离截止时间的剩余时长
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// 主动取消
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// 是否已取消或已过截止时间
    pub fn is_done(&self) -> bool {
        if self.cancel.is_cancelled() {
            return true;
        }
        matches!(self.deadline, Some(deadline) if Instant::now() >= deadline)
    }

    /// 等待取消或截止时间到达（先到者为准）
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.cancel.cancelled().await,
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fresh_context_is_not_done() {
        let ctx = RequestContext::new();
        assert!(!ctx.is_done());
        assert!(ctx.deadline().is_none());
        assert!(ctx.remaining().is_none());

        let waited = tokio::time::timeout(Duration::from_millis(20), ctx.done()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_cancel_wakes_done() {
        let ctx = RequestContext::new();
        let waiter = ctx.clone();
        let handle = tokio::spawn(async move { waiter.done().await });

        ctx.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("done() should resolve after cancel")
            .unwrap();
        assert!(ctx.is_done());
    }

    #[tokio::test]
    async fn test_deadline_expires() {
        let ctx = RequestContext::new().with_timeout(Duration::from_millis(20));
        assert!(!ctx.is_done());

        tokio::time::timeout(Duration::from_secs(1), ctx.done())
            .await
            .expect("done() should resolve at the deadline");
        assert!(ctx.is_done());
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }

    #[tokio::test]
    async fn test_earlier_deadline_is_kept() {
        let now = Instant::now();
        let ctx = RequestContext::new()
            .with_deadline(now + Duration::from_millis(10))
            .with_deadline(now + Duration::from_secs(10));
        assert_eq!(ctx.deadline(), Some(now + Duration::from_millis(10)));
    }

    #[test]
    fn test_child_follows_parent_cancellation() {
        let parent = RequestContext::new();
        let child = parent.child();
        assert_eq!(child.request_id, parent.request_id);

        child.cancel();
        assert!(!parent.is_done());

        let child = parent.child();
        parent.cancel();
        assert!(child.is_done());
    }
}
