//! 请求包装：准入后恰好执行一次 handler，否则返回渲染好的拒绝

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use super::gate::{AdmissionGate, GateSnapshot};
use super::layer::ThrottleLayer;
use super::opts::{ThrottleOpts, DEFAULT_BACKLOG_TIMEOUT};
use super::rejection::{Rejection, RejectionPolicy};
use crate::context::RequestContext;
use crate::error::ThrottleError;

/// 限流器：闸门 + 拒绝策略
///
/// Clone 后共享同一个闸门，可以同时挂在多条路由上。
#[derive(Debug, Clone)]
pub struct Throttle {
    gate: AdmissionGate,
    policy: RejectionPolicy,
}

impl Throttle {
    /// 按完整配置创建
    pub fn new(opts: ThrottleOpts) -> Result<Self, ThrottleError> {
        let gate = AdmissionGate::new(&opts)?;
        let policy = RejectionPolicy::from_opts(&opts);
        Ok(Self { gate, policy })
    }

    /// 只限制并发数，不排队
    pub fn with_limit(limit: usize) -> Result<Self, ThrottleError> {
        Self::new(ThrottleOpts::new(limit).with_backlog(0, DEFAULT_BACKLOG_TIMEOUT))
    }

    /// 并发数 + 积压队列 + 积压超时
    pub fn with_backlog(
        limit: usize,
        backlog_limit: usize,
        backlog_timeout: Duration,
    ) -> Result<Self, ThrottleError> {
        Self::new(ThrottleOpts::new(limit).with_backlog(backlog_limit, backlog_timeout))
    }

    /// 处理一个请求。
    ///
    /// 准入时调用 `handler` 一次，返回 `Ok(handler 输出)`；票据在 handler 结束后释放，
    /// handler panic 时随栈展开释放，panic 继续向上传播。
    /// 被拒绝时不调用 `handler`，返回 `Err(Rejection)`。
    pub async fn handle<F, Fut, T>(&self, ctx: &RequestContext, handler: F) -> Result<T, Rejection>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let ticket = match self.gate.acquire(ctx).await {
            Ok(ticket) => ticket,
            Err(reason) => {
                let rejection = self.policy.reject(reason);
                debug!(
                    request_id = %ctx.request_id,
                    status = rejection.status.as_u16(),
                    retry_after = ?rejection.retry_after,
                    "{}",
                    rejection.message
                );
                return Err(rejection);
            }
        };

        let output = handler().await;
        drop(ticket);
        Ok(output)
    }

    /// tower 中间件
    pub fn layer(&self) -> ThrottleLayer {
        ThrottleLayer::new(self.clone())
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    pub fn policy(&self) -> &RejectionPolicy {
        &self.policy
    }

    /// 闸门状态快照
    pub fn snapshot(&self) -> GateSnapshot {
        self.gate.snapshot()
    }
}
