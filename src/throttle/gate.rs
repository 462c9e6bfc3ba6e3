//! 准入闸门
//!
//! 限制同时执行的 handler 数量，多余请求进入有界积压队列等待。
//!
//! 两组票据：
//! - 执行槽（run slots），容量 = `limit`，持有者正在执行；
//! - 积压槽（backlog slots），容量 = `limit + backlog_limit`，持有者正在执行或正在排队。
//!
//! 先非阻塞地拿积压票，拿不到直接按容量拒绝；再非阻塞地拿执行票，拿不到则
//! 在「执行槽释放 / 积压超时 / 调用方上下文取消」三者之间竞速。
//! 准入后两张票一直持有到 `Ticket` 释放。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, trace};

use super::opts::{BacklogTimeout, ThrottleOpts};
use crate::context::RequestContext;
use crate::error::ThrottleError;
use crate::infra::metrics;

/// 拒绝原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// 执行中 + 排队中已达 `limit + backlog_limit`
    Capacity,
    /// 排队期间放弃；`ambient_cancel` 表示由调用方上下文（取消或截止时间）触发，
    /// 而不是闸门自己的积压超时
    Timeout { ambient_cancel: bool },
}

impl RejectReason {
    /// 指标 / 日志标签
    pub fn as_label(&self) -> &'static str {
        match self {
            RejectReason::Capacity => "capacity",
            RejectReason::Timeout { ambient_cancel: false } => "timeout",
            RejectReason::Timeout { ambient_cancel: true } => "cancelled",
        }
    }
}

/// 累计计数
#[derive(Debug, Default)]
struct GateCounters {
    admitted: AtomicU64,
    rejected_capacity: AtomicU64,
    rejected_timeout: AtomicU64,
    rejected_cancelled: AtomicU64,
}

impl GateCounters {
    fn record_rejected(&self, reason: RejectReason) {
        let counter = match reason {
            RejectReason::Capacity => &self.rejected_capacity,
            RejectReason::Timeout { ambient_cancel: false } => &self.rejected_timeout,
            RejectReason::Timeout { ambient_cancel: true } => &self.rejected_cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::record_rejected(reason);
    }
}

/// 闸门状态快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateSnapshot {
    /// 执行槽容量
    pub limit: usize,
    /// 积压槽容量（limit + backlog_limit）
    pub backlog_capacity: usize,
    /// 当前执行中
    pub in_flight: usize,
    /// 当前排队中
    pub waiting: usize,
    /// 累计准入
    pub admitted_total: u64,
    /// 累计容量拒绝
    pub rejected_capacity_total: u64,
    /// 累计积压超时拒绝
    pub rejected_timeout_total: u64,
    /// 累计因调用方取消而放弃
    pub rejected_cancelled_total: u64,
}

/// 准入闸门
///
/// Clone 后共享同一组票据。
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    run_slots: Arc<Semaphore>,
    backlog_slots: Arc<Semaphore>,
    limit: usize,
    backlog_capacity: usize,
    backlog_timeout: BacklogTimeout,
    counters: Arc<GateCounters>,
}

impl AdmissionGate {
    /// 按配置创建闸门；配置不合法时返回 `InvalidConfiguration`
    pub fn new(opts: &ThrottleOpts) -> Result<Self, ThrottleError> {
        opts.validate()?;
        let backlog_capacity = opts.backlog_capacity().ok_or_else(|| {
            ThrottleError::InvalidConfiguration("limit + backlog_limit overflows".to_string())
        })?;

        Ok(Self {
            run_slots: Arc::new(Semaphore::new(opts.limit)),
            backlog_slots: Arc::new(Semaphore::new(backlog_capacity)),
            limit: opts.limit,
            backlog_capacity,
            backlog_timeout: opts.backlog_timeout,
            counters: Arc::new(GateCounters::default()),
        })
    }

    /// 申请准入。
    ///
    /// `Ok(Ticket)` 表示已准入，票据释放（`release()` 或 drop）时归还两张票。
    /// 调用方上下文在调用前就已结束时，直接返回 `Timeout { ambient_cancel: true }`。
    pub async fn acquire(&self, ctx: &RequestContext) -> Result<Ticket, RejectReason> {
        if ctx.is_done() {
            return Err(self.reject(ctx, RejectReason::Timeout { ambient_cancel: true }));
        }

        // 1. 积压票：拿不到说明执行中 + 排队中已满，不提供等待
        let backlog = match self.backlog_slots.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => return Err(self.reject(ctx, RejectReason::Capacity)),
        };

        // 2. 执行票快速路径
        if let Ok(run) = self.run_slots.clone().try_acquire_owned() {
            return Ok(self.admit(ctx, run, backlog, None));
        }

        // 3. 排队：执行槽释放 / 积压超时 / 上下文取消，先到者为准
        debug!(request_id = %ctx.request_id, timeout = ?self.backlog_timeout, "执行槽已满，进入积压等待");
        let started = Instant::now();
        let mut abandoned = AbandonGuard {
            counters: &self.counters,
            armed: true,
        };

        let waited = match self.backlog_timeout {
            BacklogTimeout::After(timeout) => {
                tokio::select! {
                    biased;
                    _ = ctx.done() => Err(RejectReason::Timeout { ambient_cancel: true }),
                    run = self.run_slots.clone().acquire_owned() => run.map_err(|_| RejectReason::Capacity),
                    _ = tokio::time::sleep(timeout) => Err(RejectReason::Timeout { ambient_cancel: false }),
                }
            }
            BacklogTimeout::Unbounded => {
                tokio::select! {
                    biased;
                    _ = ctx.done() => Err(RejectReason::Timeout { ambient_cancel: true }),
                    run = self.run_slots.clone().acquire_owned() => run.map_err(|_| RejectReason::Capacity),
                }
            }
        };
        abandoned.armed = false;

        match waited {
            Ok(run) => Ok(self.admit(ctx, run, backlog, Some(started.elapsed()))),
            Err(reason) => {
                drop(backlog);
                Err(self.reject(ctx, reason))
            }
        }
    }

    /// 当前状态快照
    pub fn snapshot(&self) -> GateSnapshot {
        let in_flight = self.limit.saturating_sub(self.run_slots.available_permits());
        let pending = self
            .backlog_capacity
            .saturating_sub(self.backlog_slots.available_permits());

        GateSnapshot {
            limit: self.limit,
            backlog_capacity: self.backlog_capacity,
            in_flight,
            waiting: pending.saturating_sub(in_flight),
            admitted_total: self.counters.admitted.load(Ordering::Relaxed),
            rejected_capacity_total: self.counters.rejected_capacity.load(Ordering::Relaxed),
            rejected_timeout_total: self.counters.rejected_timeout.load(Ordering::Relaxed),
            rejected_cancelled_total: self.counters.rejected_cancelled.load(Ordering::Relaxed),
        }
    }

    /// 执行槽容量
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// 积压槽容量
    pub fn backlog_capacity(&self) -> usize {
        self.backlog_capacity
    }

    /// 排队等待策略
    pub fn backlog_timeout(&self) -> BacklogTimeout {
        self.backlog_timeout
    }

    fn admit(
        &self,
        ctx: &RequestContext,
        run: OwnedSemaphorePermit,
        backlog: OwnedSemaphorePermit,
        waited: Option<Duration>,
    ) -> Ticket {
        self.counters.admitted.fetch_add(1, Ordering::Relaxed);
        metrics::record_admitted(waited);
        trace!(request_id = %ctx.request_id, waited = ?waited, "请求已准入");

        Ticket {
            run: Some(run),
            backlog: Some(backlog),
        }
    }

    fn reject(&self, ctx: &RequestContext, reason: RejectReason) -> RejectReason {
        self.counters.record_rejected(reason);
        debug!(request_id = %ctx.request_id, reason = reason.as_label(), "请求被拒绝");
        reason
    }
}

/// 排队中的 acquire future 被外层丢弃时，按调用方取消计数
struct AbandonGuard<'a> {
    counters: &'a GateCounters,
    armed: bool,
}

impl Drop for AbandonGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let reason = RejectReason::Timeout { ambient_cancel: true };
            self.counters.record_rejected(reason);
        }
    }
}

/// 准入票据
///
/// 同时持有执行票和积压票。`release()` 可重复调用，只有第一次生效；
/// drop 时自动释放，因此 handler 正常返回、提前返回或 panic 都会归还票据。
#[derive(Debug)]
#[must_use = "dropping the ticket releases the execution slot immediately"]
pub struct Ticket {
    run: Option<OwnedSemaphorePermit>,
    backlog: Option<OwnedSemaphorePermit>,
}

impl Ticket {
    /// 归还执行票和积压票
    pub fn release(&mut self) {
        // 先还执行票：积压票一旦可用，新来者必须能立即拿到执行票
        drop(self.run.take());
        drop(self.backlog.take());
    }

    /// 是否已释放
    pub fn is_released(&self) -> bool {
        self.run.is_none() && self.backlog.is_none()
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        self.release();
    }
}
