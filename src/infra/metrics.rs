//! Prometheus 指标：准入结果、排队时长、执行中/排队中请求数
//!
//! 通过 `init()` 安装全局 Recorder，通过 HTTP GET `/metrics` 暴露抓取端点。
//! 未安装 Recorder 时所有 `record_*` 调用都是空操作。

use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::OnceLock;
use std::time::Duration;

use crate::throttle::{GateSnapshot, RejectReason};

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// 指标名称
const COUNTER_ADMITTED: &str = "throttle_admitted_total";
const COUNTER_REJECTED: &str = "throttle_rejected_total";
const HISTOGRAM_WAIT: &str = "throttle_wait_seconds";
const GAUGE_IN_FLIGHT: &str = "throttle_in_flight";
const GAUGE_WAITING: &str = "throttle_waiting";
const COUNTER_DEADLINE_EXCEEDED: &str = "http_deadline_exceeded_total";

/// 初始化 Prometheus 指标（安装全局 Recorder，返回 Handle 用于 HTTP 暴露）。
/// 仅需在进程内调用一次；重复调用会返回 Err。
pub fn init() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;
    HANDLE
        .set(handle)
        .map_err(|_| "metrics already initialized")?;
    Ok(())
}

/// 渲染当前指标为 Prometheus 文本格式，供 GET /metrics 使用。
pub fn render_metrics() -> Option<String> {
    HANDLE.get().map(|h| h.render())
}

/// 记录一次准入；`wait` 为排队时长，快速路径为 None。
pub fn record_admitted(wait: Option<Duration>) {
    metrics::counter!(COUNTER_ADMITTED).increment(1);
    metrics::histogram!(HISTOGRAM_WAIT).record(wait.unwrap_or_default().as_secs_f64());
}

/// 记录一次拒绝，按原因打标签。
pub fn record_rejected(reason: RejectReason) {
    metrics::counter!(COUNTER_REJECTED, "reason" => reason.as_label()).increment(1);
}

/// 更新执行中 / 排队中请求数（Gauge）。由定时任务周期调用。
pub fn record_gate_snapshot(snapshot: &GateSnapshot) {
    metrics::gauge!(GAUGE_IN_FLIGHT).set(snapshot.in_flight as f64);
    metrics::gauge!(GAUGE_WAITING).set(snapshot.waiting as f64);
}

/// 记录外层截止时间触发次数。
pub fn record_deadline_exceeded() {
    metrics::counter!(COUNTER_DEADLINE_EXCEEDED).increment(1);
}
