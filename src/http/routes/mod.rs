//! HTTP 路由模块
//!
//! 路由结构：
//! - `/`               - 演示路由（受限流保护）
//! - `/throttle/stats` - 闸门状态快照
//! - `/metrics`        - Prometheus 抓取端点
//! - `/healthz`        - 健康检查

pub mod health;
pub mod metrics;
pub mod stats;
pub mod work;

use std::time::Duration;

use axum::{middleware, routing::get, Router};

use crate::error::ServerError;
use crate::http::middleware::deadline_middleware;
use crate::http::HttpServerState;

/// 创建所有路由
///
/// 只有演示路由经过闸门；配置了 `request_timeout` 时截止时间中间件包在闸门外层。
pub fn create_routes(
    state: &HttpServerState,
    request_timeout: Option<Duration>,
) -> Router<HttpServerState> {
    let mut throttled = Router::new()
        .route("/", get(work::work_handler))
        .layer(state.throttle.layer());

    if let Some(timeout) = request_timeout {
        throttled = throttled.layer(middleware::from_fn_with_state(timeout, deadline_middleware));
    }

    Router::new()
        .merge(throttled)
        .route("/throttle/stats", get(stats::stats_handler))
        .route("/metrics", get(metrics::metrics_handler))
        .route("/healthz", get(health::health_handler))
        .fallback(fallback_handler)
}

async fn fallback_handler(uri: axum::http::Uri) -> ServerError {
    ServerError::NotFound(format!("no route for {}", uri.path()))
}
