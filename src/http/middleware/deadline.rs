//! 截止时间中间件

use std::time::Duration;

use axum::{
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tokio::time::Instant;
use tracing::debug;

use crate::context::RequestContext;

/// 超时响应体
pub const SERVICE_TIMEOUT_BODY: &str = "Service Timeout\n";

/// 为每个请求创建带截止时间的上下文，并让后续处理与截止时间赛跑。
///
/// 截止时间先到时取消上下文、丢弃后续处理，返回 504。
/// 已有上下文时基于它派生；上下文保留更早的截止时间，本中间件只按自己的超时返回 504。
pub async fn deadline_middleware(
    State(timeout): State<Duration>,
    mut request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let deadline = Instant::now() + timeout;
    let ctx = match request.extensions().get::<RequestContext>() {
        Some(parent) => parent.child(),
        None => RequestContext::new(),
    }
    .with_deadline(deadline);
    request.extensions_mut().insert(ctx.clone());

    tokio::select! {
        biased;

        _ = tokio::time::sleep_until(deadline) => {
            ctx.cancel();
            debug!(request_id = %ctx.request_id, ?timeout, "⏱️ 请求超过截止时间");
            crate::infra::metrics::record_deadline_exceeded();
            (StatusCode::GATEWAY_TIMEOUT, SERVICE_TIMEOUT_BODY).into_response()
        }
        response = next.run(request) => response,
    }
}
