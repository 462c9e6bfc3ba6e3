//! GET / - 演示路由：模拟一段固定耗时的处理

use axum::extract::State;

use crate::http::HttpServerState;

pub async fn work_handler(State(state): State<HttpServerState>) -> &'static str {
    if !state.work_delay.is_zero() {
        tokio::time::sleep(state.work_delay).await;
    }
    "."
}
