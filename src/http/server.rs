//! HTTP 服务器 - 使用 Axum 提供受限流保护的服务

use axum::Router;
use std::time::Duration;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::http::routes;
use crate::throttle::Throttle;

/// HTTP 服务器共享状态
#[derive(Debug, Clone)]
pub struct HttpServerState {
    pub throttle: Throttle,
    /// 演示路由的处理耗时
    pub work_delay: Duration,
}

impl HttpServerState {
    pub fn new(throttle: Throttle, work_delay: Duration) -> Self {
        Self { throttle, work_delay }
    }
}

/// 受限流保护的 HTTP 服务器
pub struct ThrottleHttpServer {
    state: HttpServerState,
    bind_address: String,
    request_timeout: Option<Duration>,
    stats_interval: Duration,
}

impl ThrottleHttpServer {
    /// 创建新的 HTTP 服务器
    ///
    /// 限流参数不合法时返回配置错误，调用方应中止启动。
    pub fn new(config: &ServerConfig) -> Result<Self, ServerError> {
        let opts = config.throttle.to_opts()?;
        let throttle = Throttle::new(opts)?;

        Ok(Self {
            state: HttpServerState::new(throttle, config.work_delay()),
            bind_address: config.bind_address(),
            request_timeout: config.request_timeout(),
            stats_interval: Duration::from_secs(config.stats_interval_secs.max(1)),
        })
    }

    pub fn state(&self) -> &HttpServerState {
        &self.state
    }

    /// 构建路由
    pub fn router(&self) -> Router {
        build_router(self.state.clone(), self.request_timeout)
    }

    /// 启动 HTTP 服务器，收到 Ctrl-C 后优雅退出
    pub async fn start(&self) -> Result<(), ServerError> {
        let app = self.router();

        // 绑定地址
        let listener = tokio::net::TcpListener::bind(&self.bind_address).await?;

        let stats_task = spawn_stats_reporter(self.state.throttle.clone(), self.stats_interval);

        info!("🌐 HTTP 服务器启动在 {}", self.bind_address);

        // 启动服务器
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        stats_task.abort();
        result?;

        info!("👋 HTTP 服务器已停止");
        Ok(())
    }
}

/// 构建完整的应用路由
pub fn build_router(state: HttpServerState, request_timeout: Option<Duration>) -> Router {
    Router::new()
        .merge(routes::create_routes(&state, request_timeout))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// 周期性地把闸门快照写入指标
pub fn spawn_stats_reporter(throttle: Throttle, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let snapshot = throttle.snapshot();
            crate::infra::metrics::record_gate_snapshot(&snapshot);
            debug!(
                in_flight = snapshot.in_flight,
                waiting = snapshot.waiting,
                admitted = snapshot.admitted_total,
                "📊 闸门状态"
            );
        }
    })
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("🛑 收到退出信号，正在关闭...");
    }
}
