//! HTTP 服务器模块 - 使用 Axum 提供受限流保护的服务
//!
//! 功能包括：
//! - 受限流保护的演示路由
//! - 闸门状态查询
//! - 外层请求截止时间
//! - Prometheus 指标与健康检查

pub mod routes;
pub mod middleware;
pub mod server;

pub use server::{HttpServerState, ThrottleHttpServer};
