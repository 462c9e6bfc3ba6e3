//! tower 中间件：把任意 HTTP 服务包装成同形状的限流服务
//!
//! 调用方上下文从请求扩展中读取（`RequestContext`），没有时使用一个不会取消的新上下文。

use std::convert::Infallible;
use std::task::{Context, Poll};

use axum::{
    http::Request,
    response::{IntoResponse, Response},
};
use futures::future::BoxFuture;
use tower::{Layer, Service};

use super::wrapper::Throttle;
use crate::context::RequestContext;

/// 限流层
#[derive(Debug, Clone)]
pub struct ThrottleLayer {
    throttle: Throttle,
}

impl ThrottleLayer {
    pub fn new(throttle: Throttle) -> Self {
        Self { throttle }
    }
}

impl<S> Layer<S> for ThrottleLayer {
    type Service = ThrottleService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ThrottleService {
            inner,
            throttle: self.throttle.clone(),
        }
    }
}

/// 限流服务
#[derive(Debug, Clone)]
pub struct ThrottleService<S> {
    inner: S,
    throttle: Throttle,
}

impl<S> ThrottleService<S> {
    pub fn throttle(&self) -> &Throttle {
        &self.throttle
    }
}

impl<S, B> Service<Request<B>> for ThrottleService<S>
where
    S: Service<Request<B>, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
    B: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response, Infallible>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<B>) -> Self::Future {
        // 取走已 ready 的 inner，留下一个克隆给下一次调用
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let throttle = self.throttle.clone();

        Box::pin(async move {
            let ctx = request
                .extensions()
                .get::<RequestContext>()
                .cloned()
                .unwrap_or_default();

            match throttle.handle(&ctx, move || inner.call(request)).await {
                Ok(result) => result,
                Err(rejection) => Ok(rejection.into_response()),
            }
        })
    }
}
