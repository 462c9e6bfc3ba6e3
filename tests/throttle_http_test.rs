use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    middleware,
    response::Response,
    routing::get,
    Router,
};
use tokio::sync::Semaphore;
use tower::ServiceExt;

use throttle_gate::http::middleware::{deadline_middleware, SERVICE_TIMEOUT_BODY};
use throttle_gate::http::server::build_router;
use throttle_gate::throttle::{MSG_BACKLOG_TIMEOUT, MSG_CAPACITY_EXCEEDED};
use throttle_gate::{
    BacklogTimeout, GateSnapshot, HttpServerState, RequestContext, Throttle, ThrottleOpts,
};

/// 手动放行的“闸”：handler 在 `/hold` 上阻塞，直到测试调用 `open`
#[derive(Clone)]
struct Latch(Arc<Semaphore>);

impl Latch {
    fn new() -> Self {
        Self(Arc::new(Semaphore::new(0)))
    }

    fn open(&self, n: usize) {
        self.0.add_permits(n);
    }

    async fn wait(&self) {
        self.0.acquire().await.unwrap().forget();
    }
}

fn throttled_router(throttle: &Throttle, latch: &Latch) -> Router {
    let latch = latch.clone();
    Router::new()
        .route("/", get(|| async { "." }))
        .route(
            "/hold",
            get(move || {
                let latch = latch.clone();
                async move {
                    latch.wait().await;
                    "held"
                }
            }),
        )
        .layer(throttle.layer())
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_string(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// 发起一个会阻塞在 `/hold` 上的请求，并等到它占住执行槽
async fn hold_one(app: &Router, throttle: &Throttle) -> tokio::task::JoinHandle<Response> {
    let in_flight = throttle.snapshot().in_flight;
    let app = app.clone();
    let handle = tokio::spawn(async move { app.oneshot(get_request("/hold")).await.unwrap() });
    wait_until(|| throttle.snapshot().in_flight == in_flight + 1).await;
    handle
}

#[tokio::test]
async fn test_request_allowed_under_limit() {
    let throttle = Throttle::with_limit(1).unwrap();
    let app = throttled_router(&throttle, &Latch::new());

    let response = app.oneshot(get_request("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, ".");
}

#[tokio::test]
async fn test_sequential_requests_with_backlog() {
    let throttle = Throttle::with_backlog(1, 1, Duration::from_secs(1)).unwrap();
    let app = throttled_router(&throttle, &Latch::new());

    for _ in 0..5 {
        let response = app.clone().oneshot(get_request("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert_eq!(throttle.snapshot().admitted_total, 5);
}

#[tokio::test]
async fn test_capacity_rejection_is_immediate() {
    let throttle = Throttle::with_limit(10).unwrap();
    let latch = Latch::new();
    let app = throttled_router(&throttle, &latch);

    let mut held = Vec::new();
    for _ in 0..10 {
        held.push(hold_one(&app, &throttle).await);
    }

    let started = Instant::now();
    let response = app.clone().oneshot(get_request("/")).await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(500));
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/plain; charset=utf-8"
    );
    assert_eq!(response.headers()[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
    assert!(response.headers().get(header::RETRY_AFTER).is_none());
    assert_eq!(body_string(response).await, format!("{}\n", MSG_CAPACITY_EXCEEDED));

    latch.open(10);
    for handle in held {
        assert_eq!(handle.await.unwrap().status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn test_limit_plus_backlog_are_served_then_rejected() {
    let throttle = Throttle::with_backlog(2, 3, Duration::from_secs(5)).unwrap();
    let latch = Latch::new();
    let app = throttled_router(&throttle, &latch);

    let mut accepted = Vec::new();
    for _ in 0..2 {
        accepted.push(hold_one(&app, &throttle).await);
    }
    for waiting in 1..=3 {
        let app = app.clone();
        accepted.push(tokio::spawn(async move {
            app.oneshot(get_request("/hold")).await.unwrap()
        }));
        wait_until(|| throttle.snapshot().waiting == waiting).await;
    }

    // 队列已满：不等积压超时，立即拒绝
    let started = Instant::now();
    let response = app.clone().oneshot(get_request("/")).await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(500));
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body_string(response).await, format!("{}\n", MSG_CAPACITY_EXCEEDED));

    latch.open(5);
    for handle in accepted {
        let response = handle.await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "held");
    }

    let snapshot = throttle.snapshot();
    assert_eq!(snapshot.admitted_total, 5);
    assert_eq!(snapshot.rejected_capacity_total, 1);
    assert_eq!(snapshot.in_flight, 0);
    assert_eq!(snapshot.waiting, 0);
}

#[tokio::test]
async fn test_backlog_timeout_then_capacity_then_recovery() {
    let throttle = Throttle::with_backlog(1, 1, Duration::from_millis(300)).unwrap();
    let latch = Latch::new();
    let app = throttled_router(&throttle, &latch);

    // 1. 占住唯一的执行槽
    let first = hold_one(&app, &throttle).await;

    // 2. 进入积压队列，最终超时
    let queued = {
        let app = app.clone();
        tokio::spawn(async move { app.oneshot(get_request("/")).await.unwrap() })
    };
    wait_until(|| throttle.snapshot().waiting == 1).await;

    // 3-5. 队列已满，立即按容量拒绝
    for _ in 0..3 {
        let response = app.clone().oneshot(get_request("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body_string(response).await, format!("{}\n", MSG_CAPACITY_EXCEEDED));
    }

    let response = queued.await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body_string(response).await, format!("{}\n", MSG_BACKLOG_TIMEOUT));

    latch.open(1);
    assert_eq!(first.await.unwrap().status(), StatusCode::OK);

    let response = app.clone().oneshot(get_request("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let snapshot = throttle.snapshot();
    assert_eq!(snapshot.rejected_capacity_total, 3);
    assert_eq!(snapshot.rejected_timeout_total, 1);
    assert_eq!(snapshot.admitted_total, 2);
}

#[tokio::test]
async fn test_custom_status_code_and_retry_after() {
    let opts = ThrottleOpts::new(1)
        .with_status_code(StatusCode::IM_A_TEAPOT)
        .with_retry_after(|_| Duration::from_secs(10));
    let throttle = Throttle::new(opts).unwrap();
    let latch = Latch::new();
    let app = throttled_router(&throttle, &latch);

    let held = hold_one(&app, &throttle).await;

    let response = app.clone().oneshot(get_request("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
    assert_eq!(response.headers()[header::RETRY_AFTER], "10");

    latch.open(1);
    held.await.unwrap();
}

#[tokio::test]
async fn test_cancelled_context_uses_ambient_retry_after() {
    let opts = ThrottleOpts::new(1)
        .with_backlog(1, BacklogTimeout::Unbounded)
        .with_retry_after(|ambient_cancel| {
            if ambient_cancel {
                Duration::from_secs(2)
            } else {
                Duration::from_secs(1)
            }
        });
    let throttle = Throttle::new(opts).unwrap();
    let app = throttled_router(&throttle, &Latch::new());

    let ctx = RequestContext::new();
    ctx.cancel();
    let mut request = get_request("/");
    request.extensions_mut().insert(ctx);

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()[header::RETRY_AFTER], "2");
    assert_eq!(body_string(response).await, format!("{}\n", MSG_BACKLOG_TIMEOUT));
    assert_eq!(throttle.snapshot().rejected_cancelled_total, 1);
}

#[tokio::test]
async fn test_outer_deadline_wins_over_backlog_timeout() {
    let throttle = Throttle::with_backlog(1, 1, Duration::from_secs(5)).unwrap();
    let latch = Latch::new();
    let app = throttled_router(&throttle, &latch);

    // 同一个闸门，再挂一条带 100ms 截止时间的路由
    let deadline_app = Router::new()
        .route("/", get(|| async { "." }))
        .layer(throttle.layer())
        .layer(middleware::from_fn_with_state(
            Duration::from_millis(100),
            deadline_middleware,
        ));

    let held = hold_one(&app, &throttle).await;

    let started = Instant::now();
    let response = deadline_app.oneshot(get_request("/")).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body_string(response).await, SERVICE_TIMEOUT_BODY);

    // 排队中的请求被放弃，积压槽已归还
    wait_until(|| throttle.snapshot().waiting == 0).await;
    let snapshot = throttle.snapshot();
    assert_eq!(snapshot.rejected_cancelled_total, 1);
    assert_eq!(snapshot.rejected_timeout_total, 0);

    latch.open(1);
    assert_eq!(held.await.unwrap().status(), StatusCode::OK);
}

#[tokio::test]
async fn test_fast_request_passes_under_deadline() {
    let throttle = Throttle::with_limit(1).unwrap();
    let app = Router::new()
        .route("/", get(|| async { "." }))
        .layer(throttle.layer())
        .layer(middleware::from_fn_with_state(
            Duration::from_secs(1),
            deadline_middleware,
        ));

    let response = app.oneshot(get_request("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, ".");
}

#[tokio::test]
async fn test_app_routes() {
    let throttle = Throttle::with_backlog(2, 4, Duration::from_millis(50)).unwrap();
    let state = HttpServerState::new(throttle, Duration::ZERO);
    let app = build_router(state, Some(Duration::from_secs(1)));

    let response = app.clone().oneshot(get_request("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, ".");

    let response = app.clone().oneshot(get_request("/healthz")).await.unwrap();
    assert_eq!(body_string(response).await, "ok");

    let response = app.clone().oneshot(get_request("/throttle/stats")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let snapshot: GateSnapshot = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(snapshot.limit, 2);
    assert_eq!(snapshot.backlog_capacity, 6);
    assert_eq!(snapshot.admitted_total, 1);

    let response = app.oneshot(get_request("/no-such-route")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
