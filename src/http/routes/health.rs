//! GET /healthz

pub async fn health_handler() -> &'static str {
    "ok"
}
