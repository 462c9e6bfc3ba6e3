//! GET /throttle/stats - 闸门状态快照

use axum::{extract::State, Json};

use crate::http::HttpServerState;
use crate::throttle::GateSnapshot;

pub async fn stats_handler(State(state): State<HttpServerState>) -> Json<GateSnapshot> {
    Json(state.throttle.snapshot())
}
