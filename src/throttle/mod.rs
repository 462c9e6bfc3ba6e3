//! 准入控制（throttle）
//!
//! - `opts`：配置与校验
//! - `gate`：准入闸门（执行槽 + 积压槽）
//! - `rejection`：拒绝策略（状态码、消息、Retry-After）
//! - `wrapper` / `layer`：请求入口与 tower 中间件

pub mod gate;
pub mod layer;
pub mod opts;
pub mod rejection;
pub mod wrapper;

pub use gate::{AdmissionGate, GateSnapshot, RejectReason, Ticket};
pub use layer::{ThrottleLayer, ThrottleService};
pub use opts::{
    BacklogTimeout, RetryAfterFn, ThrottleOpts, DEFAULT_BACKLOG_TIMEOUT, DEFAULT_STATUS_CODE,
};
pub use rejection::{Rejection, RejectionPolicy, MSG_BACKLOG_TIMEOUT, MSG_CAPACITY_EXCEEDED};
pub use wrapper::Throttle;
