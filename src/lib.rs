pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod http;  // HTTP 服务
pub mod infra;
pub mod logging;
pub mod throttle;  // 准入控制

pub use config::{ServerConfig, ThrottleConfig};
pub use context::RequestContext;
pub use error::{ServerError, ThrottleError};
pub use http::{HttpServerState, ThrottleHttpServer};
pub use throttle::{
    AdmissionGate, BacklogTimeout, GateSnapshot, RejectReason, Rejection, RejectionPolicy,
    Throttle, ThrottleLayer, ThrottleOpts, ThrottleService, Ticket,
};
