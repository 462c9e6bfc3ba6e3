pub mod deadline;

pub use deadline::{deadline_middleware, SERVICE_TIMEOUT_BODY};
