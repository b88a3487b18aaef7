pub mod metrics;
pub mod request_guard;
pub mod request_id;
pub mod security_headers;

pub use metrics::metrics_middleware;
pub use request_id::*;
pub use security_headers::*;
