pub mod error_handling;
pub mod metrics;
pub mod request_id;

pub use error_handling::*;
pub use metrics::{metrics_handler, metrics_middleware};
pub use request_id::{request_id_middleware, REQUEST_ID_HEADER};
