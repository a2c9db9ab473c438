//! # Observability
//!
//! Structured logging, Prometheus metrics and request ID propagation for
//! the node.
//!
//! ```rust,ignore
//! use axum::{middleware, Router};
//! use tably_node::observability::{init_logging, request_id_middleware, LogFormat};
//!
//! init_logging("info", LogFormat::Json);
//! let app: Router<()> = Router::new().layer(middleware::from_fn(request_id_middleware));
//! ```

mod logging;
mod metrics;
pub mod middleware;

pub use logging::{filter_directive, init_logging, LogFormat};
pub use metrics::{route_label, MetricsState, METRICS};
pub use middleware::{
    metrics_handler, metrics_middleware, request_id_middleware, RequestId, REQUEST_ID_HEADER,
};
