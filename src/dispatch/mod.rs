//! Edge dispatch.
//!
//! # Data Flow
//! ```text
//! Incoming request
//!     → dispatcher.rs (passthrough? enabled? sandbox + registry ready?)
//!     → routing::RouteRegistry::match_url_path
//!     → RouteTag in request extensions, sandbox address returned
//!
//! Outgoing request (http::server)
//!     → tag.rs inject_route_headers (consumes the tag)
//! ```

pub mod dispatcher;
pub mod tag;

pub use dispatcher::Dispatcher;
pub use tag::{
    has_passthrough_marker, inject_route_headers, RouteTag, PASSTHROUGH_VALUE, X_EDGE_FUNCTIONS,
    X_EDGE_PASS_HOST, X_PASSTHROUGH, X_REQUEST_ID,
};
