//! Edge function dispatch for a local development proxy.
//!
//! Requests hitting the proxy are matched against declared edge function
//! routes. Matches are forwarded to a sandbox process (started once, on
//! demand) with routing headers attached; everything else goes to the origin
//! development server.

pub mod config;
pub mod dispatch;
pub mod http;
pub mod isolate;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod resilience;
pub mod routing;

pub use config::schema::DispatchConfig;
pub use dispatch::Dispatcher;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
