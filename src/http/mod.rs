//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, trace + timeout layers)
//!     → dispatch::Dispatcher (sandbox or origin?)
//!     → dispatch::inject_route_headers (edge requests only)
//!     → hyper-util client → upstream
//!     → response streamed back to the client
//! ```

pub mod server;

pub use server::{AppState, HttpServer};
