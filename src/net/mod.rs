//! Network helpers.
//!
//! The outer listener is a plain `tokio::net::TcpListener` handed to axum;
//! this module only deals with finding a port for the sandbox.

pub mod port;

pub use port::{LocalPortAllocator, PortAllocator};
