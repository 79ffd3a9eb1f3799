//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → port allocator, isolate runtime, function sources
//!     → bootstrapper + registry + dispatcher
//!     → background sandbox startup (when edge functions exist)
//!
//! Reload (startup.rs):
//!     config watcher → registry.update_declarations + dispatcher.reconfigure
//!     function dir watcher → registry.invalidate
//!
//! Shutdown (shutdown.rs, signals.rs):
//!     SIGTERM/SIGINT → broadcast → server drains, reload task exits
//! ```
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listener is bound before the sandbox starts so its port is reserved

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{build_edge_context, spawn_reload_task, EdgeContext, EdgeServices, StartupError};
