//! Sandbox (isolate) subsystem.
//!
//! # Data Flow
//! ```text
//! process start / first edge request
//!     → bootstrap.rs (single-flight startup)
//!     → net::port (allocate a free port)
//!     → runtime.rs IsolateRuntime::serve (process.rs in production)
//!     → SandboxHandle (address + control channel), cached for the process
//!
//! registry refresh
//!     → bootstrap.rs FunctionSink::publish
//!     → SandboxHandle::submit(FunctionBundle)
//! ```

pub mod bootstrap;
pub mod error;
pub mod process;
pub mod runtime;

pub use bootstrap::{BootstrapOptions, IsolateBootstrapper, SandboxHandle};
pub use error::{BootstrapError, ControlError};
pub use process::ProcessRuntime;
pub use runtime::{
    BootstrapProgress, ErrorFormatters, FailureKind, FunctionBundle, FunctionFailure,
    IsolateRuntime, IsolateServer, LogProgress, ServeOptions, SubmitReport,
};
