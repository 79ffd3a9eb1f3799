//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Refresh (first edge request, config or file change):
//!     source.rs (discover user + internal functions, import maps)
//!     → registry.rs (merge, compile declarations, publish to sandbox)
//!     → swap in a new immutable snapshot
//!
//! Incoming request path:
//!     → registry.rs match_url_path
//!     → pattern.rs (per declaration, minus excluded paths)
//!     → MatchResult { function_names, orphaned_declarations }
//! ```
//!
//! # Design Decisions
//! - Declaration order is preserved in match results
//! - Deterministic: same snapshot and path always give the same result
//! - Malformed patterns never match and never fail a refresh

pub mod pattern;
pub mod registry;
pub mod source;

pub use pattern::{PatternError, RoutePattern};
pub use registry::{FunctionSink, MatchResult, RegistryError, RouteRegistry};
pub use source::{
    DirectoryFunctionSource, FunctionSource, ImportMap, InternalDirectory, InternalFunctionSupplier,
    InternalFunctions, RegisteredFunction, SourceError,
};
