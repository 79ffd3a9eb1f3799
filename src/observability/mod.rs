//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → tracing events (logging.rs installs the subscriber)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Request ID from the route tag is attached to every dispatch log line
//! - Metrics are cheap when no recorder is installed

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::{init_metrics, DispatchOutcome};
