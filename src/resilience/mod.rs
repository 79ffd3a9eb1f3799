//! Resilience helpers.
//!
//! # Design Decisions
//! - No retries or timeouts on the dispatch path; a failed sandbox is a
//!   degraded mode, not something to hammer
//! - Polling loops (sandbox readiness) back off exponentially with jitter

pub mod backoff;
