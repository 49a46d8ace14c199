//! # Middleware Stack
//!
//! - [`metrics`]: HTTP request counters and latency.

pub mod metrics;
