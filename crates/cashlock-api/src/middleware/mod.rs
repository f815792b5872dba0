//! # HTTP Middleware
//!
//! - `metrics`: request counters and latency histograms through the
//!   `metrics` facade, plus the Prometheus recorder behind `/metrics`.

pub mod metrics;
