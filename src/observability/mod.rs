//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! routing / app / http server produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters, histograms)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured fields, never interpolated strings
//! - Request ID flows from the HTTP bridge into every dispatch log line
//! - Metric updates are no-ops until an exporter is installed

pub mod logging;
pub mod metrics;
