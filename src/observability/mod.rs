//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, access log stage)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout, JSON lines)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - One `http_request` event per response, keyed by request ID
//! - Log format (JSON or pretty) is chosen once at startup
//! - Without an installed recorder, metric calls are no-ops

pub mod logging;
pub mod metrics;

pub use logging::AccessLog;
