//! Inventory HTTP service library.
//!
//! # Architecture Overview
//!
//! ```text
//!   client ──▶ net::Listener ──▶ http::HttpServer ──▶ Pipeline
//!                                                       │
//!     request_identity → access_log → security_headers → panic_barrier
//!       → cors → admission_control → deadline → catalog routes
//!                                                       │
//!   client ◀──────────────── JSON envelope ◀────────────┘
//!
//!   lifecycle: Starting → Running → ShuttingDown → Stopped
//! ```

// Core subsystems
pub mod catalog;
pub mod config;
pub mod http;
pub mod net;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;

pub use config::AppConfig;
pub use http::HttpServer;
pub use lifecycle::{Application, Shutdown};
