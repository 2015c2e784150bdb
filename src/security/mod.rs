//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → headers.rs (defensive headers on the way out)
//!     → cors.rs (answer preflight, negotiate origin)
//!     → rate_limit.rs (charge the client's token bucket, 429 when empty)
//!     → Pass to handlers
//! ```
//!
//! # Design Decisions
//! - Defense in depth: multiple layers of protection
//! - Rate limits are per client key, never global
//! - No trust in client input beyond the forwarding headers

pub mod cors;
pub mod headers;
pub mod rate_limit;

pub use cors::CorsPolicy;
pub use headers::SecurityHeaders;
pub use rate_limit::{AdmissionControl, LimiterRegistry, TokenBucket};
