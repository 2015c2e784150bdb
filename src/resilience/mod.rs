//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request through the pipeline:
//!     → panic_barrier.rs (catch panics from everything inside it)
//!     → timeouts.rs (attach the request deadline)
//!     → handler binds its store calls to the deadline
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every request has a deadline
//! - One request's panic never takes down its connection or the process
//! - No retries here; callers own retry policy

pub mod panic_barrier;
pub mod timeouts;

pub use panic_barrier::{contain, install_panic_hook, PanicBarrier};
pub use timeouts::{Deadline, DeadlineEnforcement, DeadlineExceeded};
