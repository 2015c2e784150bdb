//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → Catalog store → Limiter registry → Pipeline → Bind → Janitor
//!
//! Running (server.rs):
//!     Accept → spawn connection task → serve through the pipeline
//!
//! Shutdown (server.rs, shutdown.rs):
//!     Signal received → Stop accepting → Drain connections (bounded) → Stopped
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → resolve the shutdown future
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then listeners
//! - Ordered shutdown: stop accept, drain, close
//! - Shutdown has timeout: remaining connections are aborted after the budget

pub mod server;
pub mod shutdown;
pub mod signals;
pub mod startup;
pub mod state;

pub use server::{LifecycleError, ServerLifecycle};
pub use shutdown::{Shutdown, ShutdownReport};
pub use signals::TerminationSignals;
pub use startup::Application;
pub use state::{LifecycleState, StateCell};
