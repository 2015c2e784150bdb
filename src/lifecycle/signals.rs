//! OS signal handling.
//!
//! # Responsibilities
//! - Register SIGTERM and SIGINT handlers (Ctrl+C elsewhere)
//! - Resolve once either arrives, naming the signal
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Handlers are installed up front so a missing handler is a startup error

use crate::lifecycle::server::LifecycleError;

#[cfg(unix)]
use tokio::signal::unix::{signal, Signal, SignalKind};

/// Installed termination signal handlers.
#[derive(Debug)]
pub struct TerminationSignals {
    #[cfg(unix)]
    terminate: Signal,
    #[cfg(unix)]
    interrupt: Signal,
}

impl TerminationSignals {
    /// Register the handlers. Must be called from inside a Tokio runtime.
    #[cfg(unix)]
    pub fn install() -> Result<Self, LifecycleError> {
        Ok(Self {
            terminate: signal(SignalKind::terminate()).map_err(LifecycleError::Signal)?,
            interrupt: signal(SignalKind::interrupt()).map_err(LifecycleError::Signal)?,
        })
    }

    #[cfg(not(unix))]
    pub fn install() -> Result<Self, LifecycleError> {
        Ok(Self {})
    }

    /// Wait for the next termination signal.
    #[cfg(unix)]
    pub async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.terminate.recv() => "SIGTERM",
            _ = self.interrupt.recv() => "SIGINT",
        }
    }

    #[cfg(not(unix))]
    pub async fn recv(&mut self) -> &'static str {
        let _ = tokio::signal::ctrl_c().await;
        "ctrl-c"
    }

    /// Consume the handlers, resolving on the first signal.
    pub async fn wait(mut self) {
        let name = self.recv().await;
        tracing::info!(signal = name, "Termination signal received");
    }
}
