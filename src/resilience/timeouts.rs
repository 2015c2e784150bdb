//! Request deadlines.
//!
//! # Responsibilities
//! - Establish a per-request deadline on the [`RequestContext`]
//! - Let downstream work bind itself to that deadline
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities (`timeout_at`)
//! - The stage does not cancel the handler; handlers bind their own I/O
//! - Timeout errors are distinct from other errors (504 at the handler)
//!
//! [`RequestContext`]: crate::http::request::RequestContext

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use crate::http::pipeline::{Handler, Stage};
use crate::http::request::RequestContextExt;

/// The request deadline elapsed before the bound operation finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("request deadline exceeded")]
pub struct DeadlineExceeded;

/// A point in time after which a request's work should be abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn at(instant: Instant) -> Self {
        Self(instant)
    }

    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now() + timeout)
    }

    pub fn instant(&self) -> Instant {
        self.0
    }

    /// Time left, zero once expired.
    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.0
    }

    /// Drive `fut` until it completes or the deadline passes.
    ///
    /// An already expired deadline fails without polling `fut`.
    pub async fn bound<F: Future>(self, fut: F) -> Result<F::Output, DeadlineExceeded> {
        if self.is_expired() {
            return Err(DeadlineExceeded);
        }
        tokio::time::timeout_at(self.0, fut)
            .await
            .map_err(|_| DeadlineExceeded)
    }
}

/// Attaches a deadline `timeout` from now to every request.
///
/// An earlier deadline already on the context is kept.
#[derive(Debug, Clone, Copy)]
pub struct DeadlineEnforcement {
    timeout: Duration,
}

impl DeadlineEnforcement {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Stage for DeadlineEnforcement {
    fn name(&self) -> &'static str {
        "deadline"
    }

    fn wrap(&self, next: Handler) -> Handler {
        let timeout = self.timeout;
        Handler::new(move |mut req| {
            let deadline = Deadline::after(timeout);
            let ctx = req.context_mut();
            ctx.deadline = Some(match ctx.deadline {
                Some(existing) => existing.min(deadline),
                None => deadline,
            });
            next.call(req)
        })
    }
}
