//! Per-request panic isolation.
//!
//! # Responsibilities
//! - Catch panics raised by downstream stages or the terminal handler
//! - Log them with the request ID, panic location and backtrace
//! - Answer with a generic `500` instead of tearing down the connection
//!
//! # Design Decisions
//! - The barrier polls the downstream future inside `catch_unwind`
//! - A process-wide panic hook captures location and backtrace while a
//!   barrier is on the stack; outside a barrier it defers to the previous hook
//! - The response never contains panic details

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe, PanicHookInfo};
use std::sync::Once;

use axum::http::StatusCode;
use axum::response::Response;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::http::pipeline::{Handler, Stage};
use crate::http::request::RequestContextExt;
use crate::http::response::{json_error, INTERNAL_ERROR_MESSAGE};
use crate::observability::metrics;

thread_local! {
    static BARRIER_DEPTH: Cell<usize> = const { Cell::new(0) };
    static LAST_PANIC: RefCell<Option<PanicReport>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

/// What the hook saw at the panic site.
#[derive(Debug, Clone)]
struct PanicReport {
    location: String,
    backtrace: String,
}

/// Install the hook that records panic context for [`PanicBarrier`].
///
/// Idempotent. Panics outside a barrier still reach the previous hook.
pub fn install_panic_hook() {
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info: &PanicHookInfo<'_>| {
            if BARRIER_DEPTH.with(Cell::get) == 0 {
                previous(info);
                return;
            }
            let report = PanicReport {
                location: info
                    .location()
                    .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
                    .unwrap_or_else(|| "unknown".to_string()),
                backtrace: Backtrace::force_capture().to_string(),
            };
            LAST_PANIC.with(|slot| *slot.borrow_mut() = Some(report));
        }));
    });
}

struct DepthGuard;

impl DepthGuard {
    fn enter() -> Self {
        BARRIER_DEPTH.with(|d| d.set(d.get() + 1));
        DepthGuard
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        BARRIER_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Run `fut` so that a panic while polling it becomes `Err(payload)`.
///
/// The barrier depth is raised only for the duration of each poll, so the
/// hook sees it on whichever worker thread the poll runs.
async fn guarded<F>(fut: F) -> Result<F::Output, Box<dyn Any + Send>>
where
    F: Future + Send,
{
    let mut fut = Box::pin(fut);
    let polled = std::future::poll_fn(move |cx| {
        let _depth = DepthGuard::enter();
        fut.as_mut().poll(cx)
    });
    AssertUnwindSafe(polled).catch_unwind().await
}

/// Run a complete request through `call`, turning any panic that escapes
/// it into a bare `500`.
///
/// This is the connection-level net for stages that sit outside
/// [`PanicBarrier`]; those responses carry no request ID or stage headers.
pub async fn contain<F>(call: F) -> Response
where
    F: FnOnce() -> BoxFuture<'static, Response> + Send,
{
    match guarded(async move { call().await }).await {
        Ok(response) => response,
        Err(payload) => {
            let location = LAST_PANIC
                .with(|slot| slot.borrow_mut().take())
                .map(|r| r.location)
                .unwrap_or_else(|| "unknown".to_string());
            tracing::error!(
                panic = %panic_message(payload.as_ref()),
                location = %location,
                "panic_escaped_pipeline"
            );
            metrics::record_panic();
            json_error(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_MESSAGE)
        }
    }
}

/// Converts downstream panics into `500 internal server error`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PanicBarrier;

impl Stage for PanicBarrier {
    fn name(&self) -> &'static str {
        "panic_barrier"
    }

    fn wrap(&self, next: Handler) -> Handler {
        Handler::new(move |req| {
            let request_id = req
                .context()
                .map(|ctx| ctx.request_id_str().to_string())
                .unwrap_or_else(|| "-".to_string());
            let method = req.method().clone();
            let path = req.uri().path().to_string();
            let downstream = next.call(req);

            async move {
                match guarded(downstream).await {
                    Ok(response) => response,
                    Err(payload) => {
                        let report = LAST_PANIC.with(|slot| slot.borrow_mut().take());
                        let (location, backtrace) = match report {
                            Some(r) => (r.location, r.backtrace),
                            None => ("unknown".to_string(), "unavailable".to_string()),
                        };
                        tracing::error!(
                            request_id = %request_id,
                            method = %method,
                            path = %path,
                            panic = %panic_message(payload.as_ref()),
                            location = %location,
                            backtrace = %backtrace,
                            "panic_recovered"
                        );
                        metrics::record_panic();
                        json_error(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_MESSAGE)
                    }
                }
            }
        })
    }
}
