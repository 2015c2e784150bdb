//! HTTP server setup.
//!
//! # Responsibilities
//! - Assemble the standard middleware pipeline
//! - Serve one accepted TCP connection (HTTP/1.1 or HTTP/2)
//! - Bound how long a connection may sit idle, dribble its request head,
//!   or hold a request in flight
//! - Switch a connection to graceful shutdown when draining starts
//!
//! # Design Decisions
//! - The panic barrier sits inside identity, access log and security headers
//!   so a recovered panic still carries the request ID and headers. Panics
//!   in those outer stages are caught per connection by
//!   [`contain`](crate::resilience::contain) and answered with a bare `500`.
//! - A request that outlives the write timeout closes its connection; the
//!   client sees the connection drop rather than a response.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::Request;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto;
use tokio::net::TcpStream;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;

use crate::config::{AppConfig, TimeoutConfig};
use crate::http::pipeline::{Handler, Pipeline};
use crate::http::request::RequestIdentity;
use crate::observability::AccessLog;
use crate::resilience::{contain, DeadlineEnforcement, PanicBarrier};
use crate::security::{AdmissionControl, CorsPolicy, LimiterRegistry, SecurityHeaders};

/// Per-connection time limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionTimeouts {
    /// HTTP/1 request head must arrive within this.
    pub header_read: Duration,
    /// A single request may be in flight at most this long.
    pub write: Duration,
    /// A connection with nothing in flight is closed after this.
    pub idle: Duration,
}

impl ConnectionTimeouts {
    pub fn from_config(config: &TimeoutConfig) -> Self {
        Self {
            header_read: config.read_timeout(),
            write: config.write_timeout(),
            idle: config.idle_timeout(),
        }
    }
}

impl Default for ConnectionTimeouts {
    fn default() -> Self {
        Self::from_config(&TimeoutConfig::default())
    }
}

/// Serves connections through a composed [`Pipeline`].
#[derive(Debug, Clone)]
pub struct HttpServer {
    pipeline: Pipeline,
    timeouts: ConnectionTimeouts,
}

impl HttpServer {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            timeouts: ConnectionTimeouts::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: ConnectionTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// The service's standard stage order around `terminal`:
    /// identity, access log, security headers, panic barrier, CORS,
    /// admission control, deadline.
    pub fn standard_pipeline(
        config: &AppConfig,
        registry: Arc<LimiterRegistry>,
        terminal: Handler,
    ) -> Pipeline {
        Pipeline::builder()
            .stage(RequestIdentity)
            .stage(AccessLog)
            .stage_if(config.security.enable_headers, SecurityHeaders)
            .stage(PanicBarrier)
            .stage(CorsPolicy::from_config(&config.cors))
            .stage_if(config.rate_limit.enabled, AdmissionControl::new(registry))
            .stage(DeadlineEnforcement::new(config.timeouts.request_timeout()))
            .build(terminal)
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn timeouts(&self) -> ConnectionTimeouts {
        self.timeouts
    }

    /// Serve `stream` until the client closes it, a connection timeout
    /// fires, or `draining` flips to `true`, after which in-flight requests
    /// finish and the connection closes.
    pub async fn serve_connection(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        draining: watch::Receiver<bool>,
    ) {
        let activity = Arc::new(Activity::new());
        let pipeline = self.pipeline.clone();
        let tracked = Arc::clone(&activity);
        let service = service_fn(move |req: Request<Incoming>| {
            let mut req = req.map(Body::new);
            req.extensions_mut().insert(ConnectInfo(peer));
            let in_flight = tracked.begin();
            let pipeline = pipeline.clone();
            async move {
                let response = contain(move || pipeline.handle(req)).await;
                drop(in_flight);
                Ok::<_, Infallible>(response)
            }
        });

        let mut builder = auto::Builder::new(TokioExecutor::new());
        builder
            .http1()
            .timer(TokioTimer::new())
            .header_read_timeout(self.timeouts.header_read);
        builder.http2().timer(TokioTimer::new());

        let conn = builder.serve_connection(TokioIo::new(stream), service);
        tokio::pin!(conn);

        tokio::select! {
            result = conn.as_mut() => {
                if let Err(err) = result {
                    tracing::debug!(peer = %peer, error = %err, "Connection ended with error");
                }
            }
            _ = drain_requested(draining) => {
                tracing::trace!(peer = %peer, "Draining connection");
                conn.as_mut().graceful_shutdown();
                if let Err(err) = conn.await {
                    tracing::debug!(peer = %peer, error = %err, "Connection ended with error while draining");
                }
            }
            expiry = expired(&activity, self.timeouts) => match expiry {
                Expiry::Idle => {
                    tracing::debug!(peer = %peer, idle = ?self.timeouts.idle, "Closing idle connection");
                    conn.as_mut().graceful_shutdown();
                    if let Err(err) = conn.await {
                        tracing::debug!(peer = %peer, error = %err, "Connection ended with error while closing");
                    }
                }
                Expiry::Write => {
                    tracing::warn!(
                        peer = %peer,
                        write_timeout = ?self.timeouts.write,
                        "Request exceeded write timeout, closing connection"
                    );
                }
            }
        }
    }
}

/// Resolves once draining starts, or the sender is gone.
async fn drain_requested(mut draining: watch::Receiver<bool>) {
    let _ = draining.wait_for(|draining| *draining).await;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expiry {
    Idle,
    Write,
}

/// Requests in flight on one connection, and when it was last busy.
#[derive(Debug)]
struct Activity {
    state: Mutex<ActivityState>,
    changed: Notify,
}

#[derive(Debug)]
struct ActivityState {
    next_id: u64,
    // Ids increase, so the first entry is the oldest request.
    in_flight: BTreeMap<u64, Instant>,
    last_active: Instant,
}

impl Activity {
    fn new() -> Self {
        Self {
            state: Mutex::new(ActivityState {
                next_id: 0,
                in_flight: BTreeMap::new(),
                last_active: Instant::now(),
            }),
            changed: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ActivityState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(self: &Arc<Self>) -> InFlight {
        let id = {
            let mut state = self.lock();
            let id = state.next_id;
            state.next_id += 1;
            state.in_flight.insert(id, Instant::now());
            id
        };
        self.changed.notify_one();
        InFlight {
            activity: Arc::clone(self),
            id,
        }
    }

    fn next_expiry(&self, timeouts: ConnectionTimeouts) -> (Instant, Expiry) {
        let state = self.lock();
        match state.in_flight.values().next() {
            Some(started) => (*started + timeouts.write, Expiry::Write),
            None => (state.last_active + timeouts.idle, Expiry::Idle),
        }
    }
}

/// Marks one request as in flight until dropped.
#[derive(Debug)]
struct InFlight {
    activity: Arc<Activity>,
    id: u64,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        {
            let mut state = self.activity.lock();
            state.in_flight.remove(&self.id);
            state.last_active = Instant::now();
        }
        self.activity.changed.notify_one();
    }
}

/// Resolves when the connection has idled too long or its oldest request
/// has been in flight too long.
async fn expired(activity: &Activity, timeouts: ConnectionTimeouts) -> Expiry {
    loop {
        let (at, expiry) = activity.next_expiry(timeouts);
        if at <= Instant::now() {
            return expiry;
        }
        tokio::select! {
            _ = tokio::time::sleep_until(at) => {}
            _ = activity.changed.notified() => {}
        }
    }
}
