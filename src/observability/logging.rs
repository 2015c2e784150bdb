//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the `tracing` subscriber
//! - Emit one `http_request` event per completed request
//!
//! # Design Decisions
//! - JSON format for production, pretty format for development
//! - Log level from `RUST_LOG` when set, else from config

use axum::extract::ConnectInfo;
use axum::http::header;
use std::net::SocketAddr;
use tokio::time::Instant;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::ObservabilityConfig;
use crate::http::pipeline::{Handler, Stage};
use crate::http::request::{client_key_of, RequestContextExt};
use crate::observability::metrics;

/// Install the global subscriber. Fails if one is already set.
pub fn init(config: &ObservabilityConfig) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(&config.log_level)));

    let json = config.json_logs.then(|| fmt::layer().json());
    let pretty = (!config.json_logs).then(|| fmt::layer());

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(pretty)
        .try_init()
}

/// Filter used when `RUST_LOG` is unset. Only this crate emits events.
fn default_filter(level: &str) -> String {
    format!("storehub={level}")
}

/// Record a failure that stopped the process before it started serving.
pub fn report_startup_failure(stage: &'static str, err: &dyn std::error::Error) {
    tracing::error!(stage, error = %err, "startup_failed");
}

/// Logs the request line, status, latency, client, user agent and request
/// ID once the response is ready. Never alters the response.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessLog;

impl Stage for AccessLog {
    fn name(&self) -> &'static str {
        "access_log"
    }

    fn wrap(&self, next: Handler) -> Handler {
        Handler::new(move |req| {
            let started = Instant::now();
            let method = req.method().clone();
            let path = req.uri().path().to_string();
            let query = req.uri().query().unwrap_or("").to_string();
            let user_agent = req
                .headers()
                .get(header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            let client = client_key_of(&req);
            let remote = req
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.to_string());
            let request_id = req
                .request_id()
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string());
            let downstream = next.call(req);

            async move {
                let response = downstream.await;
                let status = response.status().as_u16();
                let latency = started.elapsed();

                tracing::info!(
                    method = %method,
                    path = %path,
                    query = %query,
                    status,
                    latency_ms = latency.as_secs_f64() * 1000.0,
                    client = %client,
                    remote = remote.as_deref().unwrap_or("-"),
                    user_agent = %user_agent,
                    request_id = %request_id,
                    "http_request"
                );
                metrics::record_request(method.as_str(), status, started);

                response
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::response::IntoResponse;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[test]
    fn default_filter_targets_this_crate_only() {
        assert_eq!(default_filter("debug"), "storehub=debug");
        assert!(EnvFilter::try_new(default_filter("info")).is_ok());
    }

    #[test]
    fn startup_failures_are_logged_as_errors() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = fmt::Subscriber::builder()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        let err = io::Error::other("config file missing");
        tracing::subscriber::with_default(subscriber, || {
            report_startup_failure("config", &err);
        });

        let text = captured.text();
        assert!(text.contains("ERROR"), "{text}");
        assert!(text.contains("startup_failed"), "{text}");
        assert!(text.contains("stage=\"config\""), "{text}");
        assert!(text.contains("config file missing"), "{text}");
    }

    #[tokio::test]
    async fn passes_response_through_untouched() {
        let handler = AccessLog.wrap(Handler::new(|_req| async {
            (StatusCode::IM_A_TEAPOT, [("x-brew", "earl-grey")], "short and stout").into_response()
        }));

        let response = handler.call(Request::new(Body::empty())).await;
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
        assert_eq!(response.headers()["x-brew"], "earl-grey");
    }
}
