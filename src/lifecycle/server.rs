//! Server lifecycle: bind, accept, drain, stop.
//!
//! # Responsibilities
//! - Own the listener and the set of connection tasks
//! - Move through `Starting → Running → ShuttingDown → Stopped`
//! - Bound the drain; abort whatever is still open when the budget runs out

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;

use crate::config::ListenerConfig;
use crate::http::HttpServer;
use crate::lifecycle::shutdown::ShutdownReport;
use crate::lifecycle::state::{LifecycleState, StateCell};
use crate::net::{Accept, ConnectionTracker, Listener, ListenerError};
use crate::observability::metrics;

/// Pause after a transient accept failure before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("startup failed: {0}")]
    Bind(#[source] ListenerError),

    #[error("listener failed: {0}")]
    Serve(#[source] ListenerError),

    #[error("drain timed out after {timeout:?} with {open_connections} connection(s) still open")]
    DrainTimeout {
        open_connections: usize,
        timeout: Duration,
    },

    #[error("failed to install signal handlers: {0}")]
    Signal(#[source] std::io::Error),

    #[error("server is {0}, expected starting")]
    InvalidState(LifecycleState),

    #[error("server was not started")]
    NotStarted,
}

/// Drives one HTTP server from bind to stop.
#[derive(Debug)]
pub struct ServerLifecycle {
    server: HttpServer,
    state: StateCell,
    tracker: ConnectionTracker,
    listener: Option<Box<dyn Accept>>,
    drain_timeout: Duration,
}

impl ServerLifecycle {
    pub fn new(server: HttpServer, drain_timeout: Duration) -> Self {
        Self {
            server,
            state: StateCell::new(),
            tracker: ConnectionTracker::new(),
            listener: None,
            drain_timeout,
        }
    }

    /// Bind the listener. On failure the server goes straight to `Stopped`.
    pub async fn start(&mut self, config: &ListenerConfig) -> Result<SocketAddr, LifecycleError> {
        let current = self.state.get();
        if current != LifecycleState::Starting {
            return Err(LifecycleError::InvalidState(current));
        }

        let bound = Listener::bind(config)
            .await
            .and_then(|listener| {
                let addr = listener
                    .local_addr()
                    .map_err(|source| ListenerError::Bind {
                        address: config.bind_address.clone(),
                        source,
                    })?;
                Ok((listener, addr))
            });

        match bound {
            Ok((listener, addr)) => {
                self.start_with_acceptor(listener)?;
                Ok(addr)
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to bind listener");
                self.state.transition(LifecycleState::Stopped);
                Err(LifecycleError::Bind(err))
            }
        }
    }

    /// Start serving from an already-open connection source.
    pub fn start_with_acceptor<A>(&mut self, acceptor: A) -> Result<(), LifecycleError>
    where
        A: Accept + 'static,
    {
        let current = self.state.get();
        if current != LifecycleState::Starting {
            return Err(LifecycleError::InvalidState(current));
        }
        self.listener = Some(Box::new(acceptor));
        self.state.transition(LifecycleState::Running);
        Ok(())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    pub fn state(&self) -> LifecycleState {
        self.state.get()
    }

    /// A handle that keeps observing the state after `run` consumes `self`.
    pub fn state_handle(&self) -> StateCell {
        self.state.clone()
    }

    pub fn connections(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// Accept connections until `shutdown` resolves or the listener fails,
    /// then drain for at most the configured budget.
    pub async fn run<F>(mut self, shutdown: F) -> Result<ShutdownReport, LifecycleError>
    where
        F: Future<Output = ()> + Send,
    {
        let listener = self.listener.take().ok_or(LifecycleError::NotStarted)?;
        let (drain_tx, drain_rx) = watch::channel(false);
        let mut connections = JoinSet::new();
        let mut serve_error = None;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        let guard = self.tracker.track(peer);
                        let server = self.server.clone();
                        let draining = drain_rx.clone();
                        connections.spawn(async move {
                            let _permit = permit;
                            let _guard = guard;
                            server.serve_connection(stream, peer, draining).await;
                        });
                    }
                    Err(err) if err.is_transient() => {
                        tracing::warn!(error = %err, "Transient accept failure");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "Accept failed, shutting down");
                        serve_error = Some(err);
                        break;
                    }
                },
                Some(result) = connections.join_next(), if !connections.is_empty() => {
                    log_task_result(result);
                }
            }
        }

        self.state.transition(LifecycleState::ShuttingDown);
        drop(listener);
        let _ = drain_tx.send(true);

        let started = Instant::now();
        let open_at_start = connections.len();
        tracing::info!(
            open_connections = open_at_start,
            budget = ?self.drain_timeout,
            "Draining connections"
        );

        let drained = tokio::time::timeout(self.drain_timeout, async {
            while let Some(result) = connections.join_next().await {
                log_task_result(result);
            }
        })
        .await
        .is_ok();

        let forced_closures = if drained {
            0
        } else {
            let remaining = connections.len();
            connections.abort_all();
            while connections.join_next().await.is_some() {}
            metrics::record_forced_closures(remaining);
            tracing::warn!(forced = remaining, "Drain budget exhausted, connections aborted");
            remaining
        };

        let report = ShutdownReport {
            open_at_start,
            forced_closures,
            elapsed: started.elapsed(),
        };
        self.state.transition(LifecycleState::Stopped);
        tracing::info!(
            forced_closures = report.forced_closures,
            elapsed = ?report.elapsed,
            "Server stopped"
        );

        if let Some(err) = serve_error {
            return Err(LifecycleError::Serve(err));
        }
        if forced_closures > 0 {
            return Err(LifecycleError::DrainTimeout {
                open_connections: forced_closures,
                timeout: self.drain_timeout,
            });
        }
        Ok(report)
    }
}

fn log_task_result(result: Result<(), JoinError>) {
    match result {
        Ok(()) => {}
        Err(err) if err.is_panic() => tracing::error!(error = %err, "Connection task panicked"),
        Err(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures_util::future::BoxFuture;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    use super::*;
    use crate::http::{Handler, Pipeline};
    use crate::net::Accepted;

    /// Hands out `successes` real connections, then fails for good.
    #[derive(Debug)]
    struct FailingAcceptor {
        inner: Listener,
        successes: AtomicUsize,
        fail_after: Duration,
    }

    impl FailingAcceptor {
        async fn bind(successes: usize, fail_after: Duration) -> Self {
            Self {
                inner: Listener::bind(&local()).await.unwrap(),
                successes: AtomicUsize::new(successes),
                fail_after,
            }
        }
    }

    impl Accept for FailingAcceptor {
        fn accept(&self) -> BoxFuture<'_, Result<Accepted, ListenerError>> {
            Box::pin(async move {
                if self.successes.load(Ordering::SeqCst) > 0 {
                    self.successes.fetch_sub(1, Ordering::SeqCst);
                    return self.inner.accept().await;
                }
                tokio::time::sleep(self.fail_after).await;
                Err(ListenerError::Accept(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "listening socket revoked",
                )))
            })
        }

        fn local_addr(&self) -> io::Result<SocketAddr> {
            self.inner.local_addr()
        }
    }

    fn server() -> HttpServer {
        let terminal = Handler::new(|_req| async { axum::response::Response::default() });
        HttpServer::new(Pipeline::compose(terminal, Vec::new()))
    }

    fn local() -> ListenerConfig {
        ListenerConfig {
            bind_address: "127.0.0.1:0".into(),
            max_connections: 16,
        }
    }

    #[tokio::test]
    async fn bind_failure_stops_the_server() {
        let mut lifecycle = ServerLifecycle::new(server(), Duration::from_secs(1));
        let config = ListenerConfig {
            bind_address: "not-an-address".into(),
            max_connections: 1,
        };

        let result = lifecycle.start(&config).await;
        assert!(matches!(result, Err(LifecycleError::Bind(_))));
        assert_eq!(lifecycle.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn run_requires_start() {
        let lifecycle = ServerLifecycle::new(server(), Duration::from_secs(1));
        let result = lifecycle.run(async {}).await;
        assert!(matches!(result, Err(LifecycleError::NotStarted)));
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let mut lifecycle = ServerLifecycle::new(server(), Duration::from_secs(1));
        lifecycle.start(&local()).await.unwrap();
        let again = lifecycle.start(&local()).await;
        assert!(matches!(
            again,
            Err(LifecycleError::InvalidState(LifecycleState::Running))
        ));
    }

    #[tokio::test]
    async fn idle_server_stops_cleanly() {
        let mut lifecycle = ServerLifecycle::new(server(), Duration::from_secs(1));
        lifecycle.start(&local()).await.unwrap();
        assert_eq!(lifecycle.state(), LifecycleState::Running);

        let state = lifecycle.state_handle();
        let report = lifecycle.run(async {}).await.unwrap();

        assert!(report.is_clean());
        assert_eq!(report.open_at_start, 0);
        assert_eq!(state.get(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn fatal_accept_error_stops_the_server() {
        let mut lifecycle = ServerLifecycle::new(server(), Duration::from_secs(1));
        let acceptor = FailingAcceptor::bind(0, Duration::ZERO).await;
        lifecycle.start_with_acceptor(acceptor).unwrap();
        assert_eq!(lifecycle.state(), LifecycleState::Running);

        let state = lifecycle.state_handle();
        let result = lifecycle.run(std::future::pending::<()>()).await;

        assert!(matches!(
            result,
            Err(LifecycleError::Serve(ListenerError::Accept(_)))
        ));
        assert_eq!(state.get(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn serve_error_wins_over_drain_timeout() {
        let terminal = Handler::new(|_req| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            axum::response::Response::default()
        });
        let slow = HttpServer::new(Pipeline::compose(terminal, Vec::new()));
        let mut lifecycle = ServerLifecycle::new(slow, Duration::from_millis(200));

        let acceptor = FailingAcceptor::bind(1, Duration::from_millis(300)).await;
        let addr = acceptor.local_addr().unwrap();
        lifecycle.start_with_acceptor(acceptor).unwrap();

        let state = lifecycle.state_handle();
        let mut observed = state.subscribe();
        let saw_shutting_down = tokio::spawn(async move {
            observed
                .wait_for(|s| *s == LifecycleState::ShuttingDown)
                .await
                .is_ok()
        });

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream
                .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
                .await
                .unwrap();
            let mut buf = Vec::new();
            let _ = stream.read_to_end(&mut buf).await;
        });

        let result = lifecycle.run(std::future::pending::<()>()).await;

        assert!(
            matches!(result, Err(LifecycleError::Serve(_))),
            "expected a serve error, got {result:?}"
        );
        assert_eq!(state.get(), LifecycleState::Stopped);
        let saw = tokio::time::timeout(Duration::from_secs(1), saw_shutting_down)
            .await
            .unwrap()
            .unwrap();
        assert!(saw);
        tokio::time::timeout(Duration::from_secs(2), client)
            .await
            .unwrap()
            .unwrap();
    }
}
