//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize subsystems in dependency order
//! - Bind the listener before starting background tasks
//! - Tear background tasks down once the server has stopped
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Logging, metrics and the panic hook are process-wide and belong to `main`

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::catalog::{self, ProductStore};
use crate::config::AppConfig;
use crate::http::server::ConnectionTimeouts;
use crate::http::{Handler, HttpServer};
use crate::lifecycle::server::{LifecycleError, ServerLifecycle};
use crate::lifecycle::shutdown::ShutdownReport;
use crate::lifecycle::state::{LifecycleState, StateCell};
use crate::security::LimiterRegistry;

/// A bound, running service and its background tasks.
#[derive(Debug)]
pub struct Application {
    lifecycle: ServerLifecycle,
    registry: Arc<LimiterRegistry>,
    janitor: JoinHandle<()>,
    local_addr: SocketAddr,
}

impl Application {
    /// Start the inventory service: catalog store, routes, pipeline, listener.
    pub async fn start(config: &AppConfig) -> Result<Self, LifecycleError> {
        let store = ProductStore::new();
        if config.catalog.seed_on_start {
            let seeded = store.seed_if_empty().await;
            tracing::info!(products = seeded, "Catalog seeded");
        }

        let routes = catalog::router(store, config.security.max_body_size);
        Self::start_with(config, Handler::from_service(routes)).await
    }

    /// Start the standard pipeline around an arbitrary terminal handler.
    pub async fn start_with(config: &AppConfig, terminal: Handler) -> Result<Self, LifecycleError> {
        let registry = Arc::new(LimiterRegistry::new(&config.rate_limit));
        let pipeline = HttpServer::standard_pipeline(config, Arc::clone(&registry), terminal);

        let server = HttpServer::new(pipeline)
            .with_timeouts(ConnectionTimeouts::from_config(&config.timeouts));
        let mut lifecycle = ServerLifecycle::new(server, config.timeouts.shutdown_drain());
        let local_addr = lifecycle.start(&config.listener).await?;
        let janitor = registry.spawn_janitor();

        tracing::info!(
            address = %local_addr,
            rate_limit = config.rate_limit.enabled,
            request_timeout = ?config.timeouts.request_timeout(),
            "Listening for connections"
        );

        Ok(Self {
            lifecycle,
            registry,
            janitor,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub fn state_handle(&self) -> StateCell {
        self.lifecycle.state_handle()
    }

    pub fn registry(&self) -> &Arc<LimiterRegistry> {
        &self.registry
    }

    /// Serve until `shutdown` resolves, drain, then stop the janitor.
    pub async fn run_until<F>(self, shutdown: F) -> Result<ShutdownReport, LifecycleError>
    where
        F: Future<Output = ()> + Send,
    {
        let Self {
            lifecycle,
            registry,
            janitor,
            ..
        } = self;

        let result = lifecycle.run(shutdown).await;

        registry.stop_janitor();
        if let Err(err) = janitor.await {
            tracing::warn!(error = %err, "Limiter janitor ended abnormally");
        }
        result
    }
}
