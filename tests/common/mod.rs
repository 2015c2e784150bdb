//! Shared utilities for integration and load testing.

#![allow(dead_code)]

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use storehub::config::{AppConfig, ListenerConfig};
use storehub::http::Handler;
use storehub::lifecycle::{Application, LifecycleError, ShutdownReport, StateCell};
use storehub::resilience::install_panic_hook;

/// Config bound to an ephemeral localhost port.
pub fn local_config() -> AppConfig {
    AppConfig {
        listener: ListenerConfig {
            bind_address: "127.0.0.1:0".into(),
            max_connections: 1024,
        },
        ..AppConfig::default()
    }
}

/// A running application plus the switch that stops it.
pub struct TestServer {
    pub base_url: String,
    pub state: StateCell,
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<Result<ShutdownReport, LifecycleError>>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Request shutdown without waiting for it.
    pub fn trigger_stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }

    /// Request shutdown and wait for the drain to finish.
    pub async fn stop(mut self) -> Result<ShutdownReport, LifecycleError> {
        self.trigger_stop();
        self.handle.await.expect("server task panicked")
    }
}

/// Start the full inventory service.
pub async fn spawn_app(config: AppConfig) -> TestServer {
    install_panic_hook();
    let app = Application::start(&config).await.expect("failed to start");
    launch(app)
}

/// Start the standard pipeline around a custom terminal handler.
pub async fn spawn_with(config: AppConfig, terminal: Handler) -> TestServer {
    install_panic_hook();
    let app = Application::start_with(&config, terminal)
        .await
        .expect("failed to start");
    launch(app)
}

fn launch(app: Application) -> TestServer {
    let base_url = format!("http://{}", app.local_addr());
    let state = app.state_handle();
    let (stop, stopped) = oneshot::channel::<()>();
    let handle = tokio::spawn(app.run_until(async move {
        let _ = stopped.await;
    }));

    TestServer {
        base_url,
        state,
        stop: Some(stop),
        handle,
    }
}

/// Terminal with a few canned routes:
/// `/panic` panics, `/slow/{ms}` sleeps first, anything else answers `ok`.
pub fn scripted_terminal() -> Handler {
    Handler::new(|req: Request<Body>| async move {
        let path = req.uri().path().to_string();
        if path == "/panic" {
            panic!("scripted failure");
        }
        if let Some(ms) = path.strip_prefix("/slow/") {
            let ms = ms.parse().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            return (StatusCode::OK, "slow ok").into_response();
        }
        Response::new(Body::from("ok"))
    })
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .expect("client")
}
