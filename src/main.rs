//! storehub: inventory HTTP service.
//!
//! Startup order: configuration, logging, metrics, panic hook, signal
//! handlers, then the application itself. The process exits non-zero when
//! startup fails or the shutdown drain runs out of time.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use storehub::config::{loader, ObservabilityConfig};
use storehub::lifecycle::{Application, TerminationSignals};
use storehub::observability::{logging, metrics};
use storehub::resilience::install_panic_hook;

#[derive(Parser)]
#[command(name = "storehub")]
#[command(about = "Inventory HTTP service", long_about = None)]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, env = "STOREHUB_CONFIG")]
    config: Option<PathBuf>,

    /// Load and validate the configuration, print it, then exit
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match loader::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            // No config means no logging config; log with the defaults.
            let _ = logging::init(&ObservabilityConfig::default());
            logging::report_startup_failure("config", &err);
            return Err(err.into());
        }
    };
    if cli.check_config {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    logging::init(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "storehub starting");

    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        request_timeout_ms = config.timeouts.request_timeout_ms,
        shutdown_drain_ms = config.timeouts.shutdown_drain_ms,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        let started = config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .map_err(Box::<dyn std::error::Error>::from)
            .and_then(|addr| metrics::init_metrics(addr).map_err(Into::into));
        if let Err(err) = started {
            logging::report_startup_failure("metrics", &*err);
            return Err(err);
        }
    }

    install_panic_hook();
    let signals = match TerminationSignals::install() {
        Ok(signals) => signals,
        Err(err) => {
            logging::report_startup_failure("signals", &err);
            return Err(err.into());
        }
    };

    let app = match Application::start(&config).await {
        Ok(app) => app,
        Err(err) => {
            logging::report_startup_failure("application", &err);
            return Err(err.into());
        }
    };
    match app.run_until(signals.wait()).await {
        Ok(report) => {
            tracing::info!(
                drained = report.open_at_start,
                elapsed = ?report.elapsed,
                "Shutdown complete"
            );
            Ok(())
        }
        Err(err) => {
            tracing::error!(error = %err, "Shutdown did not complete cleanly");
            Err(err.into())
        }
    }
}
