//! Query Gateway - Main entry point.
//!
//! Serves the gateway over HTTP, optionally opening connections given on the
//! command line first.

use clap::Parser;
use query_gateway::config::Config;
use query_gateway::db::{ConnectionRegistry, DriverConnectionFactory};
use query_gateway::gateway::ExecutionGateway;
use query_gateway::transport::HttpTransport;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();

    init_tracing(&config);

    info!("Starting Query Gateway v{}", env!("CARGO_PKG_VERSION"));

    // The one registry for this process; closed by the transport on shutdown.
    let registry = Arc::new(ConnectionRegistry::new());
    let gateway = Arc::new(ExecutionGateway::new(
        registry.clone(),
        Arc::new(DriverConnectionFactory),
    ));

    let targets = config.connect_targets()?;
    if !targets.is_empty() {
        info!(count = targets.len(), "Connecting to preconfigured databases");
    }
    for target in &targets {
        if let Err(e) = gateway.connect_with(target.kind, &target.endpoint).await {
            error!(error = %e, "Startup connection failed");
            registry.remove_all().await.ok();
            return Err(e.into());
        }
    }

    let transport = HttpTransport::new(gateway, &config.http_host, config.http_port);
    if let Err(e) = transport.run().await {
        error!(error = %e, "Server error");
        registry.remove_all().await.ok();
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}
