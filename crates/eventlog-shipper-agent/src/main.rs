// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use metrics_exporter_prometheus::PrometheusBuilder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use eventlog_shipper::agent::EventLogAgent;
use eventlog_shipper::config::AgentConfig;

#[tokio::main]
pub async fn main() {
    let config = AgentConfig::from_env();
    let env_filter = match &config {
        Ok(config) => config.log_filter(),
        Err(_) => AgentConfig::default().log_filter(),
    };

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration, shutting down: {e}");
            std::process::exit(1);
        }
    };

    match PrometheusBuilder::new()
        .with_http_listener(config.metrics_addr)
        .install()
    {
        Ok(()) => info!("Serving metrics on {}", config.metrics_addr),
        Err(e) => error!("Unable to start metrics listener on {}: {e}", config.metrics_addr),
    }

    let agent = match EventLogAgent::start(config) {
        Ok(agent) => agent,
        Err(e) => {
            error!("Unable to start agent: {e}");
            std::process::exit(1);
        }
    };

    wait_for_shutdown(&agent.cancel_token()).await;
    agent.shutdown().await;
}

async fn wait_for_shutdown(cancel: &CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = cancel.cancelled() => info!("Shutdown requested via cancellation token"),
        () = terminate => info!("Received SIGTERM, initiating shutdown"),
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => info!("Received Ctrl+C, initiating shutdown"),
            Err(e) => error!("Failed to listen for Ctrl+C: {e}"),
        },
    }
}
