//! Mesh node binary using the meshturn library.
#![allow(unreachable_pub, dead_code, clippy::missing_const_for_fn, clippy::option_if_let_else)]
//!
//! This binary runs one participant of a token-passing mesh with:
//! - The packet radio emulated over UDP, one port per node
//! - Substation telemetry as the turn payload, optionally stored as CSV
//! - HTTP status endpoints
//!
//! ## Usage
//!
//! ```bash
//! # Start node 1 of a four node mesh
//! meshturn-node --node 1 --universe 1,2,3,4
//!
//! # Store received telemetry and emulate a lossy channel
//! meshturn-node --node 2 --universe 1,2,3,4 --loss 0.1 --data-dir ./node-data
//!
//! # Start with config file
//! meshturn-node --config node.toml
//! ```

mod config;
mod radio;
mod status;
mod telemetry;

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use meshturn::{Driver, SystemClock};
use tokio::{signal, sync::watch};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    config::Config,
    radio::UdpRadio,
    status::create_router,
    telemetry::{CsvSink, TelemetryApp},
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match Config::load() {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "invalid configuration");
            return Err(err.into());
        }
    };
    info!(?config, "loaded configuration");
    let protocol = config.protocol()?;

    // Emulated radio
    let radio = UdpRadio::bind(
        protocol.node,
        &protocol.universe,
        &config.bind_host,
        config.base_port,
        config.loss,
    )?;

    // Telemetry producer and consumer
    let sink = config.data_dir.as_ref().map(CsvSink::new).transpose()?;
    if let Some(sink) = &sink {
        info!(dir = %sink.dir().display(), "storing received telemetry");
    }
    let app = TelemetryApp::new(sink);

    let mut driver = Driver::new(protocol, radio, SystemClock::new(), app)?;
    let (status_tx, status_rx) = watch::channel(driver.status());

    // Protocol loop on its own thread; the flag is checked between iterations
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    let protocol_loop = tokio::task::spawn_blocking(move || {
        driver.run(&flag, |driver| {
            status_tx.send_if_modified(|current| {
                let next = driver.status();
                let changed = *current != next;
                *current = next;
                changed
            });
        });
        *driver.stats()
    });

    // Start HTTP server
    let router = create_router(status_rx);
    let listener = tokio::net::TcpListener::bind(config.status_addr).await?;
    info!(addr = %config.status_addr, "starting status server");

    // Serve with graceful shutdown
    axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await?;

    // Stop the protocol loop
    shutdown.store(true, Ordering::Relaxed);
    let stats = protocol_loop.await?;
    info!(?stats, "node stopped");

    Ok(())
}

/// Waits for SIGINT or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(%err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(%err, "failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("received Ctrl+C, shutting down");
        }
        () = terminate => {
            info!("received SIGTERM, shutting down");
        }
    }
}
