//! ==============================================================================
//! main.rs - spectrometer furnace monitor entry point
//! ==============================================================================
//!
//! purpose:
//!     collects chemistry results from the spectrometer result sources, stores
//!     each one exactly once, and shows per furnace how long ago it was last
//!     tested: green/red lights and "HH:MM" display boards on the shop floor.
//!
//! responsibilities:
//!     - load configuration (first cli argument, else config/monitor.toml)
//!     - set up logging
//!     - run the duty cycles until ctrl-c / SIGTERM
//!
//! relationships:
//!     - uses: config.rs, logging.rs, service.rs (everything else hangs off it)
//!
//! architecture:
//!
//!     ┌─────────────────────────────────────────────────────────────┐
//!     │                      monitor process                         │
//!     │  ┌────────────┐ ┌───────────┐ ┌────────────┐ ┌───────────┐  │
//!     │  │ poll loop  │ │ time sync │ │ light tick │ │ disp tick │  │
//!     │  │ (25s)      │ │ (300s)    │ │ (5s)       │ │ (1s)      │  │
//!     │  └─────┬──────┘ └───────────┘ └─────┬──────┘ └─────┬─────┘  │
//!     │        │                            │              │        │
//!     │   ┌────┴─────┐   ┌──────────┐    ┌──┴──────────────┴──┐     │
//!     │   │  store   │◄──│ read api │    │   indicator panel  │     │
//!     │   │ (sqlite) │   │ (axum)   │    │ (modbus or serial) │     │
//!     │   └──────────┘   └──────────┘    └────────────────────┘     │
//!     └─────────────────────────────────────────────────────────────┘
//!
//! ==============================================================================

mod api;
mod config;
mod domain;
mod fieldbus;
mod frame;
mod hal;
mod ingest;
mod logging;
mod modbus;
mod output;
mod panel;
mod poller;
mod service;
mod staleness;
mod state;
mod store;
mod timesync;

use anyhow::Result;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    // step 1: load configuration
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = config::MonitorConfig::load_or_default(config_path.as_deref())?;

    // step 2: logging (the guard flushes the log file on exit)
    let _log_guard = logging::init(&config.logging)?;

    tracing::info!("===========================================================");
    tracing::info!("  Spectro Furnace Monitor v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("===========================================================");
    config.print_summary();

    // step 3: shutdown signal
    let token = CancellationToken::new();
    tokio::spawn(watch_signals(token.clone()));

    // step 4: run until cancelled
    service::run(config, token).await
}

async fn watch_signals(token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("cannot listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    tracing::info!("shutdown requested");
    token.cancel();
}
