//! ==============================================================================
//! service.rs - task wiring
//! ==============================================================================
//!
//! builds the shared pieces from config and runs one task per duty cycle:
//!
//!     ┌──────────────┐   batch    ┌───────────────────┐
//!     │ poll loop    │ ─────────> │ FurnaceLastResult │ <── light tick
//!     │ (sources)    │            └───────────────────┘ <── display tick
//!     └──────┬───────┘                                        │
//!            │ ingest                                         ▼
//!     ┌──────┴───────┐  reads  ┌──────────┐          ┌──────────────┐
//!     │ Store        │ <────── │ read api │          │ panel        │
//!     └──────────────┘         └──────────┘          └──────────────┘
//!
//!     time sync runs on its own timer, independent of all of the above.
//!
//! every loop watches the same CancellationToken and stops at its next
//! wake-up; the panel is closed once they have all returned.
//!
//! ==============================================================================

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::api;
use crate::config::{FurnaceConfig, MonitorConfig, OutputMode, StoreConfig, TimeSyncConfig};
use crate::fieldbus::ResilientBus;
use crate::hal;
use crate::modbus::ModbusLink;
use crate::output::{DisplayDriver, LightDriver};
use crate::panel::{FieldBusPanel, IndicatorPanel, LightCards, StandalonePanel};
use crate::poller::Poller;
use crate::state::FurnaceLastResult;
use crate::store::{Store, StoreError};
use crate::timesync::TimeSync;

/// Run until `token` is cancelled.
pub async fn run(config: MonitorConfig, token: CancellationToken) -> Result<()> {
    config.validate()?;
    let furnaces = Arc::new(config.furnaces.clone());
    let state = Arc::new(FurnaceLastResult::new());
    let max_age = config.staleness.max_age();

    let poller = Poller::new(config.sources.clone(), &furnaces, config.polling.timeout())?;

    let store = match &config.store {
        Some(store_config) => match open_store(store_config, &token).await {
            Some(store) => Some(store),
            // cancelled while still retrying
            None => return Ok(()),
        },
        None => None,
    };

    let panel = build_panel(&config, &furnaces).await?;

    let mut tasks = JoinSet::new();

    // poll loop
    {
        let token = token.clone();
        let furnaces = furnaces.clone();
        let state = state.clone();
        let store = store.clone();
        let mut ticker = ticker(config.polling.interval());
        tasks.spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => poll_cycle(&poller, &furnaces, &state, store.as_ref()).await,
                }
            }
        });
    }

    // time sync
    match time_sync_job(&config.time_sync, config.polling.timeout())? {
        Some((sync, period)) => {
            let token = token.clone();
            let mut ticker = ticker(period);
            tasks.spawn(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => match sync.sync().await {
                            Ok(t) => tracing::info!("clock set to {}", t),
                            Err(e) => tracing::warn!("time sync failed: {}", e),
                        },
                    }
                }
            });
        }
        None => tracing::info!("time sync disabled"),
    }

    // outputs
    if let Some(panel) = &panel {
        let lights = LightDriver::new(furnaces.clone(), max_age, state.clone(), panel.clone());
        let token_lights = token.clone();
        let mut lights_ticker = ticker(Duration::from_secs(config.lights.update_interval_seconds.max(1)));
        tasks.spawn(async move {
            loop {
                tokio::select! {
                    _ = token_lights.cancelled() => break,
                    _ = lights_ticker.tick() => lights.tick().await,
                }
            }
        });

        let mut displays = DisplayDriver::new(furnaces.clone(), max_age, state.clone(), panel.clone());
        let token_displays = token.clone();
        let mut displays_ticker = ticker(Duration::from_secs(config.display.update_interval_seconds.max(1)));
        tasks.spawn(async move {
            loop {
                tokio::select! {
                    _ = token_displays.cancelled() => break,
                    _ = displays_ticker.tick() => displays.tick().await,
                }
            }
        });
    }

    // read api
    match (&store, config.api.enabled) {
        (Some(store), true) => {
            let state = api::ApiState::new(
                store.clone(),
                config.api.results_limit,
                Duration::from_secs(config.api.cache_ttl_seconds),
            );
            let app = api::router(state, config.api.website_dir.clone());
            let port = config.api.port;
            let token = token.clone();
            tasks.spawn(async move {
                if let Err(e) = api::serve(port, app, token).await {
                    tracing::error!("read api stopped: {:#}", e);
                }
            });
        }
        (None, true) => tracing::warn!("read api enabled but no [store] configured, not serving"),
        _ => {}
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            tracing::error!("task failed: {}", e);
        }
    }

    if let Some(panel) = panel {
        panel.close().await;
    }
    tracing::info!("all loops stopped");
    Ok(())
}

/// First tick fires immediately; a slow cycle pushes the next one back
/// instead of bunching ticks up.
fn ticker(period: Duration) -> Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn poll_cycle(
    poller: &Poller,
    furnaces: &[FurnaceConfig],
    state: &FurnaceLastResult,
    store: Option<&Store>,
) {
    let Some(batch) = poller.poll().await else {
        tracing::warn!("no result source answered, skipping cycle");
        return;
    };

    let updated = state.record(furnaces, &batch, Utc::now()).await;
    tracing::debug!(results = batch.len(), furnaces_updated = updated, "poll cycle");

    if let Some(store) = store {
        match store.ingest(batch).await {
            Ok(report) if report.inserted > 0 => {
                tracing::info!(inserted = report.inserted, skipped = report.skipped, "stored results")
            }
            Ok(_) => {}
            Err(e) => tracing::error!("failed to store results: {}", e),
        }
    }
}

/// `None` when time sync is off: no url, or a zero interval.
fn time_sync_job(config: &TimeSyncConfig, timeout: Duration) -> Result<Option<(TimeSync, Duration)>> {
    match (&config.url, config.interval_seconds) {
        (Some(url), secs) if secs > 0 => {
            Ok(Some((TimeSync::new(url.clone(), timeout)?, Duration::from_secs(secs))))
        }
        _ => Ok(None),
    }
}

/// `None` when shutdown arrives before the store could be opened.
async fn open_store(config: &StoreConfig, token: &CancellationToken) -> Option<Store> {
    let timeout = Duration::from_secs(config.transaction_timeout_seconds);
    let retry = Duration::from_secs(config.retry_seconds.max(1));
    loop {
        let path = config.path.clone();
        let opened = tokio::task::spawn_blocking(move || Store::open(path, timeout))
            .await
            .unwrap_or_else(|e| Err(StoreError::Task(e.to_string())));
        match opened {
            Ok(store) => {
                match store.count().await {
                    Ok(rows) => tracing::info!("opened result store {} ({} results)", config.path.display(), rows),
                    Err(e) => tracing::warn!("opened result store {} but cannot count: {}", config.path.display(), e),
                }
                return Some(store);
            }
            Err(e) => tracing::warn!(
                "could not open result store {}: {}, retrying in {:?}",
                config.path.display(), e, retry
            ),
        }
        tokio::select! {
            _ = token.cancelled() => return None,
            _ = tokio::time::sleep(retry) => {}
        }
    }
}

async fn build_panel(
    config: &MonitorConfig,
    furnaces: &[FurnaceConfig],
) -> Result<Option<Arc<dyn IndicatorPanel>>> {
    match config.output.mode {
        OutputMode::None => Ok(None),
        OutputMode::FieldBus => {
            let fb = &config.fieldbus;
            let link = ModbusLink::new(&fb.url, fb.unit_id, Duration::from_secs(fb.timeout_seconds.max(1)))?;
            let bus = ResilientBus::connect(link, "field bus").await;
            let link_state = bus.state().await;
            tracing::info!(url = %fb.url, state = ?link_state, "field bus panel ready");
            let panel: Arc<dyn IndicatorPanel> =
                Arc::new(FieldBusPanel::new(bus, fb.lights_address, fb.displays_address));
            Ok(Some(panel))
        }
        OutputMode::Standalone => {
            let serial = hal::open_serial(&config.serial.port, config.serial.baud_rate)?;
            let cards = LightCards::new(hal::open_register_bus(config.serial.i2c_bus)?);
            let panel: Arc<dyn IndicatorPanel> =
                Arc::new(StandalonePanel::new(furnaces.to_vec(), serial, cards));
            Ok(Some(panel))
        }
    }
}
