//! ==============================================================================
//! output.rs - light and display tick drivers
//! ==============================================================================
//!
//! two independent timers read the same FurnaceLastResult:
//!
//!     LightDriver::tick    - fresh/stale per furnace -> one coil block write
//!     DisplayDriver::tick  - "HH:MM" / "HH MM" per furnace -> one frame block
//!
//! the state read lock is held only while copying the snapshot out; panel
//! writes happen after it is released.
//!
//! ==============================================================================

use std::sync::Arc;
use std::time::Duration;

use crate::config::FurnaceConfig;
use crate::fieldbus::WriteOutcome;
use crate::frame::DisplayMessage;
use crate::panel::IndicatorPanel;
use crate::staleness::{self, Signal};
use crate::state::FurnaceLastResult;

pub struct LightDriver {
    furnaces: Arc<Vec<FurnaceConfig>>,
    max_age: Duration,
    state: Arc<FurnaceLastResult>,
    panel: Arc<dyn IndicatorPanel>,
}

impl LightDriver {
    pub fn new(
        furnaces: Arc<Vec<FurnaceConfig>>,
        max_age: Duration,
        state: Arc<FurnaceLastResult>,
        panel: Arc<dyn IndicatorPanel>,
    ) -> Self {
        Self { furnaces, max_age, state, panel }
    }

    pub async fn tick(&self) {
        let snapshot = self.state.snapshot(&self.furnaces).await;
        if snapshot.iter().all(Option::is_none) {
            return;
        }

        let signals: Vec<Option<Signal>> = snapshot
            .iter()
            .map(|e| e.map(|elapsed| staleness::evaluate(elapsed, self.max_age).signal))
            .collect();

        match self.panel.show_lights(&signals).await {
            Ok(WriteOutcome::Written) => {}
            Ok(WriteOutcome::Dropped(reason)) => tracing::debug!("light update dropped: {}", reason),
            Err(e) => tracing::warn!("failed to set output coils for lights: {:#}", e),
        }
    }
}

pub struct DisplayDriver {
    furnaces: Arc<Vec<FurnaceConfig>>,
    max_age: Duration,
    state: Arc<FurnaceLastResult>,
    panel: Arc<dyn IndicatorPanel>,
    colon: bool,
    nonces: Vec<u8>,
}

impl DisplayDriver {
    pub fn new(
        furnaces: Arc<Vec<FurnaceConfig>>,
        max_age: Duration,
        state: Arc<FurnaceLastResult>,
        panel: Arc<dyn IndicatorPanel>,
    ) -> Self {
        let nonces = vec![0; furnaces.len()];
        Self { furnaces, max_age, state, panel, colon: true, nonces }
    }

    /// Build this tick's messages and advance the nonces of the furnaces that got one.
    pub async fn next_messages(&mut self) -> Vec<Option<DisplayMessage>> {
        let snapshot = self.state.snapshot(&self.furnaces).await;
        let colon = self.colon;
        self.colon = !colon;

        let mut slots = Vec::with_capacity(snapshot.len());
        for (i, (f, elapsed)) in self.furnaces.iter().zip(snapshot).enumerate() {
            let Some(elapsed) = elapsed else {
                slots.push(None);
                continue;
            };
            let shown = staleness::evaluate(elapsed, self.max_age).shown;
            slots.push(Some(DisplayMessage {
                address: f.display_board_address,
                nonce: self.nonces[i],
                text: staleness::format_elapsed(shown, colon),
            }));
            self.nonces[i] = self.nonces[i].wrapping_add(1);
        }
        slots
    }

    pub async fn tick(&mut self) {
        let slots = self.next_messages().await;
        if slots.iter().all(Option::is_none) {
            return;
        }

        match self.panel.show_displays(&slots).await {
            Ok(WriteOutcome::Written) => {}
            Ok(WriteOutcome::Dropped(reason)) => tracing::debug!("display update dropped: {}", reason),
            Err(e) => tracing::warn!("failed to write display output data: {:#}", e),
        }
    }
}
