//! ==============================================================================
//! panel.rs - indicator panels
//! ==============================================================================
//!
//! the output driver hands a panel one signal per furnace (lights) or one
//! message per furnace (displays); the panel turns that into bus traffic.
//!
//!     FieldBusPanel   - whole coil block + whole 16 byte/slot display block,
//!                       one write each, through the resilient modbus link
//!     StandalonePanel - serial frames per display board, i2c light cards
//!                       with a cached output byte per card
//!
//! ==============================================================================

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::config::FurnaceConfig;
use crate::fieldbus::{ResilientBus, WriteOutcome};
use crate::frame::{self, DisplayMessage};
use crate::hal::{ByteStream, FieldBusLink, RegisterBus};
use crate::staleness::{self, Signal};

#[async_trait]
pub trait IndicatorPanel: Send + Sync {
    /// `signals[i]` belongs to furnace `i`; `None` means no result yet.
    async fn show_lights(&self, signals: &[Option<Signal>]) -> Result<WriteOutcome>;
    /// `slots[i]` belongs to furnace `i`; `None` leaves that board alone.
    async fn show_displays(&self, slots: &[Option<DisplayMessage>]) -> Result<WriteOutcome>;
    async fn close(&self);
}

// ==============================================================================
// field bus variant
// ==============================================================================

pub struct FieldBusPanel<L> {
    bus: ResilientBus<L>,
    lights_address: u16,
    displays_address: u16,
}

impl<L: FieldBusLink> FieldBusPanel<L> {
    pub fn new(bus: ResilientBus<L>, lights_address: u16, displays_address: u16) -> Self {
        Self { bus, lights_address, displays_address }
    }
}

#[async_trait]
impl<L: FieldBusLink + 'static> IndicatorPanel for FieldBusPanel<L> {
    async fn show_lights(&self, signals: &[Option<Signal>]) -> Result<WriteOutcome> {
        let coils = staleness::coil_block(signals);
        Ok(self.bus.write_coils(self.lights_address, &coils).await?)
    }

    async fn show_displays(&self, slots: &[Option<DisplayMessage>]) -> Result<WriteOutcome> {
        let block = frame::encode_slots(slots);
        tracing::debug!(display_block = %hex::encode(&block), "display frames");
        Ok(self.bus.write_bytes(self.displays_address, &block).await?)
    }

    async fn close(&self) {
        self.bus.close().await;
    }
}

// ==============================================================================
// standalone variant
// ==============================================================================

/// i2c output cards; each light is one bit of a card's output register.
pub struct LightCards {
    bus: Box<dyn RegisterBus>,
    outputs: BTreeMap<u8, u8>,
}

const REG_DIRECTION: u8 = 0x00;
const REG_OUTPUT: u8 = 0x09;

impl LightCards {
    pub fn new(bus: Box<dyn RegisterBus>) -> Self {
        Self { bus, outputs: BTreeMap::new() }
    }

    pub fn output(&self, card: u8) -> u8 {
        self.outputs.get(&card).copied().unwrap_or(0)
    }

    /// Update the cached bits and push every touched card once.
    pub fn apply(&mut self, furnaces: &[FurnaceConfig], signals: &[Option<Signal>]) -> Result<()> {
        let mut touched = Vec::new();
        for (f, signal) in furnaces.iter().zip(signals) {
            let Some(signal) = signal else { continue };
            let (on, off) = match signal {
                Signal::Stale => (f.red_light_address, f.green_light_address),
                Signal::Fresh => (f.green_light_address, f.red_light_address),
            };
            let bits = self.outputs.entry(f.light_card_address).or_insert(0);
            *bits = (*bits | on) & !off;
            if !touched.contains(&f.light_card_address) {
                touched.push(f.light_card_address);
            }
        }

        for card in touched {
            self.bus.write_register(card, REG_DIRECTION, 0)?;
            self.bus.write_register(card, REG_OUTPUT, self.output(card))?;
        }
        Ok(())
    }
}

pub struct StandalonePanel {
    furnaces: Vec<FurnaceConfig>,
    serial: Arc<Mutex<Box<dyn ByteStream>>>,
    cards: Arc<Mutex<LightCards>>,
}

impl StandalonePanel {
    pub fn new(furnaces: Vec<FurnaceConfig>, serial: Box<dyn ByteStream>, cards: LightCards) -> Self {
        Self {
            furnaces,
            serial: Arc::new(Mutex::new(serial)),
            cards: Arc::new(Mutex::new(cards)),
        }
    }
}

#[async_trait]
impl IndicatorPanel for StandalonePanel {
    async fn show_lights(&self, signals: &[Option<Signal>]) -> Result<WriteOutcome> {
        let cards = self.cards.clone();
        let furnaces = self.furnaces.clone();
        let signals = signals.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut cards = cards.lock().map_err(|_| anyhow::anyhow!("light card lock poisoned"))?;
            cards.apply(&furnaces, &signals)
        })
        .await??;
        Ok(WriteOutcome::Written)
    }

    async fn show_displays(&self, slots: &[Option<DisplayMessage>]) -> Result<WriteOutcome> {
        let frames: Vec<Vec<u8>> = slots
            .iter()
            .flatten()
            .map(|m| frame::encode_serial_frame(m.address, m.text.as_bytes()))
            .collect();
        let serial = self.serial.clone();
        tokio::task::spawn_blocking(move || {
            let mut port = serial.lock().map_err(|_| anyhow::anyhow!("serial lock poisoned"))?;
            let mut first_err = None;
            for f in &frames {
                if let Err(e) = port.write_all(f) {
                    tracing::warn!("error writing to display board: {:#}", e);
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
            first_err.map_or(Ok(()), Err)
        })
        .await??;
        Ok(WriteOutcome::Written)
    }

    async fn close(&self) {}
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::fieldbus::tests::ScriptedLink;

    #[derive(Clone, Default)]
    pub(crate) struct RecordingBus {
        pub writes: Arc<Mutex<Vec<(u8, u8, u8)>>>,
    }

    impl RegisterBus for RecordingBus {
        fn write_register(&mut self, slave: u8, register: u8, value: u8) -> Result<()> {
            self.writes.lock().unwrap().push((slave, register, value));
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    pub(crate) struct RecordingSerial {
        pub frames: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl ByteStream for RecordingSerial {
        fn write_all(&mut self, data: &[u8]) -> Result<()> {
            self.frames.lock().unwrap().push(data.to_vec());
            Ok(())
        }
    }

    fn furnace(name: &str, card: u8, green: u8, red: u8, board: u8) -> FurnaceConfig {
        FurnaceConfig {
            name: name.into(),
            display_board_address: board,
            light_card_address: card,
            green_light_address: green,
            red_light_address: red,
        }
    }

    #[test]
    fn test_light_cards_share_one_output_byte() {
        let bus = RecordingBus::default();
        let mut cards = LightCards::new(Box::new(bus.clone()));
        let furnaces = vec![furnace("F1", 0x20, 0x01, 0x02, 1), furnace("F2", 0x20, 0x04, 0x08, 2)];

        cards.apply(&furnaces, &[Some(Signal::Fresh), Some(Signal::Stale)]).unwrap();
        assert_eq!(cards.output(0x20), 0x01 | 0x08);
        // one card touched: direction + output
        assert_eq!(
            *bus.writes.lock().unwrap(),
            vec![(0x20, REG_DIRECTION, 0), (0x20, REG_OUTPUT, 0x09)]
        );

        cards.apply(&furnaces, &[Some(Signal::Stale), None]).unwrap();
        assert_eq!(cards.output(0x20), 0x02 | 0x08);
    }

    #[test]
    fn test_shipped_config_lights_own_lamps() {
        let config: crate::config::MonitorConfig =
            toml::from_str(include_str!("../config/monitor.toml")).unwrap();
        let bus = RecordingBus::default();
        let mut cards = LightCards::new(Box::new(bus.clone()));

        cards.apply(&config.furnaces, &[Some(Signal::Fresh), Some(Signal::Stale)]).unwrap();
        // furnace 1 green, furnace 2 red, nothing else
        assert_eq!(cards.output(0x20), 0x01 | 0x08);

        cards.apply(&config.furnaces, &[Some(Signal::Stale), Some(Signal::Fresh)]).unwrap();
        assert_eq!(cards.output(0x20), 0x02 | 0x04);
    }

    #[test]
    fn test_light_cards_skip_unseen() {
        let bus = RecordingBus::default();
        let mut cards = LightCards::new(Box::new(bus.clone()));
        cards.apply(&[furnace("F1", 0x21, 1, 2, 1)], &[None]).unwrap();
        assert!(bus.writes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_standalone_displays_one_frame_per_board() {
        let serial = RecordingSerial::default();
        let panel = StandalonePanel::new(
            vec![furnace("F1", 0, 0, 0, 7), furnace("F2", 0, 0, 0, 8)],
            Box::new(serial.clone()),
            LightCards::new(Box::new(RecordingBus::default())),
        );

        let slots = vec![None, Some(DisplayMessage { address: 8, nonce: 3, text: "00:42".into() })];
        assert_eq!(panel.show_displays(&slots).await.unwrap(), WriteOutcome::Written);

        let frames = serial.frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], frame::encode_serial_frame(8, b"00:42"));
    }

    #[tokio::test]
    async fn test_fieldbus_panel_single_block_writes() {
        let link = ScriptedLink::new(&[true], &[]);
        let bus = ResilientBus::connect(link.clone(), "plc").await;
        let panel = FieldBusPanel::new(bus, 100, 200);

        panel.show_lights(&[Some(Signal::Stale), Some(Signal::Fresh)]).await.unwrap();
        let slots = vec![Some(DisplayMessage { address: 1, nonce: 0, text: "01:00".into() }), None];
        panel.show_displays(&slots).await.unwrap();

        let coils = link.coils.lock().unwrap();
        assert_eq!(*coils, vec![(100, vec![true, false, false, true])]);
        let bytes = link.bytes.lock().unwrap();
        assert_eq!(bytes.len(), 1);
        assert_eq!(bytes[0].0, 200);
        assert_eq!(bytes[0].1.len(), 32);
    }
}
