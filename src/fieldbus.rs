//! ==============================================================================
//! fieldbus.rs - field bus connection that survives PLC outages
//! ==============================================================================
//!
//! two states, DISCONNECTED and CONNECTED:
//!
//!     write while DISCONNECTED -> try open
//!         open fails    -> Dropped(reason), stay DISCONNECTED
//!         open succeeds -> CONNECTED, log "reconnected", write
//!     write while CONNECTED    -> write
//!         write fails   -> close, DISCONNECTED, return the error
//!
//! every write doubles as a reconnect probe, so an unreachable PLC costs one
//! failed dial per tick and nothing else.
//!
//! ==============================================================================

use tokio::sync::Mutex;

use crate::hal::{BusError, FieldBusLink};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// bus unreachable, the write was skipped
    Dropped(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connected,
}

struct Inner<L> {
    link: L,
    state: LinkState,
}

/// Shared by the light and display ticks; one write at a time.
pub struct ResilientBus<L> {
    inner: Mutex<Inner<L>>,
}

impl<L: FieldBusLink> ResilientBus<L> {
    /// Open once. An unreachable bus is logged and left for the first write
    /// to retry.
    pub async fn connect(mut link: L, name: &str) -> Self {
        let state = match link.open().await {
            Ok(()) => {
                tracing::info!("connected to {}", name);
                LinkState::Connected
            }
            Err(e) => {
                tracing::warn!("could not reach {}: {}", name, e);
                LinkState::Disconnected
            }
        };
        Self {
            inner: Mutex::new(Inner { link, state }),
        }
    }

    pub async fn state(&self) -> LinkState {
        self.inner.lock().await.state
    }

    pub async fn write_coils(&self, address: u16, values: &[bool]) -> Result<WriteOutcome, BusError> {
        let mut inner = self.inner.lock().await;
        if let Some(dropped) = inner.ensure_open().await {
            return Ok(dropped);
        }
        let result = inner.link.write_coils(address, values).await;
        inner.settle(result).await
    }

    pub async fn write_bytes(&self, address: u16, data: &[u8]) -> Result<WriteOutcome, BusError> {
        let mut inner = self.inner.lock().await;
        if let Some(dropped) = inner.ensure_open().await {
            return Ok(dropped);
        }
        let result = inner.link.write_bytes(address, data).await;
        inner.settle(result).await
    }

    /// No-op when already disconnected.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state == LinkState::Connected {
            inner.link.close().await;
            inner.state = LinkState::Disconnected;
        }
    }
}

impl<L: FieldBusLink> Inner<L> {
    async fn ensure_open(&mut self) -> Option<WriteOutcome> {
        if self.state == LinkState::Connected {
            return None;
        }
        match self.link.open().await {
            Ok(()) => {
                self.state = LinkState::Connected;
                tracing::info!("reconnected to field bus");
                None
            }
            Err(e) => Some(WriteOutcome::Dropped(e.to_string())),
        }
    }

    async fn settle(&mut self, result: Result<(), BusError>) -> Result<WriteOutcome, BusError> {
        match result {
            Ok(()) => Ok(WriteOutcome::Written),
            Err(e) => {
                self.link.close().await;
                self.state = LinkState::Disconnected;
                Err(e)
            }
        }
    }
}
