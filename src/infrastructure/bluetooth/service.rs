//! Bluetooth Service Module
//!
//! Single-threaded event loop that feeds platform callbacks and worker
//! completions to the [`GattPeripheral`] one at a time.

use crate::infrastructure::bluetooth::peripheral::{GattPeripheral, PeripheralEvent};
use crate::infrastructure::network::NetworkBackend;
use std::future::Future;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Main service owning the peripheral and its event queue
pub struct BluetoothService<N: NetworkBackend> {
    peripheral: GattPeripheral<N>,
    events: mpsc::UnboundedReceiver<PeripheralEvent>,
}

impl<N: NetworkBackend> BluetoothService<N> {
    pub fn new(
        peripheral: GattPeripheral<N>,
        events: mpsc::UnboundedReceiver<PeripheralEvent>,
    ) -> Self {
        Self { peripheral, events }
    }

    #[cfg(test)]
    pub fn peripheral(&self) -> &GattPeripheral<N> {
        &self.peripheral
    }

    /// Run until `shutdown` resolves or every event sender is gone.
    pub async fn run<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!("Event loop running");

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, leaving event loop");
                    break;
                }
                event = self.events.recv() => match event {
                    Some(event) => self.peripheral.handle_event(event),
                    None => {
                        debug!("All event senders dropped");
                        break;
                    }
                },
            }
        }

        info!(
            "Event loop stopped in state {:?}, subscription {:?}",
            self.peripheral.state(),
            self.peripheral.subscription()
        );
        if self.peripheral.in_flight() > 0 {
            info!(
                "Abandoning {} in-flight network operations",
                self.peripheral.in_flight()
            );
        }
    }
}
