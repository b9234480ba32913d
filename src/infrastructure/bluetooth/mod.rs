//! Bluetooth Module
//!
//! BLE GATT peripheral exposing the Wi-Fi provisioning service.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    BluetoothService                       │
//! │   (event loop - one event at a time into the peripheral)  │
//! └─────────────────────┬────────────────────────────────────┘
//!                       │
//!         ┌─────────────┼──────────────┬──────────────┐
//!         │             │              │              │
//!         ▼             ▼              ▼              ▼
//! ┌─────────────┐ ┌────────────┐ ┌──────────────┐ ┌──────────┐
//! │ Advertising │ │ Peripheral │ │ Notification │ │ Protocol │
//! │             │ │            │ │              │ │          │
//! │ - adapter   │ │ - commands │ │ - subscriber │ │ - UUIDs  │
//! │ - register  │ │ - dispatch │ │ - delivery   │ │ - decode │
//! │ - re-adv    │ │ - results  │ │              │ │ - JSON   │
//! └──────┬──────┘ └────────────┘ └──────────────┘ └──────────┘
//!        │
//!        ▼
//! ┌─────────────┐
//! │    BlueZ    │
//! │  (bluer)    │
//! └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - service UUIDs, command decoding and status payloads
//! - [`notification`] - status characteristic subscriber and delivery
//! - [`peripheral`] - the GATT state machine
//! - [`advertising`] - adapter selection, registration and re-advertising
//! - [`bluez`] - `bluetoothd` implementation of the platform stack
//! - [`service`] - event loop

pub mod advertising;
pub mod bluez;
pub mod notification;
pub mod peripheral;
pub mod protocol;
pub mod service;

pub use advertising::AdvertisingManager;
pub use bluez::BluezStack;
pub use peripheral::{GattPeripheral, PeripheralContext};
pub use service::BluetoothService;
