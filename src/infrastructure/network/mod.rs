//! Network Operations
//!
//! Wi-Fi scan and connect, backed by external command-line tools. These
//! calls are slow and blocking; callers run them on the blocking pool.
//!
//! - [`scanner`] - parsing of scan tool output
//! - [`system`] - [`NetworkBackend`] implementation that shells out

pub mod scanner;
pub mod system;

use crate::domain::errors::NetworkError;
use crate::domain::models::ScanResult;

pub use system::SystemNetwork;

/// Scan/connect facility used by the peripheral.
pub trait NetworkBackend: Send + Sync + 'static {
    /// Scan for networks. The result is deduplicated by ESSID.
    fn scan(&self) -> Result<ScanResult, NetworkError>;

    /// Join a network. On success returns a human-readable detail line.
    fn connect(&self, ssid: &str, password: &str) -> Result<String, NetworkError>;
}
