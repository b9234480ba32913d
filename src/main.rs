mod domain;
mod infrastructure;

use anyhow::Context;
use domain::settings::{Settings, SettingsService};
use infrastructure::bluetooth::protocol::ServiceDescriptor;
use infrastructure::bluetooth::{
    AdvertisingManager, BluetoothService, BluezStack, GattPeripheral, PeripheralContext,
};
use infrastructure::logging;
use infrastructure::network::SystemNetwork;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

fn main() -> anyhow::Result<()> {
    let settings_service = SettingsService::new()?;

    // Keep the guard alive for the whole process so file logs flush
    let _logging_guard = logging::init_logger(&settings_service.get().log_settings)?;

    info!("Starting RaspiBLE provisioning peripheral");
    info!("Settings: {}", settings_service.path().display());

    if !settings_service.path().exists() {
        match settings_service.save() {
            Ok(()) => info!("Wrote default settings"),
            Err(e) => warn!("Could not write default settings: {}", e),
        }
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    let result = runtime.block_on(run(settings_service.get().clone()));
    if let Err(e) = &result {
        error!("Fatal: {:#}", e);
    }
    result
}

async fn run(settings: Settings) -> anyhow::Result<()> {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let descriptor = ServiceDescriptor::with_device_name(&settings.ble.device_name);
    let context = PeripheralContext::new(descriptor, event_tx);

    let stack = BluezStack::new().await?;
    let manager = AdvertisingManager::new(stack, settings.ble.clone());
    let registration = manager
        .start(&context)
        .await
        .context("Bluetooth registration failed")?;
    info!(
        "Peripheral ready on {} as {:?}",
        registration.adapter_name(),
        context.descriptor.device_name
    );

    let network = Arc::new(SystemNetwork::new(settings.network.clone()));
    let peripheral = GattPeripheral::new(context, network);
    let mut service = BluetoothService::new(peripheral, event_rx);

    service.run(shutdown_signal()).await;

    // Unregisters the advertisement and GATT application
    drop(registration);
    info!("RaspiBLE stopped");
    Ok(())
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
