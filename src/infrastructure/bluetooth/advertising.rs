//! Advertising & Registration Manager
//!
//! Picks a usable adapter, registers the GATT application and the
//! advertisement, then keeps the advertisement alive for the lifetime of
//! the process.

use crate::domain::errors::RegistrationError;
use crate::domain::models::RegistrationEvent;
use crate::domain::settings::BleSettings;
use crate::infrastructure::bluetooth::peripheral::{PeripheralContext, PeripheralEvent};
use crate::infrastructure::bluetooth::protocol::ServiceDescriptor;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What an adapter can do for us
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AdapterCapabilities {
    pub gatt_manager: bool,
    pub advertising_manager: bool,
}

impl AdapterCapabilities {
    pub fn usable(&self) -> bool {
        self.gatt_manager && self.advertising_manager
    }
}

/// The parts of the platform Bluetooth stack the manager depends on.
pub trait PlatformStack: Send + Sync + 'static {
    type Adapter: Clone + Send + Sync + 'static;
    /// Keeps the GATT application registered while alive
    type Application: Send + 'static;
    /// Keeps the advertisement registered while alive
    type Advertisement: Send + 'static;

    fn adapters(
        &self,
    ) -> impl Future<Output = Result<Vec<Self::Adapter>, RegistrationError>> + Send;

    fn adapter_name(&self, adapter: &Self::Adapter) -> String;

    fn capabilities(
        &self,
        adapter: &Self::Adapter,
    ) -> impl Future<Output = AdapterCapabilities> + Send;

    fn power_on(
        &self,
        adapter: &Self::Adapter,
    ) -> impl Future<Output = Result<(), RegistrationError>> + Send;

    /// Register the service and its characteristics. Platform callbacks
    /// are posted to `context.events`.
    fn register_application(
        &self,
        adapter: &Self::Adapter,
        context: &PeripheralContext,
    ) -> impl Future<Output = Result<Self::Application, RegistrationError>> + Send;

    fn advertise(
        &self,
        adapter: &Self::Adapter,
        descriptor: &ServiceDescriptor,
    ) -> impl Future<Output = Result<Self::Advertisement, RegistrationError>> + Send;

    /// Whether our advertisement is still registered with the adapter.
    fn is_advertising(&self, adapter: &Self::Adapter) -> impl Future<Output = bool> + Send;
}

/// Live registration. Dropping it unregisters the application and stops
/// the re-advertising supervisor.
pub struct Registration<S: PlatformStack> {
    adapter_name: String,
    _application: S::Application,
    supervisor: JoinHandle<()>,
}

impl<S: PlatformStack> Registration<S> {
    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }
}

impl<S: PlatformStack> Drop for Registration<S> {
    fn drop(&mut self) {
        self.supervisor.abort();
    }
}

pub struct AdvertisingManager<S: PlatformStack> {
    stack: Arc<S>,
    settings: BleSettings,
}

impl<S: PlatformStack> AdvertisingManager<S> {
    pub fn new(stack: S, settings: BleSettings) -> Self {
        Self {
            stack: Arc::new(stack),
            settings,
        }
    }

    /// Register the GATT application and advertisement.
    ///
    /// Every failure here is fatal and returned to the caller; nothing is
    /// retried.
    pub async fn start(
        &self,
        context: &PeripheralContext,
    ) -> Result<Registration<S>, RegistrationError> {
        let adapter = self.select_adapter().await?;
        let adapter_name = self.stack.adapter_name(&adapter);
        info!("Using Bluetooth adapter: {}", adapter_name);

        context.post(PeripheralEvent::Registration(RegistrationEvent::Registering));

        let result = self.register(&adapter, context).await;
        let (application, advertisement) = match result {
            Ok(handles) => handles,
            Err(e) => {
                context.post(PeripheralEvent::Registration(RegistrationEvent::Failed(
                    e.to_string(),
                )));
                return Err(e);
            }
        };

        let supervisor = tokio::spawn(supervise_advertising(
            self.stack.clone(),
            adapter,
            context.clone(),
            advertisement,
            Duration::from_millis(self.settings.readvertise_interval_ms.max(1)),
        ));

        Ok(Registration {
            adapter_name,
            _application: application,
            supervisor,
        })
    }

    async fn register(
        &self,
        adapter: &S::Adapter,
        context: &PeripheralContext,
    ) -> Result<(S::Application, S::Advertisement), RegistrationError> {
        self.stack.power_on(adapter).await?;

        if self.settings.registration_settle_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.settings.registration_settle_ms)).await;
        }

        info!("Registering GATT application...");
        let application = self.stack.register_application(adapter, context).await?;
        info!("GATT application registered");
        context.post(PeripheralEvent::Registration(
            RegistrationEvent::ApplicationRegistered,
        ));

        info!("Registering advertisement...");
        let advertisement = self.stack.advertise(adapter, &context.descriptor).await?;
        info!(
            "Advertising as {:?} with service {}",
            context.descriptor.device_name, context.descriptor.service_uuid
        );
        context.post(PeripheralEvent::Registration(
            RegistrationEvent::AdvertisingStarted,
        ));

        Ok((application, advertisement))
    }

    /// First adapter (matching the configured name, if any) that exposes
    /// both the GATT manager and the advertising manager.
    async fn select_adapter(&self) -> Result<S::Adapter, RegistrationError> {
        let adapters = self.stack.adapters().await?;
        debug!("Found {} Bluetooth adapters", adapters.len());

        for adapter in adapters {
            let name = self.stack.adapter_name(&adapter);
            if let Some(wanted) = &self.settings.adapter {
                if &name != wanted {
                    debug!("Skipping adapter {} (configured: {})", name, wanted);
                    continue;
                }
            }

            let caps = self.stack.capabilities(&adapter).await;
            if caps.usable() {
                return Ok(adapter);
            }
            debug!("Adapter {} is not usable: {:?}", name, caps);
        }

        Err(RegistrationError::NoAdapter)
    }
}

/// Re-register the advertisement whenever the stack releases it, e.g.
/// after a client connects or the platform times it out.
async fn supervise_advertising<S: PlatformStack>(
    stack: Arc<S>,
    adapter: S::Adapter,
    context: PeripheralContext,
    advertisement: S::Advertisement,
    interval: Duration,
) {
    let mut current = Some(advertisement);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // first tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if context.events.is_closed() {
            debug!("Event loop gone, stopping advertising supervisor");
            break;
        }

        if current.is_some() && stack.is_advertising(&adapter).await {
            continue;
        }

        if current.take().is_some() {
            warn!("Advertisement released, re-registering");
            context.post(PeripheralEvent::Registration(
                RegistrationEvent::AdvertisementReleased,
            ));
        }

        match stack.advertise(&adapter, &context.descriptor).await {
            Ok(handle) => {
                info!("Advertisement re-registered");
                current = Some(handle);
                context.post(PeripheralEvent::Registration(
                    RegistrationEvent::AdvertisingStarted,
                ));
            }
            Err(e) => warn!("Re-advertising failed, will retry: {}", e),
        }
    }
}
