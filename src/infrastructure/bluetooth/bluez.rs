//! BlueZ backend for the peripheral, via `bluer`.
//!
//! GATT callbacks never touch peripheral state directly; each one posts a
//! [`PeripheralEvent`] and, for reads, waits for the event loop's reply.

use crate::domain::errors::RegistrationError;
use crate::domain::models::{CharacteristicId, ClientHandle};
use crate::infrastructure::bluetooth::advertising::{AdapterCapabilities, PlatformStack};
use crate::infrastructure::bluetooth::notification::notify_queue;
use crate::infrastructure::bluetooth::peripheral::{PeripheralContext, PeripheralEvent};
use crate::infrastructure::bluetooth::protocol::ServiceDescriptor;
use bluer::adv::{Advertisement, AdvertisementHandle, Feature, Type};
use bluer::gatt::local::{
    Application, ApplicationHandle, Characteristic, CharacteristicNotifier,
    CharacteristicNotify, CharacteristicNotifyMethod, CharacteristicRead,
    CharacteristicReadRequest, CharacteristicWrite, CharacteristicWriteMethod,
    CharacteristicWriteRequest, ReqError, Service,
};
use bluer::{Adapter, Session};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

fn rejected(e: bluer::Error) -> RegistrationError {
    RegistrationError::RegistrationRejected {
        reason: e.to_string(),
    }
}

/// Connection to the system `bluetoothd` over D-Bus.
pub struct BluezStack {
    session: Session,
}

impl BluezStack {
    pub async fn new() -> Result<Self, RegistrationError> {
        let session = Session::new().await.map_err(rejected)?;
        info!("BlueZ session created");
        Ok(Self { session })
    }
}

impl PlatformStack for BluezStack {
    type Adapter = Adapter;
    type Application = ApplicationHandle;
    type Advertisement = AdvertisementHandle;

    async fn adapters(&self) -> Result<Vec<Adapter>, RegistrationError> {
        let names = self.session.adapter_names().await.map_err(rejected)?;
        let mut adapters = Vec::with_capacity(names.len());
        for name in names {
            match self.session.adapter(&name) {
                Ok(adapter) => adapters.push(adapter),
                Err(e) => warn!("Cannot open adapter {}: {}", name, e),
            }
        }
        Ok(adapters)
    }

    fn adapter_name(&self, adapter: &Adapter) -> String {
        adapter.name().to_string()
    }

    async fn capabilities(&self, adapter: &Adapter) -> AdapterCapabilities {
        let gatt_manager = adapter.is_powered().await.is_ok();
        let advertising_manager = match adapter.supported_advertising_instances().await {
            Ok(instances) => instances > 0,
            Err(e) => {
                debug!("{}: no advertising manager: {}", adapter.name(), e);
                false
            }
        };
        AdapterCapabilities {
            gatt_manager,
            advertising_manager,
        }
    }

    async fn power_on(&self, adapter: &Adapter) -> Result<(), RegistrationError> {
        if !adapter.is_powered().await.map_err(rejected)? {
            info!("Powering on Bluetooth adapter...");
            adapter.set_powered(true).await.map_err(rejected)?;
        }
        Ok(())
    }

    async fn register_application(
        &self,
        adapter: &Adapter,
        context: &PeripheralContext,
    ) -> Result<ApplicationHandle, RegistrationError> {
        let descriptor = &context.descriptor;
        for uuid in [descriptor.command_uuid, descriptor.status_uuid] {
            if let Some(id) = descriptor.characteristic(uuid) {
                debug!("Characteristic {} ({:?}): {:?}", uuid, id, id.properties());
            }
        }
        let service = Service {
            uuid: descriptor.service_uuid,
            primary: true,
            characteristics: vec![
                command_characteristic(descriptor, context.clone()),
                status_characteristic(descriptor, context.clone()),
            ],
            ..Default::default()
        };
        let app = Application {
            services: vec![service],
            ..Default::default()
        };

        adapter.serve_gatt_application(app).await.map_err(rejected)
    }

    async fn advertise(
        &self,
        adapter: &Adapter,
        descriptor: &ServiceDescriptor,
    ) -> Result<AdvertisementHandle, RegistrationError> {
        let adv = Advertisement {
            advertisement_type: Type::Peripheral,
            service_uuids: BTreeSet::from([descriptor.service_uuid]),
            local_name: Some(descriptor.device_name.clone()),
            discoverable: Some(true),
            system_includes: BTreeSet::from([Feature::TxPower]),
            ..Default::default()
        };
        adapter.advertise(adv).await.map_err(rejected)
    }

    /// BlueZ only reports how many advertisements are active on the adapter,
    /// not whose. This assumes the peripheral is the only advertiser there;
    /// another process advertising on the same adapter hides a release.
    async fn is_advertising(&self, adapter: &Adapter) -> bool {
        match adapter.active_advertising_instances().await {
            Ok(active) => active > 0,
            Err(e) => {
                warn!("Cannot query advertising state: {}", e);
                false
            }
        }
    }
}

/// Command characteristic, registered with [`CharacteristicId::Command`]'s
/// properties.
fn command_characteristic(
    descriptor: &ServiceDescriptor,
    context: PeripheralContext,
) -> Characteristic {
    let props = CharacteristicId::Command.properties();
    let read_ctx = context.clone();
    let write_ctx = context;

    let read = props.read.then(move || CharacteristicRead {
        read: true,
        fun: Box::new(move |_req: CharacteristicReadRequest| {
            let ctx = read_ctx.clone();
            Box::pin(async move {
                let (reply, value) = oneshot::channel();
                if !ctx.post(PeripheralEvent::Read {
                    characteristic: CharacteristicId::Command,
                    reply,
                }) {
                    return Err(ReqError::Failed);
                }
                value.await.map_err(|_| ReqError::Failed)
            })
        }),
        ..Default::default()
    });

    let write = props.write_without_response.then(move || CharacteristicWrite {
        write_without_response: true,
        method: CharacteristicWriteMethod::Fun(Box::new(
            move |data: Vec<u8>, req: CharacteristicWriteRequest| {
                let ctx = write_ctx.clone();
                Box::pin(async move {
                    debug!("Write of {} bytes (mtu {})", data.len(), req.mtu);
                    ctx.post(PeripheralEvent::Write {
                        characteristic: CharacteristicId::Command,
                        data,
                    });
                    Ok(())
                })
            },
        )),
        ..Default::default()
    });

    Characteristic {
        uuid: descriptor.command_uuid,
        read,
        write,
        ..Default::default()
    }
}

/// Status characteristic, registered with [`CharacteristicId::Status`]'s
/// properties.
fn status_characteristic(
    descriptor: &ServiceDescriptor,
    context: PeripheralContext,
) -> Characteristic {
    let props = CharacteristicId::Status.properties();
    let sessions = Arc::new(AtomicU64::new(1));

    let notify = props.notify.then(move || CharacteristicNotify {
        notify: true,
        method: CharacteristicNotifyMethod::Fun(Box::new(move |notifier| {
            let ctx = context.clone();
            let client = ClientHandle(sessions.fetch_add(1, Ordering::Relaxed));
            Box::pin(notify_session(ctx, client, notifier))
        })),
        ..Default::default()
    });

    Characteristic {
        uuid: descriptor.status_uuid,
        notify,
        ..Default::default()
    }
}

/// Forward payloads published by the event loop to one subscribed client
/// until either side goes away.
async fn notify_session(
    ctx: PeripheralContext,
    client: ClientHandle,
    mut notifier: CharacteristicNotifier,
) {
    let (sink, mut queue) = notify_queue();
    if !ctx.post(PeripheralEvent::Subscribe {
        characteristic: CharacteristicId::Status,
        client,
        sink: Box::new(sink),
    }) {
        return;
    }
    debug!("Notify session {:?} started", client);

    loop {
        let payload = tokio::select! {
            _ = notifier.stopped() => None,
            payload = queue.recv() => payload,
        };
        let Some(payload) = payload else {
            break;
        };

        if let Err(e) = notifier.notify(payload).await {
            warn!("Notify session {:?} failed: {}", client, e);
            break;
        }
    }

    debug!("Notify session {:?} ended", client);
    ctx.post(PeripheralEvent::Unsubscribe {
        characteristic: CharacteristicId::Status,
        client,
    });
}
