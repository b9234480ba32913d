//! GATT Peripheral State Machine
//!
//! Owns the provisioning service state. Every platform callback reaches
//! this type as a [`PeripheralEvent`] on the event loop; network work is
//! handed to the blocking pool and its result comes back as another event.

use crate::domain::models::{
    CharacteristicId, ClientHandle, Command, ConnectionOutcome, OperationResult, PeripheralState,
    RegistrationEvent, SubscriptionState,
};
use crate::infrastructure::bluetooth::notification::{NotificationChannel, NotifySink};
use crate::infrastructure::bluetooth::protocol::{self, ServiceDescriptor, StatusPayload};
use crate::infrastructure::network::NetworkBackend;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Inbound events dispatched by the event loop.
#[derive(Debug)]
pub enum PeripheralEvent {
    Write {
        characteristic: CharacteristicId,
        data: Vec<u8>,
    },
    Read {
        characteristic: CharacteristicId,
        reply: oneshot::Sender<Vec<u8>>,
    },
    Subscribe {
        characteristic: CharacteristicId,
        client: ClientHandle,
        sink: Box<dyn NotifySink>,
    },
    Unsubscribe {
        characteristic: CharacteristicId,
        client: ClientHandle,
    },
    Registration(RegistrationEvent),
    OperationComplete(OperationResult),
}

pub type EventSender = mpsc::UnboundedSender<PeripheralEvent>;

/// Process-wide peripheral context: the service description and the way
/// back onto the event loop. Shared by the registration manager and the
/// state machine instead of global state.
#[derive(Debug, Clone)]
pub struct PeripheralContext {
    pub descriptor: Arc<ServiceDescriptor>,
    pub events: EventSender,
}

impl PeripheralContext {
    pub fn new(descriptor: ServiceDescriptor, events: EventSender) -> Self {
        Self {
            descriptor: Arc::new(descriptor),
            events,
        }
    }

    /// Post an event onto the loop. Fails only once the loop is gone.
    pub fn post(&self, event: PeripheralEvent) -> bool {
        self.events.send(event).is_ok()
    }
}

pub struct GattPeripheral<N: NetworkBackend> {
    context: PeripheralContext,
    network: Arc<N>,
    state: PeripheralState,
    notifications: NotificationChannel,
    last_written: Vec<u8>,
    in_flight: usize,
}

impl<N: NetworkBackend> GattPeripheral<N> {
    pub fn new(context: PeripheralContext, network: Arc<N>) -> Self {
        Self {
            context,
            network,
            state: PeripheralState::Unregistered,
            notifications: NotificationChannel::new(),
            last_written: vec![0x00],
            in_flight: 0,
        }
    }

    pub fn state(&self) -> PeripheralState {
        self.state
    }

    pub fn subscription(&self) -> SubscriptionState {
        self.notifications.subscription()
    }

    /// Number of network operations dispatched but not yet completed
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Route one event to its handler.
    pub fn handle_event(&mut self, event: PeripheralEvent) {
        match event {
            PeripheralEvent::Write {
                characteristic,
                data,
            } => self.on_write(characteristic, data),
            PeripheralEvent::Read {
                characteristic,
                reply,
            } => {
                let value = self.on_read(characteristic);
                let _ = reply.send(value);
            }
            PeripheralEvent::Subscribe {
                characteristic,
                client,
                sink,
            } => self.on_subscribe(characteristic, client, sink),
            PeripheralEvent::Unsubscribe {
                characteristic,
                client,
            } => self.on_unsubscribe(characteristic, client),
            PeripheralEvent::Registration(event) => self.on_registration(event),
            PeripheralEvent::OperationComplete(result) => self.on_operation_complete(result),
        }
    }

    pub fn on_write(&mut self, characteristic: CharacteristicId, data: Vec<u8>) {
        if characteristic != CharacteristicId::Command {
            warn!("Ignoring write to {:?} characteristic", characteristic);
            return;
        }

        debug!("Command write: {} bytes", data.len());
        let decoded = protocol::decode(&data);
        self.last_written = data;

        match decoded {
            Ok(command) => self.dispatch(command),
            Err(e) => {
                warn!("Rejecting command: {}", e);
                self.publish(&StatusPayload::malformed_command());
            }
        }
    }

    pub fn on_read(&self, characteristic: CharacteristicId) -> Vec<u8> {
        match characteristic {
            CharacteristicId::Command => self.last_written.clone(),
            CharacteristicId::Status => Vec::new(),
        }
    }

    pub fn on_subscribe(
        &mut self,
        characteristic: CharacteristicId,
        client: ClientHandle,
        sink: Box<dyn NotifySink>,
    ) {
        if characteristic != CharacteristicId::Status {
            warn!("Ignoring subscribe to {:?} characteristic", characteristic);
            return;
        }
        self.notifications.subscribe(client, sink);
    }

    pub fn on_unsubscribe(&mut self, characteristic: CharacteristicId, client: ClientHandle) {
        if characteristic != CharacteristicId::Status {
            warn!("Ignoring unsubscribe from {:?} characteristic", characteristic);
            return;
        }
        self.notifications.unsubscribe(client);
    }

    pub fn on_registration(&mut self, event: RegistrationEvent) {
        let next = self.state.on_registration(&event);
        if next != self.state {
            info!("Peripheral state {:?} -> {:?}", self.state, next);
        } else {
            debug!("Registration event {:?} leaves state {:?}", event, self.state);
        }
        if let RegistrationEvent::Failed(reason) = &event {
            error!("Registration failed: {}", reason);
        }
        self.state = next;
    }

    pub fn on_operation_complete(&mut self, result: OperationResult) {
        self.in_flight = self.in_flight.saturating_sub(1);

        let payload = match result {
            OperationResult::Scan(Ok(networks)) => {
                info!("Scan complete: {} networks", networks.len());
                StatusPayload::Networks(networks)
            }
            OperationResult::Scan(Err(e)) => {
                warn!("Scan failed: {}", e);
                StatusPayload::network_error(&e)
            }
            OperationResult::Connect { ssid, result } => {
                let outcome = match result {
                    Ok(detail) => {
                        info!("Connected to {:?}", ssid);
                        ConnectionOutcome {
                            success: true,
                            ssid,
                            detail,
                        }
                    }
                    Err(e) => {
                        warn!("Connect to {:?} failed: {}", ssid, e);
                        ConnectionOutcome {
                            success: false,
                            ssid,
                            detail: e.reason().to_string(),
                        }
                    }
                };
                StatusPayload::Connection(outcome)
            }
        };

        self.publish(&payload);
    }

    /// Run the command on the blocking pool and post the result back.
    fn dispatch(&mut self, command: Command) {
        let network = self.network.clone();
        let events = self.context.events.clone();
        self.in_flight += 1;

        match &command {
            Command::Scan => info!("Dispatching Wi-Fi scan"),
            Command::Connect { ssid, .. } => info!("Dispatching connect to {:?}", ssid),
        }

        tokio::task::spawn_blocking(move || {
            let result = match command {
                Command::Scan => OperationResult::Scan(network.scan()),
                Command::Connect { ssid, password } => {
                    let result = network.connect(&ssid, &password);
                    OperationResult::Connect { ssid, result }
                }
            };
            if events
                .send(PeripheralEvent::OperationComplete(result))
                .is_err()
            {
                debug!("Event loop gone, dropping operation result");
            }
        });
    }

    fn publish(&mut self, payload: &StatusPayload) {
        match payload.to_bytes() {
            Ok(bytes) => {
                self.notifications.publish(bytes);
            }
            Err(e) => error!("Failed to encode status payload: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::NetworkError;
    use crate::domain::models::NetworkEntry;
    use crate::infrastructure::bluetooth::notification::notify_queue;
    use crate::infrastructure::bluetooth::notification::tests::RecordingSink;
    use crate::infrastructure::network::scanner::dedup_by_essid;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeNetwork {
        networks: Vec<NetworkEntry>,
        fail_connect: bool,
        connect_delay: Mutex<Vec<(String, Duration)>>,
        scans: AtomicUsize,
        connects: AtomicUsize,
    }

    impl NetworkBackend for FakeNetwork {
        fn scan(&self) -> Result<Vec<NetworkEntry>, NetworkError> {
            self.scans.fetch_add(1, Ordering::SeqCst);
            Ok(dedup_by_essid(self.networks.clone()))
        }

        fn connect(&self, ssid: &str, _password: &str) -> Result<String, NetworkError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let delay = self
                .connect_delay
                .lock()
                .unwrap()
                .iter()
                .find(|(s, _)| s == ssid)
                .map(|(_, d)| *d);
            if let Some(delay) = delay {
                std::thread::sleep(delay);
            }
            if self.fail_connect {
                Err(NetworkError::ConnectFailed {
                    reason: "Secrets were required, but not provided".to_string(),
                })
            } else {
                Ok(format!("activated {}", ssid))
            }
        }
    }

    fn entry(essid: &str, mac: &str) -> NetworkEntry {
        NetworkEntry {
            essid: essid.to_string(),
            mac_address: mac.to_string(),
        }
    }

    struct Harness {
        peripheral: GattPeripheral<FakeNetwork>,
        events: mpsc::UnboundedReceiver<PeripheralEvent>,
        sink: RecordingSink,
        network: Arc<FakeNetwork>,
    }

    impl Harness {
        fn new(network: FakeNetwork) -> Self {
            let (tx, events) = mpsc::unbounded_channel();
            let network = Arc::new(network);
            let context = PeripheralContext::new(ServiceDescriptor::default(), tx);
            let mut peripheral = GattPeripheral::new(context, network.clone());
            let sink = RecordingSink::default();
            peripheral.on_subscribe(
                CharacteristicId::Status,
                ClientHandle(1),
                Box::new(sink.clone()),
            );
            Self {
                peripheral,
                events,
                sink,
                network,
            }
        }

        fn write(&mut self, data: &[u8]) {
            self.peripheral.handle_event(PeripheralEvent::Write {
                characteristic: CharacteristicId::Command,
                data: data.to_vec(),
            });
        }

        /// Pump the next completion back through the state machine.
        async fn complete_next(&mut self) {
            let event = tokio::time::timeout(Duration::from_secs(5), self.events.recv())
                .await
                .expect("operation did not complete")
                .expect("event channel closed");
            assert!(matches!(event, PeripheralEvent::OperationComplete(_)));
            self.peripheral.handle_event(event);
        }

        fn delivered_json(&self) -> Vec<Value> {
            self.sink
                .payloads()
                .iter()
                .map(|p| serde_json::from_slice(p).unwrap())
                .collect()
        }
    }

    #[tokio::test]
    async fn test_scan_delivers_deduplicated_networks() {
        let mut h = Harness::new(FakeNetwork {
            networks: vec![
                entry("Net1", "AA:BB:CC:DD:EE:01"),
                entry("Net1", "AA:BB:CC:DD:EE:02"),
            ],
            ..Default::default()
        });

        h.write(b"SCAN_WIFI");
        assert_eq!(h.peripheral.in_flight(), 1);
        h.complete_next().await;

        assert_eq!(
            h.delivered_json(),
            vec![json!([{"essid": "Net1", "mac_address": "AA:BB:CC:DD:EE:01"}])]
        );
        assert_eq!(h.peripheral.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_connect_success_outcome() {
        let mut h = Harness::new(FakeNetwork::default());

        h.write(br#"{"ssid":"MyNetwork","password":"MyPassword"}"#);
        h.complete_next().await;

        let delivered = h.delivered_json();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0]["success"], json!(true));
        assert_eq!(delivered[0]["ssid"], json!("MyNetwork"));
        assert!(delivered[0]["detail"].is_string());
    }

    #[tokio::test]
    async fn test_connect_failure_outcome() {
        let mut h = Harness::new(FakeNetwork {
            fail_connect: true,
            ..Default::default()
        });

        h.write(br#"{"ssid":"MyNetwork","password":"wrong"}"#);
        h.complete_next().await;

        assert_eq!(
            h.delivered_json(),
            vec![json!({
                "success": false,
                "ssid": "MyNetwork",
                "detail": "Secrets were required, but not provided"
            })]
        );
    }

    #[tokio::test]
    async fn test_malformed_write_dispatches_nothing() {
        let mut h = Harness::new(FakeNetwork::default());

        h.write(br#"{"ssid":"MyNetwork"}"#);

        assert_eq!(h.delivered_json(), vec![json!({"error": "malformed_command"})]);
        assert_eq!(h.peripheral.in_flight(), 0);
        assert!(h.events.try_recv().is_err());
        assert_eq!(h.network.connects.load(Ordering::SeqCst), 0);
        assert_eq!(h.network.scans.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_concurrent_connects_keep_their_ssid() {
        let network = FakeNetwork::default();
        network
            .connect_delay
            .lock()
            .unwrap()
            .push(("First".to_string(), Duration::from_millis(100)));
        let mut h = Harness::new(network);

        h.write(br#"{"ssid":"First","password":"one"}"#);
        h.write(br#"{"ssid":"Second","password":"two"}"#);
        assert_eq!(h.peripheral.in_flight(), 2);
        h.complete_next().await;
        h.complete_next().await;

        let delivered = h.delivered_json();
        assert_eq!(delivered.len(), 2);
        // completion order, not submission order
        assert_eq!(delivered[0]["ssid"], json!("Second"));
        assert_eq!(delivered[0]["detail"], json!("activated Second"));
        assert_eq!(delivered[1]["ssid"], json!("First"));
        assert_eq!(delivered[1]["detail"], json!("activated First"));
    }

    /// Harness whose status subscriber is the production notify queue.
    fn queued_harness(network: FakeNetwork) -> (Harness, mpsc::Receiver<Vec<u8>>) {
        let mut h = Harness::new(network);
        let (sink, queue) = notify_queue();
        h.peripheral
            .on_subscribe(CharacteristicId::Status, ClientHandle(2), Box::new(sink));
        (h, queue)
    }

    fn drain(queue: &mut mpsc::Receiver<Vec<u8>>) -> Vec<Value> {
        let mut delivered = Vec::new();
        while let Ok(payload) = queue.try_recv() {
            delivered.push(serde_json::from_slice(&payload).unwrap());
        }
        delivered
    }

    #[tokio::test]
    async fn test_back_to_back_connects_reach_notify_queue() {
        let (mut h, mut queue) = queued_harness(FakeNetwork::default());

        h.write(br#"{"ssid":"First","password":"one"}"#);
        h.write(br#"{"ssid":"Second","password":"two"}"#);
        // both completions handled before the session drains anything
        h.complete_next().await;
        h.complete_next().await;

        let delivered = drain(&mut queue);
        assert_eq!(delivered.len(), 2);
        let mut ssids: Vec<_> = delivered
            .iter()
            .map(|v| v["ssid"].as_str().unwrap().to_string())
            .collect();
        ssids.sort();
        assert_eq!(ssids, vec!["First", "Second"]);
        assert!(h.peripheral.subscription().subscribed);
    }

    #[tokio::test]
    async fn test_malformed_then_scan_both_reach_notify_queue() {
        let (mut h, mut queue) = queued_harness(FakeNetwork {
            networks: vec![entry("Net1", "AA:BB:CC:DD:EE:01")],
            ..Default::default()
        });

        h.write(b"bogus");
        h.write(b"SCAN_WIFI");
        h.complete_next().await;

        assert_eq!(
            drain(&mut queue),
            vec![
                json!({"error": "malformed_command"}),
                json!([{"essid": "Net1", "mac_address": "AA:BB:CC:DD:EE:01"}]),
            ]
        );
    }

    #[tokio::test]
    async fn test_results_without_subscriber_are_dropped() {
        let mut h = Harness::new(FakeNetwork::default());
        h.peripheral
            .on_unsubscribe(CharacteristicId::Status, ClientHandle(1));
        assert!(!h.peripheral.subscription().subscribed);

        h.write(b"SCAN_WIFI");
        h.complete_next().await;
        h.write(b"bogus");

        assert!(h.sink.payloads().is_empty());
    }

    #[tokio::test]
    async fn test_read_returns_last_written_value() {
        let mut h = Harness::new(FakeNetwork::default());
        assert_eq!(h.peripheral.on_read(CharacteristicId::Command), vec![0x00]);

        h.write(b"hello");
        let (reply, rx) = oneshot::channel();
        h.peripheral.handle_event(PeripheralEvent::Read {
            characteristic: CharacteristicId::Command,
            reply,
        });
        assert_eq!(rx.await.unwrap(), b"hello".to_vec());
    }

    #[tokio::test]
    async fn test_writes_to_status_characteristic_are_ignored() {
        let mut h = Harness::new(FakeNetwork::default());
        h.peripheral.handle_event(PeripheralEvent::Write {
            characteristic: CharacteristicId::Status,
            data: b"SCAN_WIFI".to_vec(),
        });
        assert_eq!(h.peripheral.in_flight(), 0);
        assert!(h.sink.payloads().is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_on_command_characteristic_is_ignored() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let context = PeripheralContext::new(ServiceDescriptor::default(), tx);
        let mut peripheral = GattPeripheral::new(context, Arc::new(FakeNetwork::default()));
        peripheral.on_subscribe(
            CharacteristicId::Command,
            ClientHandle(9),
            Box::new(RecordingSink::default()),
        );
        assert!(!peripheral.subscription().subscribed);
    }

    #[tokio::test]
    async fn test_registration_events_drive_state() {
        let mut h = Harness::new(FakeNetwork::default());
        for event in [
            RegistrationEvent::Registering,
            RegistrationEvent::ApplicationRegistered,
            RegistrationEvent::AdvertisingStarted,
            RegistrationEvent::AdvertisementReleased,
        ] {
            h.peripheral.handle_event(PeripheralEvent::Registration(event));
        }
        assert_eq!(
            h.peripheral.state(),
            PeripheralState::Registered { advertising: false }
        );
    }
}
