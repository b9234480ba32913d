use crate::domain::errors::NetworkError;
use serde::{Deserialize, Serialize};

/// A decoded client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Scan,
    Connect { ssid: String, password: String },
}

/// One wireless network seen by a scan.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkEntry {
    pub essid: String,
    pub mac_address: String,
}

/// Ordered scan output as delivered to the client.
pub type ScanResult = Vec<NetworkEntry>;

/// Result of a single connect request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionOutcome {
    pub success: bool,
    pub ssid: String,
    pub detail: String,
}

/// The two characteristics of the provisioning service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CharacteristicId {
    /// Read + write-without-response, receives commands
    Command,
    /// Notify, pushes results
    Status,
}

/// GATT properties a characteristic is registered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CharacteristicProperties {
    pub read: bool,
    pub write_without_response: bool,
    pub notify: bool,
}

impl CharacteristicId {
    pub fn properties(&self) -> CharacteristicProperties {
        match self {
            Self::Command => CharacteristicProperties {
                read: true,
                write_without_response: true,
                notify: false,
            },
            Self::Status => CharacteristicProperties {
                notify: true,
                ..Default::default()
            },
        }
    }
}

/// Opaque identity of one notify session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientHandle(pub u64);

/// Subscription bookkeeping for the status characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubscriptionState {
    pub subscribed: bool,
    pub client: Option<ClientHandle>,
}

/// Registration lifecycle reported by the advertising manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationEvent {
    Registering,
    ApplicationRegistered,
    AdvertisingStarted,
    AdvertisementReleased,
    Failed(String),
}

/// Where the peripheral is in its registration lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeripheralState {
    #[default]
    Unregistered,
    Registering,
    Registered {
        advertising: bool,
    },
}

impl PeripheralState {
    /// Apply a registration event. Events that make no sense in the
    /// current state leave it unchanged.
    pub fn on_registration(self, event: &RegistrationEvent) -> Self {
        match (self, event) {
            (_, RegistrationEvent::Failed(_)) => Self::Unregistered,
            (Self::Unregistered, RegistrationEvent::Registering) => Self::Registering,
            (Self::Registering, RegistrationEvent::ApplicationRegistered) => {
                Self::Registered { advertising: false }
            }
            (Self::Registered { .. }, RegistrationEvent::AdvertisingStarted) => {
                Self::Registered { advertising: true }
            }
            (Self::Registered { .. }, RegistrationEvent::AdvertisementReleased) => {
                Self::Registered { advertising: false }
            }
            (state, _) => state,
        }
    }
}

/// Outcome of a background network operation, posted back to the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationResult {
    Scan(Result<ScanResult, NetworkError>),
    Connect {
        ssid: String,
        result: Result<String, NetworkError>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_happy_path() {
        let state = PeripheralState::default()
            .on_registration(&RegistrationEvent::Registering)
            .on_registration(&RegistrationEvent::ApplicationRegistered)
            .on_registration(&RegistrationEvent::AdvertisingStarted);
        assert_eq!(state, PeripheralState::Registered { advertising: true });

        let released = state.on_registration(&RegistrationEvent::AdvertisementReleased);
        assert_eq!(released, PeripheralState::Registered { advertising: false });

        let again = released.on_registration(&RegistrationEvent::AdvertisingStarted);
        assert_eq!(again, PeripheralState::Registered { advertising: true });
    }

    #[test]
    fn test_registration_out_of_order_is_ignored() {
        let state = PeripheralState::Unregistered.on_registration(&RegistrationEvent::AdvertisingStarted);
        assert_eq!(state, PeripheralState::Unregistered);

        let state = PeripheralState::Registering
            .on_registration(&RegistrationEvent::Failed("rejected".to_string()));
        assert_eq!(state, PeripheralState::Unregistered);
    }

    #[test]
    fn test_characteristic_properties() {
        let command = CharacteristicId::Command.properties();
        assert!(command.read && command.write_without_response && !command.notify);

        let status = CharacteristicId::Status.properties();
        assert!(status.notify && !status.read && !status.write_without_response);
    }
}
