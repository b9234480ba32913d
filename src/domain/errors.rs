use thiserror::Error;

/// A write on the command characteristic could not be turned into a command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("malformed command ({len} bytes)")]
    Malformed { len: usize },
}

/// Failures of the external scan/connect facilities.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    #[error("wifi scan unavailable: {reason}")]
    ScanUnavailable { reason: String },
    #[error("could not parse scan output: {reason}")]
    ParseFailure { reason: String },
    #[error("wifi connect failed: {reason}")]
    ConnectFailed { reason: String },
}

impl NetworkError {
    /// Short machine-readable code sent to the client in error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ScanUnavailable { .. } => "scan_unavailable",
            Self::ParseFailure { .. } => "scan_parse_failure",
            Self::ConnectFailed { .. } => "connect_failed",
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            Self::ScanUnavailable { reason }
            | Self::ParseFailure { reason }
            | Self::ConnectFailed { reason } => reason,
        }
    }
}

/// Startup failures while publishing the peripheral with the Bluetooth stack.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("no bluetooth adapter with GATT and advertising support found")]
    NoAdapter,
    #[error("registration rejected by bluetooth stack: {reason}")]
    RegistrationRejected { reason: String },
}

/// A notification could not be handed to the subscribed client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("subscribed client is gone")]
    ClientGone,
    #[error("notification queue is full")]
    Backlogged,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_error_codes() {
        let err = NetworkError::ScanUnavailable {
            reason: "iwlist missing".to_string(),
        };
        assert_eq!(err.code(), "scan_unavailable");
        assert_eq!(err.reason(), "iwlist missing");
        assert_eq!(
            NetworkError::ParseFailure {
                reason: String::new()
            }
            .code(),
            "scan_parse_failure"
        );
    }

    #[test]
    fn test_decode_error_carries_length() {
        let err = DecodeError::Malformed { len: 7 };
        assert_eq!(err.to_string(), "malformed command (7 bytes)");
    }
}
