use crate::domain::errors::NetworkError;
use crate::domain::models::ScanResult;
use crate::domain::settings::NetworkSettings;
use crate::infrastructure::network::scanner::{dedup_by_essid, parse_scan_output};
use crate::infrastructure::network::NetworkBackend;
use std::process::{Command, Output};
use tracing::{debug, info, warn};

/// Runs `iwlist` and `nmcli` (optionally through `sudo`).
#[derive(Debug, Clone)]
pub struct SystemNetwork {
    settings: NetworkSettings,
}

impl SystemNetwork {
    pub fn new(settings: NetworkSettings) -> Self {
        Self { settings }
    }

    /// Build the invocation, prefixing `sudo` when configured
    fn command(&self, program: &str, args: &[&str]) -> Command {
        if self.settings.use_sudo {
            let mut cmd = Command::new("sudo");
            cmd.arg(program).args(args);
            cmd
        } else {
            let mut cmd = Command::new(program);
            cmd.args(args);
            cmd
        }
    }

    fn scan_args(&self) -> Vec<&str> {
        vec![self.settings.interface.as_str(), "scan"]
    }

    fn connect_args<'a>(&'a self, ssid: &'a str, password: &'a str) -> Vec<&'a str> {
        let mut args = vec!["device", "wifi", "connect", ssid, "password", password];
        if !self.settings.interface.is_empty() {
            args.push("ifname");
            args.push(self.settings.interface.as_str());
        }
        args
    }
}

impl NetworkBackend for SystemNetwork {
    fn scan(&self) -> Result<ScanResult, NetworkError> {
        let program = &self.settings.scan_program;
        info!("Scanning for Wi-Fi networks on {}", self.settings.interface);

        let output = self
            .command(program, &self.scan_args())
            .output()
            .map_err(|e| NetworkError::ScanUnavailable {
                reason: format!("failed to run {}: {}", program, e),
            })?;

        if !output.status.success() {
            return Err(NetworkError::ScanUnavailable {
                reason: failure_reason(program, &output),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let entries = parse_scan_output(&stdout)?;
        let networks = dedup_by_essid(entries);
        debug!("Scan found {} networks", networks.len());
        Ok(networks)
    }

    fn connect(&self, ssid: &str, password: &str) -> Result<String, NetworkError> {
        let program = &self.settings.connect_program;
        info!("Connecting to Wi-Fi network {:?}", ssid);

        let output = self
            .command(program, &self.connect_args(ssid, password))
            .output()
            .map_err(|e| NetworkError::ConnectFailed {
                reason: format!("failed to run {}: {}", program, e),
            })?;

        if !output.status.success() {
            let reason = failure_reason(program, &output);
            warn!("Connecting to {:?} failed: {}", ssid, reason);
            return Err(NetworkError::ConnectFailed { reason });
        }

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(if stdout.is_empty() {
            format!("connected to {}", ssid)
        } else {
            stdout
        })
    }
}

/// Prefer stderr, fall back to stdout, then to the exit status.
fn failure_reason(program: &str, output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let message = if !stderr.trim().is_empty() {
        stderr.trim().to_string()
    } else {
        stdout.trim().to_string()
    };

    if message.is_empty() {
        format!("{} exited with {}", program, output.status)
    } else {
        message
    }
}
