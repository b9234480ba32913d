//! Parser for `iwlist <iface> scan` output.
//!
//! The output is a list of cells, each opened by a line such as
//!
//! ```text
//!           Cell 01 - Address: AA:BB:CC:DD:EE:01
//! ```
//!
//! followed by indented attributes, one of which is `ESSID:"name"`.

use crate::domain::errors::NetworkError;
use crate::domain::models::{NetworkEntry, ScanResult};
use std::collections::HashSet;
use tracing::trace;

const CELL_MARKER: &str = "Cell ";
const ADDRESS_MARKER: &str = "Address:";
const ESSID_MARKER: &str = "ESSID:";

/// Parse raw scan output into one entry per named cell, in output order.
///
/// Cells without an ESSID (or with an empty one, i.e. hidden networks) are
/// skipped. Repeated MAC addresses keep their first occurrence.
pub fn parse_scan_output(output: &str) -> Result<Vec<NetworkEntry>, NetworkError> {
    let mut entries = Vec::new();
    let mut seen_macs = HashSet::new();
    let mut current_mac: Option<String> = None;
    let mut recognised = false;

    for line in output.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if trimmed.starts_with(CELL_MARKER) {
            let mac = parse_cell_address(trimmed)?;
            trace!("scan cell {}", mac);
            current_mac = Some(mac);
            recognised = true;
            continue;
        }

        if let Some(rest) = trimmed.strip_prefix(ESSID_MARKER) {
            let mac = current_mac.take().ok_or_else(|| NetworkError::ParseFailure {
                reason: format!("ESSID outside of a cell: {}", trimmed),
            })?;
            let essid = parse_quoted(rest).ok_or_else(|| NetworkError::ParseFailure {
                reason: format!("unterminated ESSID: {}", trimmed),
            })?;

            if !essid.is_empty() && seen_macs.insert(mac.clone()) {
                entries.push(NetworkEntry {
                    essid,
                    mac_address: mac,
                });
            }
            continue;
        }

        // Header lines ("wlan0     Scan completed :") and the empty-result
        // notice ("wlan0     No scan results") carry no cells.
        if trimmed.contains("Scan completed") || trimmed.contains("No scan results") {
            recognised = true;
        }
    }

    if !recognised && !output.trim().is_empty() {
        return Err(NetworkError::ParseFailure {
            reason: "output contains no scan cells".to_string(),
        });
    }

    Ok(entries)
}

/// Keep the first entry for every ESSID, preserving order.
pub fn dedup_by_essid(entries: Vec<NetworkEntry>) -> ScanResult {
    let mut seen = HashSet::new();
    entries
        .into_iter()
        .filter(|entry| seen.insert(entry.essid.clone()))
        .collect()
}

fn parse_cell_address(line: &str) -> Result<String, NetworkError> {
    let malformed = || NetworkError::ParseFailure {
        reason: format!("malformed cell line: {}", line),
    };

    let idx = line.find(ADDRESS_MARKER).ok_or_else(malformed)?;
    let mac = line[idx + ADDRESS_MARKER.len()..].trim();
    if is_mac_address(mac) {
        Ok(mac.to_uppercase())
    } else {
        Err(malformed())
    }
}

fn is_mac_address(s: &str) -> bool {
    s.len() == 17
        && s.split(':').count() == 6
        && s
            .split(':')
            .all(|octet| octet.len() == 2 && octet.chars().all(|c| c.is_ascii_hexdigit()))
}

/// `"name"` -> `name`; the ESSID itself may contain quotes.
fn parse_quoted(rest: &str) -> Option<String> {
    let inner = rest.strip_prefix('"')?;
    let end = inner.rfind('"')?;
    Some(inner[..end].to_string())
}
