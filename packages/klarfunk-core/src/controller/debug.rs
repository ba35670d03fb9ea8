//! Spoken diagnostic readout and the saved-network selection window.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::network::{ActiveWifi, ConnectivityStatus, SavedWifi};
use crate::sync::Signal;

/// Builds the lines spoken by the debug readout.
///
/// `selectable` is how many saved networks are offered on channel buttons;
/// zero omits the selection prompt.
#[must_use]
pub fn build_readout(
    status: &ConnectivityStatus,
    active: Option<&ActiveWifi>,
    saved: &[SavedWifi],
    selectable: usize,
) -> Vec<String> {
    let mut lines = Vec::new();

    lines.push(if status.is_connected {
        "Internet verbunden.".to_string()
    } else {
        "Keine Internetverbindung.".to_string()
    });

    match active {
        Some(wifi) => {
            let mut line = format!("WLAN {}", wifi.ssid);
            if let Some(signal) = wifi.signal {
                line.push_str(&format!(", Signal {signal} Prozent"));
            }
            line.push('.');
            lines.push(line);
            if let Some(ip) = &wifi.ip_address {
                lines.push(format!("IP-Adresse {}.", spell_address(ip)));
            }
        }
        None => lines.push("Kein WLAN verbunden.".to_string()),
    }

    match saved.len() {
        0 => lines.push("Keine gespeicherten Netzwerke.".to_string()),
        1 => lines.push("Ein gespeichertes Netzwerk.".to_string()),
        n => lines.push(format!("{n} gespeicherte Netzwerke.")),
    }

    if selectable > 0 {
        for (index, network) in saved.iter().take(selectable).enumerate() {
            lines.push(format!("Taste {}: {}.", index + 1, network.ssid));
        }
        lines.push("Zum Verbinden jetzt die Taste drücken.".to_string());
    }

    lines
}

/// Reads an IPv4 address digit group by group.
fn spell_address(ip: &str) -> String {
    ip.split('.').collect::<Vec<_>>().join(" Punkt ")
}

/// A time-boxed window in which a channel button picks a saved network.
#[derive(Debug, Default)]
pub struct SelectionWindow {
    choice: Mutex<Option<usize>>,
    chosen: Signal,
}

impl SelectionWindow {
    /// Records a button press. The first press wins.
    pub fn choose(&self, index: usize) {
        let mut choice = self.choice.lock();
        if choice.is_none() {
            *choice = Some(index);
            self.chosen.set();
        }
    }

    /// Waits for a choice until `timeout` elapses or `cancelled` is set.
    pub fn wait(&self, timeout: Duration, cancelled: &Signal) -> Option<usize> {
        let deadline = Instant::now() + timeout;
        let slice = Duration::from_millis(50);
        loop {
            if let Some(choice) = *self.choice.lock() {
                return Some(choice);
            }
            let now = Instant::now();
            if now >= deadline || cancelled.is_set() {
                return None;
            }
            self.chosen.wait_timeout(slice.min(deadline - now));
        }
    }
}
