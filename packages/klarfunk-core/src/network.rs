//! Network collaborator backed by NetworkManager's `nmcli`.
//!
//! Connectivity is asked from NetworkManager first and confirmed with a TCP
//! probe when NetworkManager is unavailable or reports anything short of
//! full connectivity. The Wi-Fi queries feed the spoken debug readout.

use std::time::Duration;

use crate::audio::TcpProbe;
use crate::error::{NetworkError, NetworkResult};
use crate::state::WifiConfig;
use crate::utils::run_command;

/// Outcome of a connectivity check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectivityStatus {
    pub is_connected: bool,
    /// Short human-readable explanation for logs.
    pub detail: String,
}

/// Answers whether the device is online.
pub trait ConnectivityChecker: Send + Sync {
    fn check_connectivity(&self) -> ConnectivityStatus;
}

/// The Wi-Fi connection currently in use.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ActiveWifi {
    pub ssid: String,
    pub device: String,
    /// Signal strength in percent.
    pub signal: Option<u8>,
    /// IPv4 address without prefix length.
    pub ip_address: Option<String>,
    pub gateway: Option<String>,
    pub dns: Vec<String>,
}

/// A saved Wi-Fi connection profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedWifi {
    /// Connection profile name, used to activate it.
    pub name: String,
    pub ssid: String,
    pub security: String,
    pub active: bool,
}

/// Wi-Fi inspection and switching.
pub trait WifiManager: Send + Sync {
    fn active_wifi(&self) -> NetworkResult<Option<ActiveWifi>>;
    fn saved_wifi(&self) -> NetworkResult<Vec<SavedWifi>>;
    fn connect_saved(&self, name: &str) -> NetworkResult<()>;
}

/// [`ConnectivityChecker`] and [`WifiManager`] on top of `nmcli`.
pub struct NetworkManager {
    config: WifiConfig,
    probe: TcpProbe,
}

impl NetworkManager {
    pub fn new(config: WifiConfig, probe: TcpProbe) -> Self {
        Self { config, probe }
    }

    fn command_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.config.command_timeout_seconds)
    }

    fn nmcli(&self, args: &[&str], timeout: Duration) -> NetworkResult<String> {
        let output = run_command(&self.config.nmcli_path, args, timeout)?;
        if output.success() {
            Ok(output.stdout)
        } else {
            Err(NetworkError::Failed(output.diagnostic()))
        }
    }

    fn device_ip4(&self, device: &str, wifi: &mut ActiveWifi) -> NetworkResult<()> {
        let output = self.nmcli(
            &[
                "-t",
                "-f",
                "IP4.ADDRESS,IP4.GATEWAY,IP4.DNS",
                "device",
                "show",
                device,
            ],
            self.command_timeout(),
        )?;
        for (key, value) in parse_key_values(&output) {
            if value.is_empty() || value == "--" {
                continue;
            }
            match base_key(&key) {
                "IP4.ADDRESS" if wifi.ip_address.is_none() => {
                    let address = value.split('/').next().unwrap_or(&value);
                    wifi.ip_address = Some(address.to_string());
                }
                "IP4.GATEWAY" => wifi.gateway = Some(value),
                "IP4.DNS" => wifi.dns.push(value),
                _ => {}
            }
        }
        Ok(())
    }
}

impl ConnectivityChecker for NetworkManager {
    fn check_connectivity(&self) -> ConnectivityStatus {
        let nm_state = match self.nmcli(
            &["-t", "-f", "CONNECTIVITY", "general"],
            self.command_timeout(),
        ) {
            Ok(output) => output.trim().to_string(),
            Err(e) => {
                log::debug!("[Network] nmcli connectivity unavailable: {}", e);
                "unavailable".to_string()
            }
        };

        if nm_state == "full" {
            return ConnectivityStatus {
                is_connected: true,
                detail: "nmcli: full".to_string(),
            };
        }

        match self.probe.first_reachable() {
            Some(host) => ConnectivityStatus {
                is_connected: true,
                detail: format!("nmcli: {nm_state}, tcp: {host} reachable"),
            },
            None => ConnectivityStatus {
                is_connected: false,
                detail: format!("nmcli: {nm_state}, tcp: no host reachable"),
            },
        }
    }
}

impl WifiManager for NetworkManager {
    fn active_wifi(&self) -> NetworkResult<Option<ActiveWifi>> {
        let output = self.nmcli(
            &["-t", "-f", "ACTIVE,SSID,DEVICE,SIGNAL", "device", "wifi"],
            self.command_timeout(),
        )?;
        let Some(mut wifi) = parse_active_wifi(&output) else {
            return Ok(None);
        };
        let device = wifi.device.clone();
        if let Err(e) = self.device_ip4(&device, &mut wifi) {
            log::warn!("[Network] Cannot read IPv4 details of {}: {}", device, e);
        }
        Ok(Some(wifi))
    }

    fn saved_wifi(&self) -> NetworkResult<Vec<SavedWifi>> {
        let output = self.nmcli(
            &["-t", "-f", "NAME,TYPE,ACTIVE", "connection", "show"],
            self.command_timeout(),
        )?;

        let mut saved = Vec::new();
        for fields in output.lines().map(split_terse) {
            let [name, kind, active] = fields.as_slice() else {
                continue;
            };
            if kind != "802-11-wireless" && kind != "wifi" {
                continue;
            }

            let details = self
                .nmcli(
                    &[
                        "-t",
                        "-f",
                        "802-11-wireless.ssid,802-11-wireless-security.key-mgmt",
                        "connection",
                        "show",
                        name,
                    ],
                    self.command_timeout(),
                )
                .map(|out| parse_key_values(&out))
                .unwrap_or_default();
            let lookup = |key: &str| {
                details
                    .iter()
                    .find(|(k, _)| k == key)
                    .map(|(_, v)| v.clone())
                    .filter(|v| !v.is_empty() && v != "--")
            };

            saved.push(SavedWifi {
                name: name.clone(),
                ssid: lookup("802-11-wireless.ssid").unwrap_or_else(|| name.clone()),
                security: lookup("802-11-wireless-security.key-mgmt")
                    .unwrap_or_else(|| "open".to_string()),
                active: active == "yes",
            });
        }
        Ok(saved)
    }

    fn connect_saved(&self, name: &str) -> NetworkResult<()> {
        let wait = format!("{}", self.config.connect_timeout_seconds.ceil() as u64);
        log::info!("[Network] Activating saved connection {}", name);
        self.nmcli(
            &["--wait", &wait, "connection", "up", "id", name],
            Duration::from_secs_f64(self.config.connect_timeout_seconds + 5.0),
        )?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// nmcli Output Parsing
// ─────────────────────────────────────────────────────────────────────────────

/// Splits one line of terse (`-t`) output on unescaped colons.
#[must_use]
pub fn split_terse(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            ':' => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

/// Parses `KEY:VALUE` lines of terse multiline output.
///
/// Keys keep their index suffix (`IP4.DNS[1]`); blank lines are skipped.
#[must_use]
pub fn parse_key_values(output: &str) -> Vec<(String, String)> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            Some((key.trim().to_string(), unescape(value.trim())))
        })
        .collect()
}

/// Strips an index suffix: `IP4.DNS[2]` → `IP4.DNS`.
#[must_use]
pub fn base_key(key: &str) -> &str {
    key.split_once('[').map_or(key, |(base, _)| base)
}

fn unescape(value: &str) -> String {
    value.replace("\\:", ":").replace("\\\\", "\\")
}

/// Finds the active row of `ACTIVE,SSID,DEVICE,SIGNAL` output.
fn parse_active_wifi(output: &str) -> Option<ActiveWifi> {
    output.lines().map(split_terse).find_map(|fields| {
        let [active, ssid, device, signal] = fields.as_slice() else {
            return None;
        };
        (active == "yes" && !ssid.is_empty()).then(|| ActiveWifi {
            ssid: ssid.clone(),
            device: device.clone(),
            signal: signal.parse().ok(),
            ..ActiveWifi::default()
        })
    })
}
