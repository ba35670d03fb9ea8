//! Internet reachability probe used before reconnecting.

use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::state::WatchdogConfig;

/// Answers "is the internet reachable right now?".
pub trait ReachabilityProbe: Send + Sync {
    fn is_reachable(&self) -> bool;
}

/// TCP connect to a list of well-known hosts; any success means reachable.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    hosts: Vec<String>,
    port: u16,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(hosts: Vec<String>, port: u16, timeout: Duration) -> Self {
        Self {
            hosts,
            port,
            timeout,
        }
    }

    #[must_use]
    pub fn from_config(config: &WatchdogConfig) -> Self {
        Self::new(
            config.internet_check_hosts.clone(),
            config.internet_check_port,
            config.internet_check_timeout(),
        )
    }

    /// Returns the first host that accepted a connection.
    #[must_use]
    pub fn first_reachable(&self) -> Option<&str> {
        self.hosts
            .iter()
            .find(|host| self.probe(host))
            .map(String::as_str)
    }

    fn probe(&self, host: &str) -> bool {
        let addrs = match (host, self.port).to_socket_addrs() {
            Ok(addrs) => addrs,
            Err(e) => {
                log::debug!("[Network] Cannot resolve {}: {}", host, e);
                return false;
            }
        };
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(_) => return true,
                Err(e) => log::debug!("[Network] {} unreachable: {}", addr, e),
            }
        }
        false
    }
}

impl ReachabilityProbe for TcpProbe {
    fn is_reachable(&self) -> bool {
        self.first_reachable().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn local_listener_is_reachable() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let probe = TcpProbe::new(vec!["127.0.0.1".into()], port, Duration::from_millis(500));
        assert!(probe.is_reachable());
        assert_eq!(probe.first_reachable(), Some("127.0.0.1"));
    }

    #[test]
    fn closed_port_is_unreachable() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let probe = TcpProbe::new(vec!["127.0.0.1".into()], port, Duration::from_millis(200));
        assert!(!probe.is_reachable());
    }
}
