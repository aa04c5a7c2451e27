use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::Deserialize;

use crate::{Error, Result};

/// Network identity of the paired controller and of this host.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "snake_case")]
pub struct Config {
    pub remote_address: IpAddr,
    pub remote_port: u16,
    /// Address advertised in the discovery broadcast.
    pub local_address: IpAddr,
    pub discovery_port: u16,
    pub broadcast_address: IpAddr,
    /// Interface the callback listener binds to.
    pub bind_address: IpAddr,
    /// Port the controller calls back on after discovery.
    pub listen_port: u16,
    /// Log raw wire frames at debug level instead of trace.
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            remote_address: IpAddr::V4(Ipv4Addr::new(192, 168, 10, 10)),
            remote_port: 10002,
            local_address: IpAddr::V4(Ipv4Addr::new(192, 168, 10, 8)),
            discovery_port: 10001,
            broadcast_address: IpAddr::V4(Ipv4Addr::BROADCAST),
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            listen_port: 10003,
            verbose: false,
        }
    }
}

impl Config {
    pub fn from_json_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn from_json_file(path: &str) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn remote(&self) -> SocketAddr {
        SocketAddr::new(self.remote_address, self.remote_port)
    }

    pub fn broadcast_target(&self) -> SocketAddr {
        SocketAddr::new(self.broadcast_address, self.discovery_port)
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.listen_port)
    }
}

/// Time constants of the session protocol.
#[derive(Debug, Clone, PartialEq)]
pub struct Timing {
    pub discovery_timeout: Duration,
    /// Bound on outbound connect and on every read from the device.
    pub connect_timeout: Duration,
    /// The controller drops sessions shortly after this; we leave first.
    pub session_budget: Duration,
    pub debounce_window: Duration,
    pub teardown_delay: Duration,
    pub dispatch_delay: Duration,
    pub cycle_interval: Duration,
    pub tick_interval: Duration,
    pub start_delay: Duration,
    pub max_attempts: u8,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            discovery_timeout: Duration::from_secs(7),
            connect_timeout: Duration::from_secs(5),
            session_budget: Duration::from_secs(205),
            debounce_window: Duration::from_secs(5),
            teardown_delay: Duration::from_secs(1),
            dispatch_delay: Duration::from_secs(1),
            cycle_interval: Duration::from_secs(210),
            tick_interval: Duration::from_secs(2),
            start_delay: Duration::from_secs(10),
            max_attempts: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = Config::from_json_str(r#"{"remote_address": "10.0.0.5", "verbose": true}"#)
            .unwrap();
        assert_eq!(config.remote(), "10.0.0.5:10002".parse().unwrap());
        assert!(config.verbose);
        assert_eq!(config.listen_port, 10003);
        assert_eq!(config.broadcast_target(), "255.255.255.255:10001".parse().unwrap());
        assert_eq!(config.listen_addr(), "0.0.0.0:10003".parse().unwrap());
    }

    #[test]
    fn listener_binds_configured_interface() {
        let config = Config::from_json_str(r#"{"bind_address": "127.0.0.1", "listen_port": 4000}"#)
            .unwrap();
        assert_eq!(config.listen_addr(), "127.0.0.1:4000".parse().unwrap());
    }

    #[test]
    fn bad_json_is_config_error() {
        let err = Config::from_json_str(r#"{"remote_port": "many"}"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)), "got {err:?}");
    }

    #[test]
    fn session_budget_leaves_room_before_next_cycle() {
        let timing = Timing::default();
        assert!(timing.session_budget < timing.cycle_interval);
        assert!(timing.tick_interval < timing.debounce_window);
    }
}
