use std::fs::File;
use std::io::{self, Read};
use std::net::IpAddr;

use serde::Deserialize;

struct Defaults {}

impl Defaults {
    fn netflow_bind() -> IpAddr {
        "0.0.0.0".parse().unwrap()
    }
    fn netflow_port() -> u16 {
        2055
    }
    fn bmp_bind() -> IpAddr {
        "0.0.0.0".parse().unwrap()
    }
    fn bmp_port() -> u16 {
        11019
    }
    fn monitoring_api_port() -> u16 {
        5002
    }
    fn max_flows() -> usize {
        10_000
    }
    fn traffic_window_seconds() -> u64 {
        60
    }
    fn window_cleanup_seconds() -> u64 {
        10
    }
    fn aggregate_eval_seconds() -> u64 {
        5
    }
    fn notification_cooldown_seconds() -> u64 {
        60
    }
    fn sync_interval_seconds() -> u64 {
        30
    }
    fn routing_daemon_url() -> String {
        "http://gobgp1:5000/flowspec".to_string()
    }
    fn container_manager_url() -> String {
        "http://container-manager:5000".to_string()
    }
}

/// TOML representation of the server config; missing fields default to the
/// values the original collector used for its environment variables.
#[derive(Debug, Deserialize)]
pub(super) struct ServerConfigSpec {
    #[serde(default = "Defaults::netflow_bind")]
    pub(super) netflow_bind: IpAddr,
    #[serde(default = "Defaults::netflow_port")]
    pub(super) netflow_port: u16,
    #[serde(default = "Defaults::bmp_bind")]
    pub(super) bmp_bind: IpAddr,
    #[serde(default = "Defaults::bmp_port")]
    pub(super) bmp_port: u16,
    #[serde(default = "Defaults::monitoring_api_port")]
    pub(super) monitoring_api_port: u16,
    #[serde(default = "Defaults::max_flows")]
    pub(super) max_flows: usize,
    #[serde(default = "Defaults::traffic_window_seconds")]
    pub(super) traffic_window_seconds: u64,
    #[serde(default = "Defaults::window_cleanup_seconds")]
    pub(super) window_cleanup_seconds: u64,
    #[serde(default = "Defaults::aggregate_eval_seconds")]
    pub(super) aggregate_eval_seconds: u64,
    #[serde(default = "Defaults::notification_cooldown_seconds")]
    pub(super) notification_cooldown_seconds: u64,
    #[serde(default = "Defaults::sync_interval_seconds")]
    pub(super) sync_interval_seconds: u64,
    #[serde(default = "Defaults::routing_daemon_url")]
    pub(super) routing_daemon_url: String,
    #[serde(default = "Defaults::container_manager_url")]
    pub(super) container_manager_url: String,
}

impl ServerConfigSpec {
    pub(super) fn from_file(path: &str) -> io::Result<Self> {
        let mut contents = String::new();
        File::open(path)?.read_to_string(&mut contents)?;
        toml::from_str(&contents).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}
