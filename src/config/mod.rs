mod file;

use std::io;
use std::net::IpAddr;
use std::time::Duration;

/// Parse a TOML config file, then let environment variables override it
/// (env wins over file, file wins over built-in defaults — matching the
/// original collector's `os.environ.get(KEY, default)` layering).
pub fn from_file(path: &str) -> io::Result<ServerConfig> {
    let spec = file::ServerConfigSpec::from_file(path)?;
    Ok(ServerConfig::from_spec(spec).with_env_overrides())
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub netflow_bind: IpAddr,
    pub netflow_port: u16,
    pub bmp_bind: IpAddr,
    pub bmp_port: u16,
    pub monitoring_api_port: u16,
    pub max_flows: usize,
    pub traffic_window_seconds: u64,
    pub window_cleanup_interval: Duration,
    pub aggregate_eval_interval: Duration,
    pub notification_cooldown_seconds: u64,
    pub sync_interval: Duration,
    pub routing_daemon_url: String,
    pub container_manager_url: String,
}

impl ServerConfig {
    fn from_spec(spec: file::ServerConfigSpec) -> Self {
        Self {
            netflow_bind: spec.netflow_bind,
            netflow_port: spec.netflow_port,
            bmp_bind: spec.bmp_bind,
            bmp_port: spec.bmp_port,
            monitoring_api_port: spec.monitoring_api_port,
            max_flows: spec.max_flows,
            traffic_window_seconds: spec.traffic_window_seconds,
            window_cleanup_interval: Duration::from_secs(spec.window_cleanup_seconds),
            aggregate_eval_interval: Duration::from_secs(spec.aggregate_eval_seconds),
            notification_cooldown_seconds: spec.notification_cooldown_seconds,
            sync_interval: Duration::from_secs(spec.sync_interval_seconds),
            routing_daemon_url: spec.routing_daemon_url,
            container_manager_url: spec.container_manager_url,
        }
    }

    /// Overlay environment variables named in spec.md §6, if set.
    fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("BMP_LISTEN_HOST") {
            if let Ok(addr) = v.parse() {
                self.bmp_bind = addr;
            }
        }
        if let Some(v) = env_u16("BMP_LISTEN_PORT") {
            self.bmp_port = v;
        }
        if let Some(v) = env_u16("NETFLOW_PORT") {
            self.netflow_port = v;
        }
        if let Some(v) = env_u16("MONITORING_API_PORT") {
            self.monitoring_api_port = v;
        }
        if let Some(v) = env_u64("TRAFFIC_WINDOW_SECONDS") {
            self.traffic_window_seconds = v;
        }
        if let Some(v) = env_u64("NOTIFICATION_COOLDOWN_SECONDS") {
            self.notification_cooldown_seconds = v;
        }
        if let Some(v) = std::env::var("MAX_FLOWS")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
        {
            self.max_flows = v;
        }
        if let Ok(v) = std::env::var("BGP_API_URL") {
            self.routing_daemon_url = v;
        }
        if let Ok(v) = std::env::var("CONTAINER_MANAGER_URL") {
            self.container_manager_url = v;
        }
        self
    }
}

fn env_u16(key: &str) -> Option<u16> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_config() {
        let mut path = std::env::temp_dir();
        path.push("fluxguard_test_config.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(
            f,
            r#"
            netflow_bind = "0.0.0.0"
            bmp_bind = "0.0.0.0"
            "#
        )
        .unwrap();
        let config = from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.netflow_port, 2055);
        assert_eq!(config.bmp_port, 11019);
        assert_eq!(config.max_flows, 10_000);
        std::fs::remove_file(&path).ok();
    }
}
