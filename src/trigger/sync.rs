//! Trigger Synchronizer (C13): periodic pull from the topology/trigger
//! source, folding flat DB rows into the internal `Trigger` shape.

use log::{debug, warn};
use serde::Deserialize;

use crate::error::SyncError;
use crate::trigger::model::{Action, Conditions, Trigger};
use crate::trigger::store::TriggerStore;

#[derive(Debug, Deserialize)]
struct ActiveTopology {
    name: String,
}

/// Flat row shape returned by the topology database, folded into the
/// nested `Conditions`/`Action` sum types (spec.md §9: "replace with
/// tagged-variant records").
#[derive(Debug, Deserialize)]
struct TriggerRow {
    id: String,
    name: String,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    cooldown_seconds: Option<u64>,
    src_addr: Option<std::net::Ipv4Addr>,
    dst_addr: Option<std::net::Ipv4Addr>,
    src_or_dst_addr: Option<std::net::Ipv4Addr>,
    protocol: Option<u8>,
    min_bytes: Option<u64>,
    min_kbps: Option<f64>,
    min_mbps: Option<f64>,
    min_pps: Option<f64>,
    #[serde(default)]
    action_type: Option<String>,
    action_message: Option<String>,
    rate_limit_kbps: Option<f64>,
}

fn default_true() -> bool {
    true
}

impl TriggerRow {
    /// Fold a flat DB row into the nested `Trigger` shape. `default_cooldown_seconds`
    /// (`ServerConfig::notification_cooldown_seconds`) backs rows that don't
    /// set their own `cooldown_seconds`.
    fn into_trigger(self, default_cooldown_seconds: u64) -> Trigger {
        let action = match self.action_type.as_deref() {
            Some("alert") => Action::Alert {
                message: self.action_message.unwrap_or_default(),
            },
            Some("flowspec") => Action::Flowspec {
                rate_limit_kbps: self.rate_limit_kbps.unwrap_or(0.0),
            },
            Some("log") | None => Action::Log,
            Some(other) => Action::Unknown {
                kind: other.to_string(),
            },
        };
        Trigger {
            id: self.id,
            name: self.name,
            enabled: self.enabled,
            cooldown_seconds: self.cooldown_seconds.unwrap_or(default_cooldown_seconds),
            conditions: Conditions {
                src_addr: self.src_addr,
                dst_addr: self.dst_addr,
                src_or_dst_addr: self.src_or_dst_addr,
                protocol: self.protocol,
                min_bytes: self.min_bytes,
                min_kbps: self.min_kbps,
                min_mbps: self.min_mbps,
                min_pps: self.min_pps,
            },
            action,
        }
    }
}

pub struct Synchronizer {
    http: reqwest::Client,
    base_url: String,
    default_cooldown_seconds: u64,
}

impl Synchronizer {
    pub fn new(http: reqwest::Client, base_url: String, default_cooldown_seconds: u64) -> Self {
        Self {
            http,
            base_url,
            default_cooldown_seconds,
        }
    }

    /// GET the active topology, then its triggers, and reconcile into
    /// `store`. HTTP failures are logged and leave the store untouched
    /// (spec.md §4.13, §7).
    pub async fn sync(&self, store: &TriggerStore) -> Result<bool, SyncError> {
        let topology = match self.fetch_active_topology().await {
            Ok(Some(t)) => t,
            Ok(None) => {
                debug!("no active topology; trigger sync skipped this pass");
                return Ok(false);
            }
            Err(e) => {
                warn!("trigger sync: failed to fetch active topology: {}", e);
                return Err(e);
            }
        };

        let rows = match self.fetch_triggers(&topology.name).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("trigger sync: failed to fetch triggers for '{}': {}", topology.name, e);
                return Err(e);
            }
        };

        let triggers: Vec<Trigger> = rows
            .into_iter()
            .map(|row| row.into_trigger(self.default_cooldown_seconds))
            .collect();
        Ok(store.reconcile(triggers).await)
    }

    async fn fetch_active_topology(&self) -> Result<Option<ActiveTopology>, SyncError> {
        let url = format!("{}/topologies/active", self.base_url);
        let response = self
            .http
            .get(&url)
            .timeout(std::time::Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| SyncError(e.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        response
            .json::<ActiveTopology>()
            .await
            .map(Some)
            .map_err(|e| SyncError(e.to_string()))
    }

    async fn fetch_triggers(&self, topology_name: &str) -> Result<Vec<TriggerRow>, SyncError> {
        let url = format!("{}/topologies/{}/triggers", self.base_url, topology_name);
        self.http
            .get(&url)
            .timeout(std::time::Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| SyncError(e.to_string()))?
            .json::<Vec<TriggerRow>>()
            .await
            .map_err(|e| SyncError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_folds_flat_fields_into_conditions() {
        let row = TriggerRow {
            id: "t1".to_string(),
            name: "fanout".to_string(),
            enabled: true,
            cooldown_seconds: Some(60),
            src_addr: None,
            dst_addr: Some(std::net::Ipv4Addr::new(10, 0, 0, 2)),
            src_or_dst_addr: None,
            protocol: None,
            min_bytes: None,
            min_kbps: None,
            min_mbps: Some(10.0),
            min_pps: None,
            action_type: Some("flowspec".to_string()),
            action_message: None,
            rate_limit_kbps: Some(500.0),
        };
        let trigger: Trigger = row.into_trigger(60);
        assert_eq!(trigger.conditions.dst_addr, Some(std::net::Ipv4Addr::new(10, 0, 0, 2)));
        assert_eq!(trigger.conditions.min_mbps, Some(10.0));
        assert!(matches!(trigger.action, Action::Flowspec { rate_limit_kbps } if rate_limit_kbps == 500.0));
    }

    #[test]
    fn test_unknown_action_type_becomes_unknown_variant() {
        let row = TriggerRow {
            id: "t1".to_string(),
            name: "t1".to_string(),
            enabled: true,
            cooldown_seconds: Some(60),
            src_addr: None,
            dst_addr: None,
            src_or_dst_addr: None,
            protocol: Some(6),
            min_bytes: None,
            min_kbps: None,
            min_mbps: None,
            min_pps: None,
            action_type: Some("redirect".to_string()),
            action_message: None,
            rate_limit_kbps: None,
        };
        let trigger: Trigger = row.into_trigger(60);
        assert!(matches!(trigger.action, Action::Unknown { kind } if kind == "redirect"));
    }

    #[test]
    fn test_row_without_cooldown_uses_configured_default() {
        let row = TriggerRow {
            id: "t1".to_string(),
            name: "t1".to_string(),
            enabled: true,
            cooldown_seconds: None,
            src_addr: None,
            dst_addr: None,
            src_or_dst_addr: None,
            protocol: Some(6),
            min_bytes: None,
            min_kbps: None,
            min_mbps: None,
            min_pps: None,
            action_type: None,
            action_message: None,
            rate_limit_kbps: None,
        };
        let trigger: Trigger = row.into_trigger(300);
        assert_eq!(trigger.cooldown_seconds, 300);
    }
}
