//! Trigger / Conditions / Action / TriggerEvent types (spec.md §3).

use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::flow::EnrichedFlow;

pub type TriggerId = String;

/// Conjunctive match predicates. Every present field must match for the
/// trigger to fire; `conditions == ∅` (every field `None`) is rejected at
/// creation (spec.md §8, "conjunction over empty is true").
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Conditions {
    pub src_addr: Option<Ipv4Addr>,
    pub dst_addr: Option<Ipv4Addr>,
    pub src_or_dst_addr: Option<Ipv4Addr>,
    pub protocol: Option<u8>,
    pub min_bytes: Option<u64>,
    pub min_kbps: Option<f64>,
    pub min_mbps: Option<f64>,
    pub min_pps: Option<f64>,
}

impl Conditions {
    pub fn is_empty(&self) -> bool {
        self.src_addr.is_none()
            && self.dst_addr.is_none()
            && self.src_or_dst_addr.is_none()
            && self.protocol.is_none()
            && self.min_bytes.is_none()
            && self.min_kbps.is_none()
            && self.min_mbps.is_none()
            && self.min_pps.is_none()
    }

    /// A trigger is eligible for aggregate evaluation only if it carries a
    /// rate predicate (spec.md §3 invariant on Trigger).
    pub fn has_rate_condition(&self) -> bool {
        self.min_kbps.is_some() || self.min_mbps.is_some() || self.min_pps.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Log,
    Alert { message: String },
    Flowspec { rate_limit_kbps: f64 },
    /// An action kind from the sync source this build doesn't recognize;
    /// logged as `unknown_action` rather than silently ignored (spec.md §9).
    Unknown { kind: String },
}

impl Default for Action {
    fn default() -> Self {
        Action::Log
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trigger {
    pub id: TriggerId,
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_cooldown")]
    pub cooldown_seconds: u64,
    pub conditions: Conditions,
    #[serde(default)]
    pub action: Action,
}

fn default_enabled() -> bool {
    true
}

fn default_cooldown() -> u64 {
    60
}

/// A request to create a trigger, prior to ID assignment; same validation
/// rule (non-empty `conditions`) applies. `cooldown_seconds` is left
/// unresolved here when the caller doesn't specify one — `TriggerStore`
/// fills it in from `ServerConfig::notification_cooldown_seconds` rather
/// than a bare literal, so the config knob actually has an effect.
#[derive(Debug, Clone, Deserialize)]
pub struct TriggerSpec {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub cooldown_seconds: Option<u64>,
    pub conditions: Conditions,
    #[serde(default)]
    pub action: Action,
}

/// A shallow-merge patch for `PATCH /triggers/{id}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TriggerPatch {
    pub name: Option<String>,
    pub enabled: Option<bool>,
    pub cooldown_seconds: Option<u64>,
    pub conditions: Option<Conditions>,
    pub action: Option<Action>,
}

impl Trigger {
    pub fn apply_patch(&mut self, patch: TriggerPatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(enabled) = patch.enabled {
            self.enabled = enabled;
        }
        if let Some(cooldown) = patch.cooldown_seconds {
            self.cooldown_seconds = cooldown;
        }
        if let Some(conditions) = patch.conditions {
            self.conditions = conditions;
        }
        if let Some(action) = patch.action {
            self.action = action;
        }
    }
}

/// Record of one dispatch, ring-buffered (bound 1000, see `trigger::store`).
#[derive(Debug, Clone, Serialize)]
pub struct TriggerEvent {
    pub timestamp: DateTime<Utc>,
    pub trigger_id: TriggerId,
    pub trigger_name: String,
    pub captured_flow: EnrichedFlow,
    pub action_type: &'static str,
    pub action_result: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_conditions_detected() {
        assert!(Conditions::default().is_empty());
        let mut c = Conditions::default();
        c.protocol = Some(6);
        assert!(!c.is_empty());
    }

    #[test]
    fn test_rate_condition_eligibility() {
        let mut c = Conditions::default();
        assert!(!c.has_rate_condition());
        c.min_mbps = Some(10.0);
        assert!(c.has_rate_condition());
    }
}
