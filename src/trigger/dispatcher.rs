//! Action Dispatcher (C9): cooldown suppression, action execution, FlowSpec
//! composition and out-call, event ring, notification fan-out.

use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{info, warn};
use serde::Serialize;
use tokio::sync::mpsc::{Receiver, Sender};

use crate::error::DispatchError;
use crate::flow::record::FlowKey;
use crate::flow::EnrichedFlow;
use crate::trigger::model::{Action, Trigger, TriggerEvent, TriggerId};

const EVENT_RING_CAP: usize = 1000;

/// Cooldown-table cleanup threshold: a single global constant, matching the
/// original collector's `cleanup_threshold = current_time - 120` — it prunes
/// every entry the same way regardless of which trigger owns it, it does not
/// re-read that trigger's own `cooldown_seconds` at cleanup time.
const COOLDOWN_CLEANUP_SECONDS: u64 = 120;

/// JSON envelope a façade would serialize onto the notification websocket.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationMessage {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub severity: &'static str,
    pub trigger_id: TriggerId,
    pub trigger_name: String,
    pub action_result: String,
}

/// Match body posted to the routing daemon.
#[derive(Debug, Serialize)]
struct FlowSpecMatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    destination: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    protocol: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    destination_port: Option<u16>,
}

#[derive(Debug, Serialize)]
struct FlowSpecActions {
    action: &'static str,
    rate: f64,
}

#[derive(Debug, Serialize)]
struct FlowSpecRequest {
    family: &'static str,
    #[serde(rename = "match")]
    match_: FlowSpecMatch,
    actions: FlowSpecActions,
}

pub struct Dispatcher {
    http: reqwest::Client,
    routing_daemon_url: String,
    cooldown: Mutex<HashMap<(TriggerId, FlowKey), Instant>>,
    events: Mutex<VecDeque<TriggerEvent>>,
    notification_listeners: Mutex<Vec<Sender<NotificationMessage>>>,
}

impl Dispatcher {
    pub fn new(http: reqwest::Client, routing_daemon_url: String) -> Self {
        Self {
            http,
            routing_daemon_url,
            cooldown: Mutex::new(HashMap::new()),
            events: Mutex::new(VecDeque::new()),
            notification_listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe_notifications(&self, buffer: usize) -> Receiver<NotificationMessage> {
        let (tx, rx) = tokio::sync::mpsc::channel(buffer);
        self.notification_listeners.lock().unwrap().push(tx);
        rx
    }

    pub fn recent_events(&self, limit: usize) -> Vec<TriggerEvent> {
        let events = self.events.lock().unwrap();
        events.iter().rev().take(limit).cloned().collect()
    }

    /// Run the dispatch state machine from spec.md §4.9 for a single
    /// (trigger, flow) match.
    pub async fn dispatch(&self, trigger: &Trigger, flow: EnrichedFlow) {
        let key = FlowKey::from(&flow);
        let now = Instant::now();
        if self.suppressed_by_cooldown(trigger, &key, now) {
            return;
        }
        self.record_cooldown(trigger, key, now);

        let action_type = action_type_name(&trigger.action);
        let action_result = self.execute_action(trigger, &flow).await;

        let event = TriggerEvent {
            timestamp: Utc::now(),
            trigger_id: trigger.id.clone(),
            trigger_name: trigger.name.clone(),
            captured_flow: flow,
            action_type,
            action_result: action_result.clone(),
        };
        self.push_event(event);
        self.notify(trigger, &action_result);
    }

    fn suppressed_by_cooldown(&self, trigger: &Trigger, key: &FlowKey, now: Instant) -> bool {
        let cooldown = self.cooldown.lock().unwrap();
        match cooldown.get(&(trigger.id.clone(), key.clone())) {
            Some(last) => now.saturating_duration_since(*last).as_secs() < trigger.cooldown_seconds,
            None => false,
        }
    }

    fn record_cooldown(&self, trigger: &Trigger, key: FlowKey, now: Instant) {
        let mut cooldown = self.cooldown.lock().unwrap();
        cooldown.insert((trigger.id.clone(), key), now);
        // Same threshold for every entry, regardless of owning trigger.
        let threshold = Duration::from_secs(COOLDOWN_CLEANUP_SECONDS);
        cooldown.retain(|_, last| now.saturating_duration_since(*last) < threshold);
    }

    async fn execute_action(&self, trigger: &Trigger, flow: &EnrichedFlow) -> String {
        match &trigger.action {
            Action::Log => {
                info!(
                    "trigger '{}' matched flow {}->{}",
                    trigger.name, flow.record.src_addr, flow.record.dst_addr
                );
                "logged".to_string()
            }
            Action::Alert { message } => {
                warn!("trigger '{}' alert: {}", trigger.name, message);
                format!("alert_sent:{}", message)
            }
            Action::Flowspec { rate_limit_kbps } => match self
                .post_flowspec(flow, *rate_limit_kbps)
                .await
            {
                Ok(detail) => format!("flowspec_created:{}", detail),
                Err(e) => format!("flowspec_error:{}", e),
            },
            Action::Unknown { kind } => {
                warn!("trigger '{}' has unknown action kind '{}'", trigger.name, kind);
                format!("unknown_action:{}", kind)
            }
        }
    }

    /// Compose and POST the FlowSpec rule per spec.md §4.9's composition
    /// rule: `src_port` is never included (ephemeral).
    async fn post_flowspec(
        &self,
        flow: &EnrichedFlow,
        rate_limit_kbps: f64,
    ) -> Result<String, DispatchError> {
        let body = FlowSpecRequest {
            family: "ipv4",
            match_: FlowSpecMatch {
                destination: Some(format!("{}/32", flow.record.dst_addr)),
                source: Some(format!("{}/32", flow.record.src_addr)),
                protocol: Some(flow.record.protocol),
                destination_port: Some(flow.record.dst_port),
            },
            actions: FlowSpecActions {
                action: "rate-limit",
                rate: rate_limit_kbps / 1000.0,
            },
        };
        let response = self
            .http
            .post(&self.routing_daemon_url)
            .json(&body)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| DispatchError(e.to_string()))?;
        if response.status().is_success() {
            Ok(format!("{}/32", flow.record.dst_addr))
        } else {
            Err(DispatchError(format!("status {}", response.status())))
        }
    }

    fn push_event(&self, event: TriggerEvent) {
        let mut events = self.events.lock().unwrap();
        events.push_back(event);
        if events.len() > EVENT_RING_CAP {
            events.pop_front();
        }
    }

    fn notify(&self, trigger: &Trigger, action_result: &str) {
        let severity = if matches!(trigger.action, Action::Flowspec { .. }) {
            "warning"
        } else {
            "info"
        };
        let message = NotificationMessage {
            kind: "trigger_event",
            severity,
            trigger_id: trigger.id.clone(),
            trigger_name: trigger.name.clone(),
            action_result: action_result.to_string(),
        };
        let mut listeners = self.notification_listeners.lock().unwrap();
        listeners.retain(|tx| tx.try_send(message.clone()).is_ok());
    }
}

fn action_type_name(action: &Action) -> &'static str {
    match action {
        Action::Log => "log",
        Action::Alert { .. } => "alert",
        Action::Flowspec { .. } => "flowspec",
        Action::Unknown { .. } => "unknown",
    }
}
