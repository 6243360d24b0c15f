//! Fan-out of enriched flows to subscribed listeners (C5).

use std::sync::Mutex;

use tokio::sync::mpsc::{Receiver, Sender};

use crate::flow::record::EnrichedFlow;

/// JSON envelope a façade would serialize onto the flow-stream websocket.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FlowStreamMessage {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub data: EnrichedFlow,
}

/// Holds a set of listener handles. `publish` never blocks the producer:
/// a full or closed channel just marks that listener for removal.
pub struct FlowBroadcaster {
    listeners: Mutex<Vec<Sender<FlowStreamMessage>>>,
}

impl FlowBroadcaster {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self, buffer: usize) -> Receiver<FlowStreamMessage> {
        let (tx, rx) = tokio::sync::mpsc::channel(buffer);
        self.listeners.lock().unwrap().push(tx);
        rx
    }

    /// Send `flow` to every listener, in publish-call order per listener;
    /// listeners whose channel is closed or full are dropped.
    pub fn publish(&self, flow: EnrichedFlow) {
        let message = FlowStreamMessage {
            kind: "flow",
            data: flow,
        };
        let mut listeners = self.listeners.lock().unwrap();
        listeners.retain(|tx| tx.try_send(message.clone()).is_ok());
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }
}

impl Default for FlowBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::record::{enrich, FlowRecord};
    use std::net::Ipv4Addr;

    fn flow() -> EnrichedFlow {
        enrich(FlowRecord {
            version: 5,
            exporter_addr: Ipv4Addr::new(192, 0, 2, 1),
            received_at: 0,
            src_addr: Ipv4Addr::new(10, 0, 0, 1),
            dst_addr: Ipv4Addr::new(10, 0, 0, 2),
            next_hop: Ipv4Addr::UNSPECIFIED,
            src_port: 1,
            dst_port: 2,
            protocol: 6,
            tos: 0,
            tcp_flags: 0,
            src_as: 0,
            dst_as: 0,
            input_snmp: 0,
            output_snmp: 0,
            first_ms: 0,
            last_ms: 1000,
            packets: 1,
            bytes: 1,
        })
    }

    #[tokio::test]
    async fn test_publish_delivers_to_listener() {
        let broadcaster = FlowBroadcaster::new();
        let mut rx = broadcaster.subscribe(4);
        broadcaster.publish(flow());
        let message = rx.recv().await.unwrap();
        assert_eq!(message.kind, "flow");
    }

    #[tokio::test]
    async fn test_dropped_listener_is_removed() {
        let broadcaster = FlowBroadcaster::new();
        {
            let _rx = broadcaster.subscribe(1);
        } // dropped immediately, channel now closed
        assert_eq!(broadcaster.listener_count(), 1);
        broadcaster.publish(flow());
        assert_eq!(broadcaster.listener_count(), 0);
    }
}
