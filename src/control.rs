//! Control surface (spec.md §6): the operations a façade (out of scope for
//! this crate) would call over HTTP/WS. Exposed here as plain async methods
//! on [`Supervisor`] so that surface can be added later without touching any
//! collector internals.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use crate::bmp::message::{PeerKey, Route};
use crate::bmp::route::RibKind;
use crate::bmp::PeerInfo;
use crate::error::ControlError;
use crate::flow::{AggregateStats, Counters, EnrichedFlow, Metric};
use crate::supervisor::Supervisor;
use crate::trigger::{Trigger, TriggerEvent, TriggerId, TriggerPatch, TriggerSpec};

impl Supervisor {
    pub fn stats(&self) -> Counters {
        self.flow_store.total()
    }

    pub fn recent_flows(
        &self,
        limit: usize,
        src: Option<Ipv4Addr>,
        dst: Option<Ipv4Addr>,
    ) -> Vec<EnrichedFlow> {
        self.flow_store.recent(limit, src, dst)
    }

    pub fn top_talkers(&self, limit: usize, metric: Metric) -> Vec<(Ipv4Addr, Counters)> {
        self.flow_store.top_talkers(limit, metric)
    }

    pub fn protocol_counts(&self) -> HashMap<u8, u64> {
        self.flow_store.per_protocol()
    }

    pub fn per_exporter_counts(&self) -> HashMap<Ipv4Addr, Counters> {
        self.flow_store.per_exporter()
    }

    pub fn traffic_window(&self) -> HashMap<Ipv4Addr, AggregateStats> {
        self.traffic_window
            .aggregated_stats(std::time::Instant::now())
    }

    pub async fn list_triggers(&self) -> Vec<Trigger> {
        self.trigger_store.list().await
    }

    pub async fn create_trigger(&self, spec: TriggerSpec) -> Result<TriggerId, ControlError> {
        self.trigger_store.create(spec).await
    }

    pub async fn patch_trigger(&self, id: &str, patch: TriggerPatch) -> Result<(), ControlError> {
        self.trigger_store.patch(id, patch).await
    }

    pub async fn delete_trigger(&self, id: &str) -> Result<(), ControlError> {
        self.trigger_store.delete(id).await
    }

    /// Run a synchronizer pass immediately, outside its regular timer tick.
    pub async fn force_sync(&self) -> Result<bool, crate::error::SyncError> {
        self.synchronizer.sync(&self.trigger_store).await
    }

    pub fn triggered_events(&self, limit: usize) -> Vec<TriggerEvent> {
        self.dispatcher.recent_events(limit)
    }

    pub async fn list_peers(&self) -> Vec<PeerInfo> {
        self.peer_registry.list().await
    }

    pub async fn list_routes(&self, peer: &PeerKey, kind: RibKind) -> Vec<Route> {
        self.route_store.routes_for(peer, kind).await
    }

    pub async fn route_count(&self) -> usize {
        self.route_store.route_count().await
    }
}
