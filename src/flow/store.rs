//! Bounded flow ring + counters (C3).

use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;
use std::sync::Mutex;

use crate::flow::record::EnrichedFlow;

#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct Counters {
    pub flows: u64,
    pub packets: u64,
    pub bytes: u64,
}

impl Counters {
    fn add(&mut self, flow: &EnrichedFlow) {
        self.flows += 1;
        self.packets += flow.record.packets;
        self.bytes += flow.record.bytes;
    }
}

#[derive(Default)]
struct Inner {
    ring: VecDeque<EnrichedFlow>,
    total: Counters,
    per_exporter: HashMap<Ipv4Addr, Counters>,
    per_protocol: HashMap<u8, u64>,
    per_talker: HashMap<Ipv4Addr, Counters>,
}

/// A bounded insertion-ordered sequence of enriched flows plus the derived
/// counters described in spec.md §4.3. All mutation happens through
/// [`FlowStore::insert`] so the `sum(per-exporter flows) == total_flows`
/// invariant can never be observed broken.
pub struct FlowStore {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl FlowStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn insert(&self, flow: EnrichedFlow) {
        let mut inner = self.inner.lock().unwrap();
        inner.total.add(&flow);
        inner
            .per_exporter
            .entry(flow.record.exporter_addr)
            .or_default()
            .add(&flow);
        *inner.per_protocol.entry(flow.record.protocol).or_default() += 1;
        inner
            .per_talker
            .entry(flow.record.src_addr)
            .or_default()
            .add(&flow);
        inner
            .per_talker
            .entry(flow.record.dst_addr)
            .or_default()
            .add(&flow);

        inner.ring.push_back(flow);
        if inner.ring.len() > self.capacity {
            inner.ring.pop_front();
        }
    }

    pub fn total(&self) -> Counters {
        self.inner.lock().unwrap().total
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn per_exporter(&self) -> HashMap<Ipv4Addr, Counters> {
        self.inner.lock().unwrap().per_exporter.clone()
    }

    pub fn per_protocol(&self) -> HashMap<u8, u64> {
        self.inner.lock().unwrap().per_protocol.clone()
    }

    /// Most recent `limit` flows, newest last, optionally filtered.
    pub fn recent(
        &self,
        limit: usize,
        src: Option<Ipv4Addr>,
        dst: Option<Ipv4Addr>,
    ) -> Vec<EnrichedFlow> {
        let inner = self.inner.lock().unwrap();
        inner
            .ring
            .iter()
            .rev()
            .filter(|f| src.map_or(true, |s| f.record.src_addr == s))
            .filter(|f| dst.map_or(true, |d| f.record.dst_addr == d))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Sorted by `bytes` or `packets` descending, an address appearing
    /// either as src or dst counted once under [`per_talker`].
    pub fn top_talkers(&self, limit: usize, metric: Metric) -> Vec<(Ipv4Addr, Counters)> {
        let inner = self.inner.lock().unwrap();
        let mut entries: Vec<_> = inner.per_talker.iter().map(|(a, c)| (*a, *c)).collect();
        entries.sort_by(|a, b| metric.value(&b.1).cmp(&metric.value(&a.1)));
        entries.truncate(limit);
        entries
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Metric {
    Bytes,
    Packets,
    Flows,
}

impl Metric {
    fn value(&self, counters: &Counters) -> u64 {
        match self {
            Metric::Bytes => counters.bytes,
            Metric::Packets => counters.packets,
            Metric::Flows => counters.flows,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::record::{enrich, FlowRecord};

    fn flow(src: [u8; 4], dst: [u8; 4], bytes: u64) -> EnrichedFlow {
        enrich(FlowRecord {
            version: 5,
            exporter_addr: Ipv4Addr::new(192, 0, 2, 1),
            received_at: 0,
            src_addr: Ipv4Addr::from(src),
            dst_addr: Ipv4Addr::from(dst),
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
            bytes,
        })
    }

    #[test]
    fn test_capacity_bound() {
        let store = FlowStore::new(2);
        store.insert(flow([10, 0, 0, 1], [10, 0, 0, 2], 1));
        store.insert(flow([10, 0, 0, 1], [10, 0, 0, 2], 2));
        store.insert(flow([10, 0, 0, 1], [10, 0, 0, 2], 3));
        assert_eq!(store.len(), 2);
        assert_eq!(store.total().flows, 3);
    }

    #[test]
    fn test_per_exporter_sums_to_total() {
        let store = FlowStore::new(10);
        store.insert(flow([10, 0, 0, 1], [10, 0, 0, 2], 1));
        store.insert(flow([10, 0, 0, 3], [10, 0, 0, 4], 1));
        let sum: u64 = store.per_exporter().values().map(|c| c.flows).sum();
        assert_eq!(sum, store.total().flows);
    }

    #[test]
    fn test_top_talkers() {
        let store = FlowStore::new(10);
        store.insert(flow([10, 0, 0, 1], [10, 0, 0, 2], 1_000_000)); // A->B
        store.insert(flow([10, 0, 0, 3], [10, 0, 0, 1], 2_000_000)); // C->A
        let top = store.top_talkers(3, Metric::Bytes);
        assert_eq!(top[0].0, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(top[0].1.bytes, 3_000_000);
        assert_eq!(top[1].0, Ipv4Addr::new(10, 0, 0, 3));
        assert_eq!(top[2].0, Ipv4Addr::new(10, 0, 0, 2));
    }
}
