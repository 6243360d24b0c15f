//! Sliding per-IP traffic window (C4).

use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;
use std::sync::Mutex;
use std::time::Instant;

use crate::flow::record::EnrichedFlow;

#[derive(Debug, Clone)]
pub struct TrafficWindowEntry {
    pub time: Instant,
    pub src_addr: Ipv4Addr,
    pub dst_addr: Ipv4Addr,
    pub bytes: u64,
    pub packets: u64,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct AggregateStats {
    pub bytes: u64,
    pub packets: u64,
    pub flows: u64,
    pub bps: f64,
    pub kbps: f64,
    pub mbps: f64,
    pub pps: f64,
}

const HARD_CAP: usize = 10_000;

/// Time-ordered queue of [`TrafficWindowEntry`]. Insertion-order is
/// strictly monotone (invariant ii in spec.md §3), so trimming is always a
/// prefix operation.
pub struct TrafficWindow {
    window: std::time::Duration,
    entries: Mutex<VecDeque<TrafficWindowEntry>>,
}

impl TrafficWindow {
    pub fn new(window_seconds: u64) -> Self {
        Self {
            window: std::time::Duration::from_secs(window_seconds),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Record a flow's contribution to the window and opportunistically
    /// trim the head (spec.md §4.4: "on insertion: optionally trim").
    pub fn record(&self, flow: &EnrichedFlow, now: Instant) {
        let mut entries = self.entries.lock().unwrap();
        entries.push_back(TrafficWindowEntry {
            time: now,
            src_addr: flow.record.src_addr,
            dst_addr: flow.record.dst_addr,
            bytes: flow.record.bytes,
            packets: flow.record.packets,
        });
        Self::trim_locked(&mut entries, self.window, now);
        while entries.len() > HARD_CAP {
            entries.pop_front();
        }
    }

    /// Guaranteed periodic trim, run even under low insertion rates
    /// (spec.md §4.4: "a periodic sweep ≥ every 10s").
    pub fn cleanup(&self, now: Instant) {
        let mut entries = self.entries.lock().unwrap();
        Self::trim_locked(&mut entries, self.window, now);
    }

    fn trim_locked(
        entries: &mut VecDeque<TrafficWindowEntry>,
        window: std::time::Duration,
        now: Instant,
    ) {
        while let Some(front) = entries.front() {
            if now.saturating_duration_since(front.time) > window {
                entries.pop_front();
            } else {
                break;
            }
        }
    }

    /// Per-address aggregate over the window. Both `src_addr` and
    /// `dst_addr` of an entry contribute to that address's aggregate —
    /// a conversation is counted once toward each endpoint, which is
    /// intentional (spec.md §9 open question (a)), not a bug.
    pub fn aggregated_stats(&self, now: Instant) -> HashMap<Ipv4Addr, AggregateStats> {
        let entries = self.entries.lock().unwrap();
        let oldest = entries.front().map(|e| e.time).unwrap_or(now);
        let effective_seconds = self
            .window
            .as_secs()
            .min(now.saturating_duration_since(oldest).as_secs())
            .max(1);

        #[derive(Default)]
        struct Raw {
            bytes: u64,
            packets: u64,
            flows: u64,
        }
        let mut raw: HashMap<Ipv4Addr, Raw> = HashMap::new();
        for entry in entries.iter() {
            let src = raw.entry(entry.src_addr).or_default();
            src.bytes += entry.bytes;
            src.packets += entry.packets;
            src.flows += 1;
            let dst = raw.entry(entry.dst_addr).or_default();
            dst.bytes += entry.bytes;
            dst.packets += entry.packets;
            dst.flows += 1;
        }

        raw.into_iter()
            .map(|(addr, r)| {
                let bps = (r.bytes as f64 * 8.0) / effective_seconds as f64;
                let kbps = bps / 1000.0;
                let mbps = kbps / 1000.0;
                let pps = r.packets as f64 / effective_seconds as f64;
                (
                    addr,
                    AggregateStats {
                        bytes: r.bytes,
                        packets: r.packets,
                        flows: r.flows,
                        bps,
                        kbps,
                        mbps,
                        pps,
                    },
                )
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::record::{enrich, FlowRecord};
    use std::time::Duration;

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
            packets: 10,
            bytes,
        })
    }

    #[test]
    fn test_trim_respects_window() {
        let window = TrafficWindow::new(60);
        let t0 = Instant::now();
        window.record(&flow([10, 0, 0, 1], [10, 0, 0, 2], 1000), t0);
        let later = t0 + Duration::from_secs(61);
        window.cleanup(later);
        assert_eq!(window.len(), 0);
    }

    #[test]
    fn test_aggregated_stats_double_counts_endpoints() {
        let window = TrafficWindow::new(60);
        let t0 = Instant::now();
        window.record(&flow([10, 0, 0, 1], [10, 0, 0, 2], 1000), t0);
        let stats = window.aggregated_stats(t0 + Duration::from_secs(1));
        assert_eq!(stats[&Ipv4Addr::new(10, 0, 0, 1)].bytes, 1000);
        assert_eq!(stats[&Ipv4Addr::new(10, 0, 0, 2)].bytes, 1000);
    }

    #[test]
    fn test_aggregated_stats_only_includes_seen_addresses() {
        let window = TrafficWindow::new(60);
        let t0 = Instant::now();
        window.record(&flow([10, 0, 0, 1], [10, 0, 0, 2], 1000), t0);
        let stats = window.aggregated_stats(t0);
        assert!(!stats.contains_key(&Ipv4Addr::new(10, 0, 0, 3)));
    }
}
