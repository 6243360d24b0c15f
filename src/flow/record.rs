//! FlowRecord / EnrichedFlow (C1 output, C2) and the cooldown FlowKey.

use std::net::Ipv4Addr;

use serde::Serialize;

/// Canonical post-parse flow record. Produced by the NetFlow parser (C1),
/// never mutated after [`enrich`] adds the derived rate fields.
#[derive(Debug, Clone, Serialize)]
pub struct FlowRecord {
    pub version: u16,
    pub exporter_addr: Ipv4Addr,
    /// Monotonic receipt timestamp (ms), not wall-clock.
    pub received_at: u64,
    pub src_addr: Ipv4Addr,
    pub dst_addr: Ipv4Addr,
    pub next_hop: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u8,
    pub tos: u8,
    pub tcp_flags: u8,
    pub src_as: u32,
    pub dst_as: u32,
    pub input_snmp: u16,
    pub output_snmp: u16,
    /// Exporter-relative milliseconds since boot when the flow was first seen.
    pub first_ms: u32,
    /// Exporter-relative milliseconds since boot when the flow was last seen.
    pub last_ms: u32,
    pub packets: u64,
    pub bytes: u64,
}

/// `FlowRecord` plus rates derived by the enricher (C2).
#[derive(Debug, Clone, Serialize)]
pub struct EnrichedFlow {
    #[serde(flatten)]
    pub record: FlowRecord,
    pub duration_ms: u32,
    pub bps: f64,
    pub kbps: f64,
    pub mbps: f64,
    pub pps: f64,
    /// True for synthetic pseudo-flows produced by the aggregate evaluator (C8).
    pub aggregated: bool,
}

/// Pure enrichment function (C2). Never panics; zero duration yields zero
/// rates rather than NaN/inf.
pub fn enrich(record: FlowRecord) -> EnrichedFlow {
    let duration_ms = record.last_ms.saturating_sub(record.first_ms);
    let (bps, kbps, mbps, pps) = if duration_ms == 0 {
        (0.0, 0.0, 0.0, 0.0)
    } else {
        let duration_sec = duration_ms as f64 / 1000.0;
        let bps = (record.bytes as f64 * 8.0) / duration_sec;
        let kbps = bps / 1000.0;
        let mbps = kbps / 1000.0;
        let pps = record.packets as f64 / duration_sec;
        (
            round_to(bps, 2),
            round_to(kbps, 2),
            round_to(mbps, 4),
            round_to(pps, 2),
        )
    };
    EnrichedFlow {
        record,
        duration_ms,
        bps,
        kbps,
        mbps,
        pps,
        aggregated: false,
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Cooldown identity for a flow: `src_port` is intentionally excluded so
/// ephemeral-port churn doesn't reset the dispatcher's cooldown.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub src_addr: Ipv4Addr,
    pub dst_addr: Ipv4Addr,
    pub dst_port: u16,
    pub protocol: u8,
}

impl From<&EnrichedFlow> for FlowKey {
    fn from(flow: &EnrichedFlow) -> Self {
        FlowKey {
            src_addr: flow.record.src_addr,
            dst_addr: flow.record.dst_addr,
            dst_port: flow.record.dst_port,
            protocol: flow.record.protocol,
        }
    }
}
