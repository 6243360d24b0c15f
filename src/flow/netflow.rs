//! NetFlow decode (C1). Peeks the 16-bit version field and dispatches;
//! never returns an error — malformed or unsupported input yields an empty
//! record list, matching spec.md §4.1 ("no exceptions escape").

use std::net::Ipv4Addr;

use log::{debug, warn};

use crate::flow::record::FlowRecord;
use crate::utils::{as_u16_be, as_u32_be};

const V5_HEADER_SIZE: usize = 24;
const V5_RECORD_SIZE: usize = 48;

/// Decode a UDP payload from `exporter` into zero or more canonical flow
/// records. `received_at` is the monotonic receipt timestamp (ms) stamped
/// onto every record produced from this datagram.
pub fn parse_netflow(payload: &[u8], exporter: Ipv4Addr, received_at: u64) -> Vec<FlowRecord> {
    if payload.len() < 2 {
        debug!("netflow payload from {} too short to contain a version", exporter);
        return Vec::new();
    }
    let version = as_u16_be([payload[0], payload[1]]);
    match version {
        5 => parse_v5(payload, exporter, received_at),
        9 | 10 => {
            // Template-driven formats: acknowledged and counted, not decoded.
            // See spec.md §9 open question (c).
            debug!(
                "netflow v{} from {} acknowledged but not decoded (known gap)",
                version, exporter
            );
            Vec::new()
        }
        other => {
            warn!("unsupported netflow version {} from {}", other, exporter);
            Vec::new()
        }
    }
}

fn parse_v5(payload: &[u8], exporter: Ipv4Addr, received_at: u64) -> Vec<FlowRecord> {
    if payload.len() < V5_HEADER_SIZE {
        debug!("netflow v5 payload from {} shorter than header", exporter);
        return Vec::new();
    }
    let count = as_u16_be([payload[2], payload[3]]) as usize;
    let mut records = Vec::with_capacity(count);
    for i in 0..count {
        let start = V5_HEADER_SIZE + i * V5_RECORD_SIZE;
        let end = start + V5_RECORD_SIZE;
        if end > payload.len() {
            // Header claimed more records than fit in the payload; stop
            // silently rather than erroring (spec.md §8 "v5 truncation").
            break;
        }
        records.push(parse_v5_record(&payload[start..end], exporter, received_at));
    }
    records
}

fn parse_v5_record(buf: &[u8], exporter: Ipv4Addr, received_at: u64) -> FlowRecord {
    let src_addr = Ipv4Addr::from(as_u32_be([buf[0], buf[1], buf[2], buf[3]]));
    let dst_addr = Ipv4Addr::from(as_u32_be([buf[4], buf[5], buf[6], buf[7]]));
    let next_hop = Ipv4Addr::from(as_u32_be([buf[8], buf[9], buf[10], buf[11]]));
    let input_snmp = as_u16_be([buf[12], buf[13]]);
    let output_snmp = as_u16_be([buf[14], buf[15]]);
    let packets = as_u32_be([buf[16], buf[17], buf[18], buf[19]]) as u64;
    let bytes = as_u32_be([buf[20], buf[21], buf[22], buf[23]]) as u64;
    let first_ms = as_u32_be([buf[24], buf[25], buf[26], buf[27]]);
    let last_ms = as_u32_be([buf[28], buf[29], buf[30], buf[31]]);
    let src_port = as_u16_be([buf[32], buf[33]]);
    let dst_port = as_u16_be([buf[34], buf[35]]);
    // buf[36] is padding/marker, skipped.
    let tcp_flags = buf[37];
    let protocol = buf[38];
    let tos = buf[39];
    let src_as = as_u16_be([buf[40], buf[41]]) as u32;
    let dst_as = as_u16_be([buf[42], buf[43]]) as u32;
    // buf[44] src mask, buf[45] dst mask, buf[46..48] padding: unused here.

    FlowRecord {
        version: 5,
        exporter_addr: exporter,
        received_at,
        src_addr,
        dst_addr,
        next_hop,
        src_port,
        dst_port,
        protocol,
        tos,
        tcp_flags,
        src_as,
        dst_as,
        input_snmp,
        output_snmp,
        first_ms,
        last_ms,
        packets,
        bytes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_v5_record(
        src: [u8; 4],
        dst: [u8; 4],
        src_port: u16,
        dst_port: u16,
        protocol: u8,
        first_ms: u32,
        last_ms: u32,
        packets: u32,
        bytes: u32,
    ) -> Vec<u8> {
        let mut buf = vec![0u8; V5_RECORD_SIZE];
        buf[0..4].copy_from_slice(&src);
        buf[4..8].copy_from_slice(&dst);
        buf[16..20].copy_from_slice(&packets.to_be_bytes());
        buf[20..24].copy_from_slice(&bytes.to_be_bytes());
        buf[24..28].copy_from_slice(&first_ms.to_be_bytes());
        buf[28..32].copy_from_slice(&last_ms.to_be_bytes());
        buf[32..34].copy_from_slice(&src_port.to_be_bytes());
        buf[34..36].copy_from_slice(&dst_port.to_be_bytes());
        buf[38] = protocol;
        buf
    }

    fn encode_v5_packet(records: &[Vec<u8>], claimed_count: u16) -> Vec<u8> {
        let mut buf = vec![0u8; V5_HEADER_SIZE];
        buf[0..2].copy_from_slice(&5u16.to_be_bytes());
        buf[2..4].copy_from_slice(&claimed_count.to_be_bytes());
        for record in records {
            buf.extend_from_slice(record);
        }
        buf
    }

    #[test]
    fn test_v5_round_trip() {
        let records = vec![
            encode_v5_record([10, 0, 0, 1], [10, 0, 0, 2], 4000, 80, 6, 0, 1000, 200, 200_000),
            encode_v5_record([10, 0, 0, 3], [10, 0, 0, 4], 4001, 443, 6, 0, 500, 50, 10_000),
        ];
        let packet = encode_v5_packet(&records, 2);
        let parsed = parse_netflow(&packet, Ipv4Addr::new(192, 0, 2, 1), 0);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].src_addr, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(parsed[0].dst_port, 80);
        assert_eq!(parsed[0].protocol, 6);
        assert_eq!(parsed[0].bytes, 200_000);
        assert_eq!(parsed[1].src_addr, Ipv4Addr::new(10, 0, 0, 3));
    }

    #[test]
    fn test_v5_truncation_drops_incomplete_records() {
        let records = vec![
            encode_v5_record([10, 0, 0, 1], [10, 0, 0, 2], 1, 1, 6, 0, 1000, 1, 1),
            encode_v5_record([10, 0, 0, 1], [10, 0, 0, 2], 1, 1, 6, 0, 1000, 1, 1),
            encode_v5_record([10, 0, 0, 1], [10, 0, 0, 2], 1, 1, 6, 0, 1000, 1, 1),
        ];
        // Header claims 5 records but only 3 fit in the payload.
        let packet = encode_v5_packet(&records, 5);
        let parsed = parse_netflow(&packet, Ipv4Addr::new(192, 0, 2, 1), 0);
        assert_eq!(parsed.len(), 3);
    }

    #[test]
    fn test_v9_acknowledged_not_decoded() {
        let mut buf = vec![0u8; V5_HEADER_SIZE];
        buf[0..2].copy_from_slice(&9u16.to_be_bytes());
        let parsed = parse_netflow(&buf, Ipv4Addr::new(192, 0, 2, 1), 0);
        assert!(parsed.is_empty());
    }

    #[test]
    fn test_unknown_version_yields_no_records() {
        let buf = [0x00, 0x08];
        let parsed = parse_netflow(&buf, Ipv4Addr::new(192, 0, 2, 1), 0);
        assert!(parsed.is_empty());
    }
}
