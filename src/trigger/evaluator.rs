//! Per-Flow Evaluator (C7).

use crate::flow::EnrichedFlow;
use crate::trigger::model::{Conditions, Trigger};

/// Evaluate `conditions` against a single enriched flow, short-circuiting
/// on the first failing predicate, in the order spec.md §4.7 lists them.
pub fn matches_flow(conditions: &Conditions, flow: &EnrichedFlow) -> bool {
    if let Some(addr) = conditions.src_addr {
        if flow.record.src_addr != addr {
            return false;
        }
    }
    if let Some(addr) = conditions.dst_addr {
        if flow.record.dst_addr != addr {
            return false;
        }
    }
    if let Some(addr) = conditions.src_or_dst_addr {
        if flow.record.src_addr != addr && flow.record.dst_addr != addr {
            return false;
        }
    }
    if let Some(protocol) = conditions.protocol {
        if flow.record.protocol != protocol {
            return false;
        }
    }
    if let Some(min_kbps) = conditions.min_kbps {
        if flow.kbps < min_kbps {
            return false;
        }
    }
    if let Some(min_mbps) = conditions.min_mbps {
        if flow.mbps < min_mbps {
            return false;
        }
    }
    if let Some(min_pps) = conditions.min_pps {
        if flow.pps < min_pps {
            return false;
        }
    }
    if let Some(min_bytes) = conditions.min_bytes {
        if flow.record.bytes < min_bytes {
            return false;
        }
    }
    true
}

/// Triggers an enriched flow matches, skipping evaluation entirely when
/// `kbps == 0` (duration unknown — spec.md §4.7, §9 open question (b)).
/// Per-flow evaluation is otherwise stateless; cooldown lives in the
/// dispatcher.
pub fn evaluate<'a>(
    flow: &EnrichedFlow,
    triggers: impl Iterator<Item = &'a Trigger>,
) -> Vec<&'a Trigger> {
    if flow.kbps == 0.0 {
        return Vec::new();
    }
    triggers
        .filter(|t| t.enabled)
        .filter(|t| matches_flow(&t.conditions, flow))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::record::{enrich, FlowRecord};
    use crate::trigger::model::Action;
    use std::net::Ipv4Addr;

    fn flow(dst_port: u16, bytes: u64) -> EnrichedFlow {
        enrich(FlowRecord {
            version: 5,
            exporter_addr: Ipv4Addr::new(192, 0, 2, 1),
            received_at: 0,
            src_addr: Ipv4Addr::new(10, 0, 0, 1),
            dst_addr: Ipv4Addr::new(10, 0, 0, 2),
            next_hop: Ipv4Addr::UNSPECIFIED,
            src_port: 4000,
            dst_port,
            protocol: 6,
            tos: 0,
            tcp_flags: 0,
            src_as: 0,
            dst_as: 0,
            input_snmp: 0,
            output_snmp: 0,
            first_ms: 0,
            last_ms: 1000,
            packets: 200,
            bytes,
        })
    }

    fn trigger(conditions: Conditions) -> Trigger {
        Trigger {
            id: "t1".to_string(),
            name: "t1".to_string(),
            enabled: true,
            cooldown_seconds: 60,
            conditions,
            action: Action::Log,
        }
    }

    #[test]
    fn test_rate_threshold_matches() {
        let t = trigger(Conditions {
            min_kbps: Some(1000.0),
            ..Default::default()
        });
        let f = flow(80, 200_000); // kbps = 1600
        assert!(matches_flow(&t.conditions, &f));
    }

    #[test]
    fn test_rate_threshold_rejects_below() {
        let t = trigger(Conditions {
            min_kbps: Some(2000.0),
            ..Default::default()
        });
        let f = flow(80, 200_000); // kbps = 1600
        assert!(!matches_flow(&t.conditions, &f));
    }

    #[test]
    fn test_zero_kbps_flow_skips_per_flow_evaluation() {
        let mut f = flow(80, 200_000);
        f.kbps = 0.0;
        let t = trigger(Conditions {
            min_bytes: Some(1),
            ..Default::default()
        });
        let matches = evaluate(&f, std::iter::once(&t));
        assert!(matches.is_empty());
    }

    #[test]
    fn test_adding_a_condition_only_narrows_matches() {
        let f = flow(80, 200_000);
        let loose = trigger(Conditions {
            protocol: Some(6),
            ..Default::default()
        });
        let strict = trigger(Conditions {
            protocol: Some(6),
            dst_addr: Some(Ipv4Addr::new(10, 0, 0, 99)),
            ..Default::default()
        });
        assert!(matches_flow(&loose.conditions, &f));
        assert!(!matches_flow(&strict.conditions, &f));
    }

    #[test]
    fn test_disabled_trigger_never_matches() {
        let mut t = trigger(Conditions {
            protocol: Some(6),
            ..Default::default()
        });
        t.enabled = false;
        let f = flow(80, 200_000);
        assert!(evaluate(&f, std::iter::once(&t)).is_empty());
    }
}
