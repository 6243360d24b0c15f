//! Aggregate Evaluator (C8): periodically matches per-IP window aggregates
//! against rate-bearing triggers, synthesizing pseudo-flows for matches.

use std::net::Ipv4Addr;

use crate::flow::record::FlowRecord;
use crate::flow::{AggregateStats, EnrichedFlow};
use crate::trigger::model::{Conditions, Trigger};

/// Address-equality check matching the aggregate's single address against
/// both `src_addr` and `dst_addr`/`src_or_dst_addr` conditions, per
/// spec.md §4.8 ("same semantics as C7, but matching the aggregate's
/// single address against both conditions as applicable").
fn address_matches(conditions: &Conditions, addr: Ipv4Addr) -> bool {
    if let Some(a) = conditions.src_addr {
        if a != addr {
            return false;
        }
    }
    if let Some(a) = conditions.dst_addr {
        if a != addr {
            return false;
        }
    }
    if let Some(a) = conditions.src_or_dst_addr {
        if a != addr {
            return false;
        }
    }
    true
}

fn rate_matches(conditions: &Conditions, stats: &AggregateStats) -> bool {
    if let Some(min_kbps) = conditions.min_kbps {
        if stats.kbps < min_kbps {
            return false;
        }
    }
    if let Some(min_mbps) = conditions.min_mbps {
        if stats.mbps < min_mbps {
            return false;
        }
    }
    if let Some(min_pps) = conditions.min_pps {
        if stats.pps < min_pps {
            return false;
        }
    }
    true
}

/// Build the synthetic pseudo-flow described in spec.md §4.8:
/// `src_addr = dst_addr = address`, rates from the aggregate, `aggregated = true`.
pub fn pseudo_flow(addr: Ipv4Addr, stats: &AggregateStats) -> EnrichedFlow {
    let record = FlowRecord {
        version: 0,
        exporter_addr: addr,
        received_at: 0,
        src_addr: addr,
        dst_addr: addr,
        next_hop: Ipv4Addr::UNSPECIFIED,
        src_port: 0,
        dst_port: 0,
        protocol: 0,
        tos: 0,
        tcp_flags: 0,
        src_as: 0,
        dst_as: 0,
        input_snmp: 0,
        output_snmp: 0,
        first_ms: 0,
        last_ms: 0,
        packets: stats.packets,
        bytes: stats.bytes,
    };
    EnrichedFlow {
        record,
        duration_ms: 0,
        bps: stats.bps,
        kbps: stats.kbps,
        mbps: stats.mbps,
        pps: stats.pps,
        aggregated: true,
    }
}

/// One (trigger, pseudo-flow) match, ready for the Dispatcher. Note the
/// pseudo-flow's `FlowKey` uses `dst_port = 0` since there is no port in an
/// aggregate match; cooldown is still scoped per trigger+address this way.
pub struct AggregateMatch<'a> {
    pub trigger: &'a Trigger,
    pub flow: EnrichedFlow,
}

/// Evaluate every rate-eligible, enabled trigger against the aggregate
/// snapshot. Returns nothing if no trigger carries a rate predicate
/// (spec.md §4.8: "skips if there are no triggers with any rate predicate").
pub fn evaluate<'a>(
    aggregates: &std::collections::HashMap<Ipv4Addr, AggregateStats>,
    triggers: impl Iterator<Item = &'a Trigger>,
) -> Vec<AggregateMatch<'a>> {
    let eligible: Vec<&Trigger> = triggers
        .filter(|t| t.enabled)
        .filter(|t| t.conditions.has_rate_condition())
        .collect();
    if eligible.is_empty() {
        return Vec::new();
    }
    let mut matches = Vec::new();
    for (addr, stats) in aggregates {
        for trigger in &eligible {
            if address_matches(&trigger.conditions, *addr) && rate_matches(&trigger.conditions, stats)
            {
                matches.push(AggregateMatch {
                    trigger,
                    flow: pseudo_flow(*addr, stats),
                });
            }
        }
    }
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::model::Action;

    fn trigger(conditions: Conditions) -> Trigger {
        Trigger {
            id: "t1".to_string(),
            name: "fanout".to_string(),
            enabled: true,
            cooldown_seconds: 60,
            conditions,
            action: Action::Flowspec {
                rate_limit_kbps: 500.0,
            },
        }
    }

    #[test]
    fn test_skips_when_no_rate_triggers() {
        let mut aggregates = std::collections::HashMap::new();
        aggregates.insert(
            Ipv4Addr::new(10, 0, 0, 2),
            AggregateStats {
                bytes: 1,
                packets: 1,
                flows: 1,
                bps: 1.0,
                kbps: 1.0,
                mbps: 1.0,
                pps: 1.0,
            },
        );
        let t = trigger(Conditions {
            protocol: Some(6),
            ..Default::default()
        });
        assert!(evaluate(&aggregates, std::iter::once(&t)).is_empty());
    }

    #[test]
    fn test_fires_on_fanout_aggregate() {
        let mut aggregates = std::collections::HashMap::new();
        aggregates.insert(
            Ipv4Addr::new(10, 0, 0, 2),
            AggregateStats {
                bytes: 20_000_000,
                packets: 100_000,
                flows: 100,
                bps: 160_000_000.0,
                kbps: 160_000.0,
                mbps: 160.0,
                pps: 100_000.0,
            },
        );
        let t = trigger(Conditions {
            dst_addr: Some(Ipv4Addr::new(10, 0, 0, 2)),
            min_mbps: Some(10.0),
            ..Default::default()
        });
        let matches = evaluate(&aggregates, std::iter::once(&t));
        assert_eq!(matches.len(), 1);
        assert!(matches[0].flow.aggregated);
    }
}
