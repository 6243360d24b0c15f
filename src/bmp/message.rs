//! BMP Parser (C11): per-peer header, embedded BGP UPDATE, path attributes,
//! and NLRI decode for IPv4 unicast, VPNv4, and FlowSpec.
//!
//! Hand-rolled rather than built on a general BGP library: the VPNv4 and
//! FlowSpec NLRI shapes this collector needs to decode are narrower than a
//! full BGP speaker's attribute set, and staying in direct control of the
//! byte layout keeps the "never drop the connection on a malformed
//! attribute" rule (spec.md §4.11) easy to uphold at exactly the per-message
//! granularity the spec calls for.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use chrono::{DateTime, Utc};

use crate::error::BmpParseError;
use crate::utils::{as_u16_be, as_u32_be};

pub const MSG_ROUTE_MONITORING: u8 = 0;
pub const MSG_STATISTICS: u8 = 1;
pub const MSG_PEER_DOWN: u8 = 2;
pub const MSG_PEER_UP: u8 = 3;
pub const MSG_INITIATION: u8 = 4;
pub const MSG_TERMINATION: u8 = 5;
pub const MSG_ROUTE_MIRRORING: u8 = 6;

const PER_PEER_HEADER_SIZE: usize = 42;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerKey {
    pub address: IpAddr,
    pub asn: u32,
}

impl std::fmt::Display for PeerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}_{}", self.address, self.asn)
    }
}

#[derive(Debug, Clone)]
pub struct PeerHeader {
    pub key: PeerKey,
    pub peer_type: u8,
    pub is_ipv6: bool,
    /// L-flag: set ⇒ Loc-RIB / advertised, clear ⇒ Adj-RIB-In / received.
    pub is_post_policy: bool,
    pub peer_bgp_id: Ipv4Addr,
}

/// Parse the 42-byte RFC 7854 per-peer header. The full 16-byte address
/// field is kept when the IPv6 flag is set — collapsing it to its last 4
/// bytes would let two distinct IPv6 peers collide onto the same key — and
/// read as an IPv4 address from its last 4 bytes otherwise.
pub fn parse_peer_header(buf: &[u8]) -> Result<PeerHeader, BmpParseError> {
    if buf.len() < PER_PEER_HEADER_SIZE {
        return Err(BmpParseError(format!(
            "per-peer header too short ({} bytes)",
            buf.len()
        )));
    }
    let peer_type = buf[0];
    let peer_flags = buf[1];
    let is_ipv6 = peer_flags & 0x80 != 0;
    let is_post_policy = peer_flags & 0x01 != 0;
    // bytes 2..10 peer distinguisher, unused for this collector.
    let addr_field = &buf[10..26];
    let address = if is_ipv6 {
        let mut octets = [0u8; 16];
        octets.copy_from_slice(addr_field);
        IpAddr::V6(Ipv6Addr::from(octets))
    } else {
        IpAddr::V4(Ipv4Addr::from(as_u32_be([
            addr_field[12],
            addr_field[13],
            addr_field[14],
            addr_field[15],
        ])))
    };
    let asn = as_u32_be([buf[26], buf[27], buf[28], buf[29]]);
    let peer_bgp_id = Ipv4Addr::from(as_u32_be([buf[30], buf[31], buf[32], buf[33]]));

    Ok(PeerHeader {
        key: PeerKey { address, asn },
        peer_type,
        is_ipv6,
        is_post_policy,
        peer_bgp_id,
    })
}

#[derive(Debug, Clone, Default)]
pub struct PathAttributes {
    pub origin: Option<&'static str>,
    pub as_path: Vec<u32>,
    pub next_hop: Option<Ipv4Addr>,
    pub med: Option<u32>,
    pub local_pref: Option<u32>,
    pub communities: Vec<String>,
    pub mp_reach: Option<MpReach>,
}

#[derive(Debug, Clone)]
pub struct MpReach {
    pub afi: u16,
    pub safi: u8,
    pub nlri: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct FlowSpecRule {
    pub destination: Option<String>,
    pub source: Option<String>,
    pub protocol: Option<u8>,
    pub port: Option<u16>,
    pub dest_port: Option<u16>,
    pub src_port: Option<u16>,
}

impl FlowSpecRule {
    /// `flowspec:{dest|source|unknown}` — the Route Store dedup key for a
    /// flowspec route (spec.md §3).
    pub fn dedup_suffix(&self) -> String {
        self.destination
            .clone()
            .or_else(|| self.source.clone())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

#[derive(Debug, Clone)]
pub enum Route {
    Unicast {
        prefix: String,
        next_hop: Option<Ipv4Addr>,
        as_path: Vec<u32>,
        communities: Vec<String>,
        local_pref: Option<u32>,
        med: Option<u32>,
        origin: Option<&'static str>,
        timestamp: DateTime<Utc>,
    },
    Vpn {
        prefix: String,
        rd: String,
        labels: Vec<u32>,
        next_hop: Option<Ipv4Addr>,
        as_path: Vec<u32>,
        communities: Vec<String>,
        origin: Option<&'static str>,
        timestamp: DateTime<Utc>,
    },
    Flowspec {
        rule: FlowSpecRule,
        as_path: Vec<u32>,
        communities: Vec<String>,
        origin: Option<&'static str>,
        timestamp: DateTime<Utc>,
    },
}

impl Route {
    /// Dedup key per spec.md §3: CIDR for unicast, `rd:prefix` for VPN,
    /// `flowspec:{dest|source|unknown}` for flowspec.
    pub fn dedup_key(&self) -> String {
        match self {
            Route::Unicast { prefix, .. } => prefix.clone(),
            Route::Vpn { rd, prefix, .. } => format!("{}:{}", rd, prefix),
            Route::Flowspec { rule, .. } => format!("flowspec:{}", rule.dedup_suffix()),
        }
    }
}

/// A parsed BGP UPDATE embedded in a Route Monitoring message: the resolved
/// routes it carries, keyed ready for Route Store upsert.
pub struct ParsedUpdate {
    pub routes: Vec<Route>,
}

const ATTR_ORIGIN: u8 = 1;
const ATTR_AS_PATH: u8 = 2;
const ATTR_NEXT_HOP: u8 = 3;
const ATTR_MED: u8 = 4;
const ATTR_LOCAL_PREF: u8 = 5;
const ATTR_COMMUNITIES: u8 = 8;
const ATTR_MP_REACH_NLRI: u8 = 14;
const ATTR_MP_UNREACH_NLRI: u8 = 15;

const AFI_IPV4: u16 = 1;
const SAFI_UNICAST: u8 = 1;
const SAFI_VPN: u8 = 128;
const SAFI_FLOWSPEC: u8 = 133;

/// Parse the BGP UPDATE embedded in a Route Monitoring message (spec.md
/// §4.11). Withdrawn routes are parsed (to stay frame-aligned) but
/// deliberately not applied to the Route Store's dedup map — a known gap
/// (spec.md §9 (d)), not a bug to fix here.
pub fn parse_bgp_update(buf: &[u8]) -> Result<ParsedUpdate, BmpParseError> {
    if buf.len() < 19 {
        return Err(BmpParseError("BGP UPDATE shorter than minimum header".to_string()));
    }
    let msg_type = buf[18];
    if msg_type != 2 {
        return Err(BmpParseError(format!("expected BGP UPDATE (type 2), got {}", msg_type)));
    }
    let mut offset = 19;

    let withdrawn_len = read_u16(buf, offset)? as usize;
    offset += 2;
    offset = offset
        .checked_add(withdrawn_len)
        .filter(|&o| o <= buf.len())
        .ok_or_else(|| BmpParseError("withdrawn-routes length overruns message".to_string()))?;

    let path_attr_len = read_u16(buf, offset)? as usize;
    offset += 2;
    let attrs_end = offset
        .checked_add(path_attr_len)
        .filter(|&o| o <= buf.len())
        .ok_or_else(|| BmpParseError("path-attribute length overruns message".to_string()))?;
    let attributes = parse_path_attributes(&buf[offset..attrs_end])?;
    offset = attrs_end;

    let timestamp = Utc::now();
    let mut routes = Vec::new();

    // Remaining bytes are NLRI for plain IPv4 unicast (announced routes).
    let mut nlri_offset = offset;
    while nlri_offset < buf.len() {
        let (prefix, consumed) = parse_ipv4_prefix(&buf[nlri_offset..])?;
        nlri_offset += consumed;
        routes.push(Route::Unicast {
            prefix,
            next_hop: attributes.next_hop,
            as_path: attributes.as_path.clone(),
            communities: attributes.communities.clone(),
            local_pref: attributes.local_pref,
            med: attributes.med,
            origin: attributes.origin,
            timestamp,
        });
    }

    if let Some(mp_reach) = &attributes.mp_reach {
        match (mp_reach.afi, mp_reach.safi) {
            (AFI_IPV4, SAFI_VPN) => {
                routes.extend(parse_vpn_nlri(&mp_reach.nlri, &attributes, timestamp)?);
            }
            (AFI_IPV4, SAFI_FLOWSPEC) => {
                routes.extend(parse_flowspec_nlri(&mp_reach.nlri, &attributes, timestamp)?);
            }
            (AFI_IPV4, SAFI_UNICAST) => {
                let mut o = 0;
                while o < mp_reach.nlri.len() {
                    let (prefix, consumed) = parse_ipv4_prefix(&mp_reach.nlri[o..])?;
                    o += consumed;
                    routes.push(Route::Unicast {
                        prefix,
                        next_hop: attributes.next_hop,
                        as_path: attributes.as_path.clone(),
                        communities: attributes.communities.clone(),
                        local_pref: attributes.local_pref,
                        med: attributes.med,
                        origin: attributes.origin,
                        timestamp,
                    });
                }
            }
            (afi, safi) => {
                return Err(BmpParseError(format!(
                    "unsupported MP_REACH_NLRI family afi={} safi={}",
                    afi, safi
                )))
            }
        }
    }

    let _ = ATTR_MP_UNREACH_NLRI; // acknowledged during attribute scan, not further processed

    Ok(ParsedUpdate { routes })
}

fn parse_path_attributes(buf: &[u8]) -> Result<PathAttributes, BmpParseError> {
    let mut attrs = PathAttributes::default();
    let mut offset = 0;
    while offset < buf.len() {
        if offset + 2 > buf.len() {
            return Err(BmpParseError("truncated path attribute header".to_string()));
        }
        let flags = buf[offset];
        let type_code = buf[offset + 1];
        offset += 2;
        let extended_length = flags & 0x10 != 0;
        let length = if extended_length {
            let l = read_u16(buf, offset)?;
            offset += 2;
            l as usize
        } else {
            let l = *buf.get(offset).ok_or_else(|| {
                BmpParseError("truncated path attribute length".to_string())
            })? as usize;
            offset += 1;
            l
        };
        let end = offset
            .checked_add(length)
            .filter(|&e| e <= buf.len())
            .ok_or_else(|| BmpParseError("path attribute value overruns message".to_string()))?;
        let value = &buf[offset..end];

        match type_code {
            ATTR_ORIGIN if !value.is_empty() => {
                attrs.origin = Some(match value[0] {
                    0 => "IGP",
                    1 => "EGP",
                    _ => "INCOMPLETE",
                });
            }
            ATTR_AS_PATH => {
                attrs.as_path = parse_as_path(value);
            }
            ATTR_NEXT_HOP if value.len() >= 4 => {
                attrs.next_hop = Some(Ipv4Addr::from(as_u32_be([value[0], value[1], value[2], value[3]])));
            }
            ATTR_MED if value.len() >= 4 => {
                attrs.med = Some(as_u32_be([value[0], value[1], value[2], value[3]]));
            }
            ATTR_LOCAL_PREF if value.len() >= 4 => {
                attrs.local_pref = Some(as_u32_be([value[0], value[1], value[2], value[3]]));
            }
            ATTR_COMMUNITIES => {
                attrs.communities = value
                    .chunks_exact(4)
                    .map(|c| {
                        let asn = as_u16_be([c[0], c[1]]);
                        let val = as_u16_be([c[2], c[3]]);
                        format!("{}:{}", asn, val)
                    })
                    .collect();
            }
            ATTR_MP_REACH_NLRI => {
                attrs.mp_reach = parse_mp_reach(value);
            }
            ATTR_MP_UNREACH_NLRI => {
                // Stored bytes are not further processed; see module docs.
            }
            _ => {}
        }

        offset = end;
    }
    Ok(attrs)
}

fn parse_as_path(value: &[u8]) -> Vec<u32> {
    let mut path = Vec::new();
    let mut offset = 0;
    while offset + 2 <= value.len() {
        let segment_type = value[offset];
        let segment_len = value[offset + 1] as usize;
        offset += 2;
        let is_set = segment_type == 1;
        if is_set {
            path.push(0); // marker consumed by caller's rendering if needed
            path.pop();
        }
        for _ in 0..segment_len {
            if offset + 4 > value.len() {
                break;
            }
            let asn = as_u32_be([value[offset], value[offset + 1], value[offset + 2], value[offset + 3]]);
            path.push(asn);
            offset += 4;
        }
    }
    path
}

fn parse_mp_reach(value: &[u8]) -> Option<MpReach> {
    if value.len() < 5 {
        return None;
    }
    let afi = as_u16_be([value[0], value[1]]);
    let safi = value[2];
    let next_hop_len = value[3] as usize;
    let mut offset = 4 + next_hop_len;
    if offset >= value.len() {
        return None;
    }
    let reserved = value[offset]; // SNPA count, always 0 in practice
    let _ = reserved;
    offset += 1;
    if offset > value.len() {
        return None;
    }
    Some(MpReach {
        afi,
        safi,
        nlri: value[offset..].to_vec(),
    })
}

/// Variable-length IPv4 prefix: 1 length byte (bits), then `ceil(bits/8)`
/// bytes, zero-padded to 4 bytes. Returns `(dotted_cidr, bytes_consumed)`.
fn parse_ipv4_prefix(buf: &[u8]) -> Result<(String, usize), BmpParseError> {
    if buf.is_empty() {
        return Err(BmpParseError("empty NLRI prefix".to_string()));
    }
    let prefix_bits = buf[0] as usize;
    let byte_len = (prefix_bits + 7) / 8;
    if byte_len > 4 || 1 + byte_len > buf.len() {
        return Err(BmpParseError(format!("invalid prefix length {} bits", prefix_bits)));
    }
    let mut octets = [0u8; 4];
    octets[..byte_len].copy_from_slice(&buf[1..1 + byte_len]);
    Ok((
        format!("{}/{}", Ipv4Addr::from(octets), prefix_bits),
        1 + byte_len,
    ))
}

/// VPNv4 (AFI 1, SAFI 128): each NLRI entry is a bit-length byte covering
/// the label stack + route distinguisher + prefix, the label stack is
/// 3-byte labels read until the bottom-of-stack bit, followed by an
/// 8-byte RD and the remaining prefix bits.
fn parse_vpn_nlri(
    nlri: &[u8],
    attrs: &PathAttributes,
    timestamp: DateTime<Utc>,
) -> Result<Vec<Route>, BmpParseError> {
    let mut routes = Vec::new();
    let mut offset = 0;
    while offset < nlri.len() {
        let bit_len = nlri[offset] as usize;
        offset += 1;
        let byte_len = (bit_len + 7) / 8;
        if offset + byte_len > nlri.len() {
            return Err(BmpParseError("VPNv4 NLRI entry overruns message".to_string()));
        }
        let entry = &nlri[offset..offset + byte_len];
        offset += byte_len;

        let mut labels = Vec::new();
        let mut pos = 0;
        loop {
            if pos + 3 > entry.len() {
                return Err(BmpParseError("VPNv4 label stack overruns entry".to_string()));
            }
            let b0 = entry[pos] as u32;
            let b1 = entry[pos + 1] as u32;
            let b2 = entry[pos + 2] as u32;
            labels.push((b0 << 12) | (b1 << 4) | (b2 >> 4));
            let bottom_of_stack = b2 & 1 != 0;
            pos += 3;
            if bottom_of_stack {
                break;
            }
        }

        if pos + 8 > entry.len() {
            return Err(BmpParseError("VPNv4 RD overruns entry".to_string()));
        }
        let rd_bytes = &entry[pos..pos + 8];
        let rd = format_route_distinguisher(rd_bytes);
        pos += 8;

        let prefix_bit_len = bit_len
            .checked_sub(pos * 8)
            .ok_or_else(|| BmpParseError("VPNv4 prefix length underflow".to_string()))?;
        let prefix_bytes = &entry[pos..];
        let mut octets = [0u8; 4];
        let copy_len = prefix_bytes.len().min(4);
        octets[..copy_len].copy_from_slice(&prefix_bytes[..copy_len]);
        let prefix = format!("{}/{}", Ipv4Addr::from(octets), prefix_bit_len);

        routes.push(Route::Vpn {
            prefix,
            rd,
            labels,
            next_hop: attrs.next_hop,
            as_path: attrs.as_path.clone(),
            communities: attrs.communities.clone(),
            origin: attrs.origin,
            timestamp,
        });
    }
    Ok(routes)
}

fn format_route_distinguisher(bytes: &[u8]) -> String {
    let rd_type = as_u16_be([bytes[0], bytes[1]]);
    match rd_type {
        0 => {
            let asn = as_u16_be([bytes[2], bytes[3]]);
            let num = as_u32_be([bytes[4], bytes[5], bytes[6], bytes[7]]);
            format!("{}:{}", asn, num)
        }
        1 => {
            let ip = Ipv4Addr::from(as_u32_be([bytes[2], bytes[3], bytes[4], bytes[5]]));
            let num = as_u16_be([bytes[6], bytes[7]]);
            format!("{}:{}", ip, num)
        }
        _ => "unknown".to_string(),
    }
}

const FLOWSPEC_TYPE_DEST_PREFIX: u8 = 1;
const FLOWSPEC_TYPE_SRC_PREFIX: u8 = 2;
const FLOWSPEC_TYPE_PROTOCOL: u8 = 3;
const FLOWSPEC_TYPE_PORT: u8 = 4;
const FLOWSPEC_TYPE_DEST_PORT: u8 = 5;
const FLOWSPEC_TYPE_SRC_PORT: u8 = 6;

/// FlowSpec (AFI 1, SAFI 133): a sequence of NLRI entries, each prefixed by
/// a 2-byte length, each containing typed components per RFC 5575.
/// Operator bytes are consumed but simplified to the first value, matching
/// spec.md §4.11.
fn parse_flowspec_nlri(
    nlri: &[u8],
    attrs: &PathAttributes,
    timestamp: DateTime<Utc>,
) -> Result<Vec<Route>, BmpParseError> {
    let mut routes = Vec::new();
    let mut offset = 0;
    while offset < nlri.len() {
        let entry_len = read_u16(nlri, offset)? as usize;
        offset += 2;
        if offset + entry_len > nlri.len() {
            return Err(BmpParseError("flowspec NLRI entry overruns message".to_string()));
        }
        let entry = &nlri[offset..offset + entry_len];
        offset += entry_len;
        routes.push(Route::Flowspec {
            rule: parse_flowspec_components(entry)?,
            as_path: attrs.as_path.clone(),
            communities: attrs.communities.clone(),
            origin: attrs.origin,
            timestamp,
        });
    }
    Ok(routes)
}

fn parse_flowspec_components(entry: &[u8]) -> Result<FlowSpecRule, BmpParseError> {
    let mut rule = FlowSpecRule {
        destination: None,
        source: None,
        protocol: None,
        port: None,
        dest_port: None,
        src_port: None,
    };
    let mut offset = 0;
    while offset < entry.len() {
        let component_type = entry[offset];
        offset += 1;
        match component_type {
            FLOWSPEC_TYPE_DEST_PREFIX | FLOWSPEC_TYPE_SRC_PREFIX => {
                let (prefix, consumed) = parse_ipv4_prefix(&entry[offset..])?;
                offset += consumed;
                if component_type == FLOWSPEC_TYPE_DEST_PREFIX {
                    rule.destination = Some(prefix);
                } else {
                    rule.source = Some(prefix);
                }
            }
            FLOWSPEC_TYPE_PROTOCOL => {
                if offset + 2 > entry.len() {
                    return Err(BmpParseError("truncated flowspec protocol component".to_string()));
                }
                rule.protocol = Some(entry[offset + 1]); // operator byte skipped, first value kept
                offset += 2;
            }
            FLOWSPEC_TYPE_PORT | FLOWSPEC_TYPE_DEST_PORT | FLOWSPEC_TYPE_SRC_PORT => {
                if offset + 3 > entry.len() {
                    return Err(BmpParseError("truncated flowspec port component".to_string()));
                }
                let value = as_u16_be([entry[offset + 1], entry[offset + 2]]);
                match component_type {
                    FLOWSPEC_TYPE_PORT => rule.port = Some(value),
                    FLOWSPEC_TYPE_DEST_PORT => rule.dest_port = Some(value),
                    _ => rule.src_port = Some(value),
                }
                offset += 3;
            }
            other => {
                return Err(BmpParseError(format!("unsupported flowspec component type {}", other)));
            }
        }
    }
    Ok(rule)
}

fn read_u16(buf: &[u8], offset: usize) -> Result<u16, BmpParseError> {
    buf.get(offset..offset + 2)
        .map(|b| as_u16_be([b[0], b[1]]))
        .ok_or_else(|| BmpParseError("unexpected end of message reading u16".to_string()))
}
