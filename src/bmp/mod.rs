//! BMP collector: per-connection message loop wiring the Framer (C10), the
//! Parser (C11), and the Route Store (C12) together, plus a small peer
//! registry for Peer Up/Down bookkeeping.

pub mod framer;
pub mod message;
pub mod route;

use std::collections::HashMap;
use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use tokio::io::AsyncRead;
use tokio::sync::RwLock;

use framer::read_frame;
use message::{
    parse_bgp_update, parse_peer_header, PeerKey, Route, MSG_INITIATION, MSG_PEER_DOWN,
    MSG_PEER_UP, MSG_ROUTE_MIRRORING, MSG_ROUTE_MONITORING, MSG_STATISTICS, MSG_TERMINATION,
};
use route::{RibKind, RouteStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Up,
    Down,
}

#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub key: PeerKey,
    pub bgp_id: Ipv4Addr,
    pub state: PeerState,
    pub last_state_change: DateTime<Utc>,
}

pub struct PeerRegistry {
    peers: RwLock<HashMap<PeerKey, PeerInfo>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
        }
    }

    async fn mark_up(&self, key: PeerKey, bgp_id: Ipv4Addr) {
        let mut peers = self.peers.write().await;
        peers.insert(
            key.clone(),
            PeerInfo {
                key,
                bgp_id,
                state: PeerState::Up,
                last_state_change: Utc::now(),
            },
        );
    }

    async fn mark_down(&self, key: &PeerKey) {
        let mut peers = self.peers.write().await;
        if let Some(info) = peers.get_mut(key) {
            info.state = PeerState::Down;
            info.last_state_change = Utc::now();
        }
    }

    pub async fn list(&self) -> Vec<PeerInfo> {
        self.peers.read().await.values().cloned().collect()
    }
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Drive one BMP session to completion: read frames until a clean EOF or a
/// parse error, updating `peers` and `routes` as messages arrive. Malformed
/// individual messages are logged and skipped rather than closing the
/// connection (spec.md §7 "malformed input"); framing errors (desynced
/// stream) do close it, since there is no way to find the next message
/// boundary once the length prefix itself can't be trusted.
pub async fn run_session<S: AsyncRead + Unpin>(
    mut stream: S,
    peers: &PeerRegistry,
    routes: &RouteStore,
) {
    loop {
        let frame = match read_frame(&mut stream).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!("BMP session closed cleanly");
                return;
            }
            Err(e) => {
                warn!("BMP session framing error, closing connection: {}", e);
                return;
            }
        };

        if let Err(e) = handle_message(frame.msg_type, &frame.payload, peers, routes).await {
            warn!("dropping malformed BMP message (type {}): {}", frame.msg_type, e);
        }
    }
}

async fn handle_message(
    msg_type: u8,
    payload: &[u8],
    peers: &PeerRegistry,
    routes: &RouteStore,
) -> Result<(), crate::error::BmpParseError> {
    match msg_type {
        MSG_INITIATION => {
            info!("BMP Initiation received ({} bytes)", payload.len());
            Ok(())
        }
        MSG_TERMINATION => {
            info!("BMP Termination received ({} bytes)", payload.len());
            Ok(())
        }
        MSG_PEER_UP => {
            let header = parse_peer_header(payload)?;
            peers.mark_up(header.key.clone(), header.peer_bgp_id).await;
            routes.register_peer(header.key.clone()).await;
            info!("peer up: {}", header.key);
            Ok(())
        }
        MSG_PEER_DOWN => {
            let header = parse_peer_header(payload)?;
            peers.mark_down(&header.key).await;
            info!("peer down: {}", header.key);
            Ok(())
        }
        MSG_ROUTE_MONITORING => {
            let header = parse_peer_header(payload)?;
            let update_bytes = &payload[42..];
            let parsed = parse_bgp_update(update_bytes)?;
            let kind = if header.is_post_policy {
                RibKind::Advertised
            } else {
                RibKind::Received
            };
            for route in parsed.routes {
                routes.upsert(header.key.clone(), kind, route).await;
            }
            Ok(())
        }
        MSG_STATISTICS | MSG_ROUTE_MIRRORING => {
            let _header = parse_peer_header(payload)?;
            debug!("BMP message type {} parsed to per-peer header only", msg_type);
            Ok(())
        }
        other => Err(crate::error::BmpParseError(format!(
            "unrecognized BMP message type {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn encode_common_header(msg_type: u8, body_len: usize) -> Vec<u8> {
        let mut buf = vec![3u8];
        buf.extend_from_slice(&((6 + body_len) as u32).to_be_bytes());
        buf.push(msg_type);
        buf
    }

    fn encode_peer_header(address: [u8; 4], asn: u32, flags: u8) -> Vec<u8> {
        let mut buf = vec![0u8; 42];
        buf[0] = 0;
        buf[1] = flags;
        buf[22..26].copy_from_slice(&address);
        buf[26..30].copy_from_slice(&asn.to_be_bytes());
        buf
    }

    #[tokio::test]
    async fn test_peer_up_then_down_updates_registry() {
        let peer_registry = PeerRegistry::new();
        let route_store = RouteStore::new();

        let peer_header = encode_peer_header([10, 0, 0, 5], 65001, 0x01);
        let mut stream_bytes = encode_common_header(MSG_PEER_UP, peer_header.len());
        stream_bytes.extend_from_slice(&peer_header);

        let down_header = encode_peer_header([10, 0, 0, 5], 65001, 0x01);
        stream_bytes.extend(encode_common_header(MSG_PEER_DOWN, down_header.len()));
        stream_bytes.extend_from_slice(&down_header);

        let mut cursor = Cursor::new(stream_bytes);
        run_session(&mut cursor, &peer_registry, &route_store).await;

        let peers = peer_registry.list().await;
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].state, PeerState::Down);
    }

    #[tokio::test]
    async fn test_route_monitoring_inserts_into_received_table() {
        let peer_registry = PeerRegistry::new();
        let route_store = RouteStore::new();

        let peer_header = encode_peer_header([10, 0, 0, 5], 65001, 0x00); // L-flag clear -> received
        let mut update = vec![0u8; 19];
        update[18] = 2; // UPDATE
        update.extend_from_slice(&0u16.to_be_bytes()); // withdrawn len
        update.extend_from_slice(&0u16.to_be_bytes()); // path attr len
        update.extend_from_slice(&[24, 192, 0, 2]); // 192.0.2.0/24

        let mut body = peer_header.clone();
        body.extend_from_slice(&update);

        let mut stream_bytes = encode_common_header(MSG_ROUTE_MONITORING, body.len());
        stream_bytes.extend_from_slice(&body);

        let mut cursor = Cursor::new(stream_bytes);
        run_session(&mut cursor, &peer_registry, &route_store).await;

        let key = PeerKey {
            address: Ipv4Addr::new(10, 0, 0, 5).into(),
            asn: 65001,
        };
        let received = route_store.routes_for(&key, RibKind::Received).await;
        assert_eq!(received.len(), 1);
        match &received[0] {
            Route::Unicast { prefix, .. } => assert_eq!(prefix, "192.0.2.0/24"),
            other => panic!("expected unicast route, got {:?}", other),
        }
    }
}
