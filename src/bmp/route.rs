//! Route Store (C12): per-peer advertised/received route tables, keyed by
//! the dedup rules from spec.md §3 (CIDR for unicast, `rd:prefix` for VPN,
//! `flowspec:{dest|source|unknown}` for flowspec). Newer entries overwrite.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::bmp::message::{PeerKey, Route};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RibKind {
    Advertised,
    Received,
}

#[derive(Default)]
struct PeerRib {
    advertised: HashMap<String, Route>,
    received: HashMap<String, Route>,
}

pub struct RouteStore {
    peers: RwLock<HashMap<PeerKey, PeerRib>>,
}

impl RouteStore {
    pub fn new() -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a peer (Peer Up) if it isn't already known, without
    /// clobbering any routes already recorded for it.
    pub async fn register_peer(&self, peer: PeerKey) {
        let mut peers = self.peers.write().await;
        peers.entry(peer).or_insert_with(PeerRib::default);
    }

    pub async fn peers(&self) -> Vec<PeerKey> {
        self.peers.read().await.keys().cloned().collect()
    }

    /// Upsert a route into the advertised or received table for `peer`,
    /// based on the per-peer header's L-flag (spec.md §4.11).
    pub async fn upsert(&self, peer: PeerKey, kind: RibKind, route: Route) {
        let mut peers = self.peers.write().await;
        let rib = peers.entry(peer).or_insert_with(PeerRib::default);
        let table = match kind {
            RibKind::Advertised => &mut rib.advertised,
            RibKind::Received => &mut rib.received,
        };
        table.insert(route.dedup_key(), route);
    }

    pub async fn routes_for(&self, peer: &PeerKey, kind: RibKind) -> Vec<Route> {
        let peers = self.peers.read().await;
        match peers.get(peer) {
            None => Vec::new(),
            Some(rib) => {
                let table = match kind {
                    RibKind::Advertised => &rib.advertised,
                    RibKind::Received => &rib.received,
                };
                table.values().cloned().collect()
            }
        }
    }

    pub async fn route_count(&self) -> usize {
        let peers = self.peers.read().await;
        peers
            .values()
            .map(|rib| rib.advertised.len() + rib.received.len())
            .sum()
    }
}

impl Default for RouteStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::net::Ipv4Addr;

    fn unicast(prefix: &str) -> Route {
        Route::Unicast {
            prefix: prefix.to_string(),
            next_hop: None,
            as_path: vec![],
            communities: vec![],
            local_pref: None,
            med: None,
            origin: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_upsert_overwrites_same_dedup_key() {
        let store = RouteStore::new();
        let peer = PeerKey {
            address: Ipv4Addr::new(10, 0, 0, 1).into(),
            asn: 65000,
        };
        store.upsert(peer.clone(), RibKind::Received, unicast("192.0.2.0/24")).await;
        store.upsert(peer.clone(), RibKind::Received, unicast("192.0.2.0/24")).await;
        assert_eq!(store.routes_for(&peer, RibKind::Received).await.len(), 1);
    }

    #[tokio::test]
    async fn test_advertised_and_received_are_independent() {
        let store = RouteStore::new();
        let peer = PeerKey {
            address: Ipv4Addr::new(10, 0, 0, 1).into(),
            asn: 65000,
        };
        store.upsert(peer.clone(), RibKind::Advertised, unicast("192.0.2.0/24")).await;
        store.upsert(peer.clone(), RibKind::Received, unicast("198.51.100.0/24")).await;
        assert_eq!(store.routes_for(&peer, RibKind::Advertised).await.len(), 1);
        assert_eq!(store.routes_for(&peer, RibKind::Received).await.len(), 1);
    }

    #[tokio::test]
    async fn test_register_peer_does_not_clobber_existing_routes() {
        let store = RouteStore::new();
        let peer = PeerKey {
            address: Ipv4Addr::new(10, 0, 0, 1).into(),
            asn: 65000,
        };
        store.upsert(peer.clone(), RibKind::Received, unicast("192.0.2.0/24")).await;
        store.register_peer(peer.clone()).await;
        assert_eq!(store.routes_for(&peer, RibKind::Received).await.len(), 1);
    }
}
