//! One swarm: the peers known for a single info hash.

use std::collections::HashMap;
use std::net::IpAddr;

use chrono::{DateTime, Duration, Utc};
use omni_torrent::InfoHash;
use rand::seq::IteratorRandom;
use serde::Serialize;

/// Client-selected 20-byte peer identifier.
pub type PeerId = [u8; 20];

/// One peer as tracked in memory.
#[derive(Debug, Clone)]
pub struct SwarmPeer {
    /// Peer identifier.
    pub peer_id: PeerId,
    /// Effective address.
    pub ip: IpAddr,
    /// Advertised listening port.
    pub port: u16,
    /// Lifetime uploaded bytes.
    pub uploaded: u64,
    /// Lifetime downloaded bytes.
    pub downloaded: u64,
    /// Bytes still missing; `0` marks a seeder.
    pub left: u64,
    /// Last announce timestamp.
    pub last_seen: DateTime<Utc>,
}

impl SwarmPeer {
    /// Whether the peer holds the full content.
    #[must_use]
    pub const fn is_seeder(&self) -> bool {
        self.left == 0
    }
}

/// Peers known for one info hash.
#[derive(Debug, Default)]
pub struct Swarm {
    peers: HashMap<PeerId, SwarmPeer>,
}

impl Swarm {
    /// Insert or refresh a peer.
    pub fn upsert(&mut self, peer: SwarmPeer) {
        self.peers.insert(peer.peer_id, peer);
    }

    /// Remove a peer (clean `stopped` departure).
    pub fn remove(&mut self, peer_id: &PeerId) {
        self.peers.remove(peer_id);
    }

    /// Whether the swarm holds no peers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// `(seeders, leechers)` counts.
    #[must_use]
    pub fn counts(&self) -> (u32, u32) {
        let seeders = self.peers.values().filter(|p| p.is_seeder()).count() as u32;
        let leechers = self.peers.len() as u32 - seeders;
        (seeders, leechers)
    }

    /// Drop peers silent for longer than `window`; returns how many left.
    pub fn evict_stale(&mut self, window: Duration) -> usize {
        let now = Utc::now();
        let before = self.peers.len();
        self.peers
            .retain(|_, peer| now.signed_duration_since(peer.last_seen) <= window);
        before - self.peers.len()
    }

    /// Sample up to `limit` peers for a response, excluding the announcer.
    /// Leechers are handed seeders first; remaining slots fill randomly.
    #[must_use]
    pub fn select_peers(
        &self,
        announcer: &PeerId,
        announcer_is_leecher: bool,
        limit: usize,
    ) -> Vec<SwarmPeer> {
        let mut rng = rand::rng();
        let candidates = self.peers.values().filter(|p| &p.peer_id != announcer);

        if !announcer_is_leecher {
            return candidates.cloned().choose_multiple(&mut rng, limit);
        }

        let mut selected: Vec<SwarmPeer> = self
            .peers
            .values()
            .filter(|p| &p.peer_id != announcer && p.is_seeder())
            .cloned()
            .choose_multiple(&mut rng, limit);
        if selected.len() < limit {
            let remaining = limit - selected.len();
            let leechers = self
                .peers
                .values()
                .filter(|p| &p.peer_id != announcer && !p.is_seeder())
                .cloned()
                .choose_multiple(&mut rng, remaining);
            selected.extend(leechers);
        }
        selected
    }

    /// Serializable snapshot of this swarm.
    #[must_use]
    pub fn snapshot(&self, info_hash: &InfoHash) -> SwarmSnapshot {
        let (seeders, leechers) = self.counts();
        let mut peers: Vec<PeerSnapshot> = self
            .peers
            .values()
            .map(|peer| PeerSnapshot {
                peer_id: hex::encode(peer.peer_id),
                ip: peer.ip.to_string(),
                port: peer.port,
                uploaded: peer.uploaded,
                downloaded: peer.downloaded,
                left: peer.left,
                is_seeder: peer.is_seeder(),
                last_seen: peer.last_seen,
            })
            .collect();
        peers.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        SwarmSnapshot {
            info_hash: info_hash.to_hex(),
            seeders,
            leechers,
            peers,
        }
    }
}

/// One peer in a snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct PeerSnapshot {
    /// Hex peer identifier.
    pub peer_id: String,
    /// Address.
    pub ip: String,
    /// Port.
    pub port: u16,
    /// Lifetime uploaded bytes.
    pub uploaded: u64,
    /// Lifetime downloaded bytes.
    pub downloaded: u64,
    /// Bytes still missing.
    pub left: u64,
    /// Whether the peer holds the full content.
    pub is_seeder: bool,
    /// Last announce timestamp.
    pub last_seen: DateTime<Utc>,
}

/// One swarm in a snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct SwarmSnapshot {
    /// Hex info hash.
    pub info_hash: String,
    /// Seeder count.
    pub seeders: u32,
    /// Leecher count.
    pub leechers: u32,
    /// Member peers.
    pub peers: Vec<PeerSnapshot>,
}

/// Full tracker snapshot for the live telemetry page.
#[derive(Debug, Clone, Serialize)]
pub struct TrackerSnapshot {
    /// Swarm count.
    pub active_swarms: usize,
    /// Total peer count.
    pub total_peers: usize,
    /// Configured announce interval in seconds.
    pub interval_sec: u64,
    /// Snapshot timestamp.
    pub generated_at: DateTime<Utc>,
    /// Per-swarm detail.
    pub swarms: Vec<SwarmSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn peer(id: u8, left: u64) -> SwarmPeer {
        SwarmPeer {
            peer_id: [id; 20],
            ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, id)),
            port: 6881,
            uploaded: 0,
            downloaded: 0,
            left,
            last_seen: Utc::now(),
        }
    }

    #[test]
    fn counts_split_seeders_and_leechers() {
        let mut swarm = Swarm::default();
        swarm.upsert(peer(1, 0));
        swarm.upsert(peer(2, 100));
        swarm.upsert(peer(3, 0));
        assert_eq!(swarm.counts(), (2, 1));
    }

    #[test]
    fn leechers_receive_seeders_first() {
        let mut swarm = Swarm::default();
        swarm.upsert(peer(1, 0));
        swarm.upsert(peer(2, 0));
        swarm.upsert(peer(3, 50));
        swarm.upsert(peer(4, 75));

        let selected = swarm.select_peers(&[9; 20], true, 2);
        assert_eq!(selected.len(), 2);
        assert!(selected.iter().all(SwarmPeer::is_seeder));
    }

    #[test]
    fn announcer_is_never_returned() {
        let mut swarm = Swarm::default();
        swarm.upsert(peer(1, 0));
        let selected = swarm.select_peers(&[1; 20], true, 10);
        assert!(selected.is_empty());
    }

    #[test]
    fn eviction_respects_the_window() {
        let mut swarm = Swarm::default();
        let mut old = peer(1, 0);
        old.last_seen = Utc::now() - Duration::seconds(120);
        swarm.upsert(old);
        swarm.upsert(peer(2, 0));

        let evicted = swarm.evict_stale(Duration::seconds(60));
        assert_eq!(evicted, 1);
        assert_eq!(swarm.counts(), (1, 0));
    }
}
