#![forbid(unsafe_code)]

//! The private BitTorrent tracker: announce ingestion, the in-memory swarm
//! table, bencoded responses, and the eviction sweeper.
//!
//! The tracker is transport-agnostic: the hub's HTTP layer parses nothing
//! itself, it hands the raw query string and source address to
//! [`Tracker::announce`] and writes the returned bencoded body back. Peers
//! that stay silent for twice the announce interval are evicted, both
//! inline and by a background sweep so an idle tracker still converges.

pub mod params;
pub mod response;
pub mod swarm;

pub use params::{AnnounceError, AnnounceEvent, AnnounceRequest};
pub use response::{error_body, success_body};
pub use swarm::{PeerSnapshot, SwarmPeer, SwarmSnapshot, TrackerSnapshot};

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use omni_torrent::InfoHash;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use swarm::Swarm;

/// Tracker tuning knobs.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Interval clients are told to announce at.
    pub announce_interval: Duration,
    /// Minimum interval clients must respect.
    pub min_interval: Duration,
    /// Peer count returned when the client does not ask for fewer.
    pub default_numwant: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            announce_interval: Duration::from_secs(30),
            min_interval: Duration::from_secs(15),
            default_numwant: 50,
        }
    }
}

/// Outcome of one processed announce, for the audit log and response.
#[derive(Debug, Clone)]
pub struct AnnounceOutcome {
    /// Bencoded response body to return to the client.
    pub body: Vec<u8>,
    /// Whether the announce was accepted.
    pub ok: bool,
    /// Failure reason for refused announces.
    pub failure_reason: Option<String>,
    /// Figures for the audit row, when the request parsed far enough.
    pub audit: Option<AnnounceAudit>,
}

/// Audit figures extracted from an announce.
#[derive(Debug, Clone)]
pub struct AnnounceAudit {
    /// Hex info hash.
    pub info_hash: String,
    /// Hex peer id.
    pub peer_id: String,
    /// Effective peer address.
    pub ip: String,
    /// Advertised port.
    pub port: u16,
    /// Event label, when supplied.
    pub event: Option<&'static str>,
}

/// The in-memory tracker state shared across requests.
pub struct Tracker {
    config: TrackerConfig,
    swarms: RwLock<HashMap<InfoHash, Swarm>>,
}

impl Tracker {
    /// Create a tracker with the given knobs.
    #[must_use]
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            swarms: RwLock::new(HashMap::new()),
        }
    }

    /// Access the configured knobs.
    #[must_use]
    pub const fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Process one announce: parse the raw query, mutate the swarm, and
    /// build the bencoded reply. Malformed requests yield a bencoded
    /// `failure reason` and leave peers untouched.
    pub async fn announce(&self, raw_query: &str, source_ip: IpAddr) -> AnnounceOutcome {
        let request = match AnnounceRequest::from_query(raw_query) {
            Ok(request) => request,
            Err(err) => {
                let reason = err.to_string();
                return AnnounceOutcome {
                    body: error_body(&reason),
                    ok: false,
                    failure_reason: Some(reason),
                    audit: err.partial_audit(source_ip),
                };
            }
        };

        // Honour an advertised routable address; fall back to the socket.
        let effective_ip = match request.ip {
            Some(advertised) if !advertised.is_loopback() && !advertised.is_unspecified() => {
                advertised
            }
            _ => source_ip,
        };

        let audit = AnnounceAudit {
            info_hash: request.info_hash.to_hex(),
            peer_id: hex::encode(request.peer_id),
            ip: effective_ip.to_string(),
            port: request.port,
            event: request.event.map(AnnounceEvent::as_str),
        };

        let numwant = request
            .numwant
            .unwrap_or(self.config.default_numwant)
            .min(self.config.default_numwant);
        let eviction = self.eviction_window();

        let mut swarms = self.swarms.write().await;
        let swarm = swarms.entry(request.info_hash).or_default();
        swarm.evict_stale(eviction);

        if matches!(request.event, Some(AnnounceEvent::Stopped)) {
            swarm.remove(&request.peer_id);
        } else {
            swarm.upsert(SwarmPeer {
                peer_id: request.peer_id,
                ip: effective_ip,
                port: request.port,
                uploaded: request.uploaded,
                downloaded: request.downloaded,
                left: request.left,
                last_seen: Utc::now(),
            });
        }

        let selection = swarm.select_peers(&request.peer_id, request.left > 0, numwant as usize);
        let (complete, incomplete) = swarm.counts();
        if swarm.is_empty() {
            swarms.remove(&request.info_hash);
        }
        drop(swarms);

        debug!(
            info_hash = %audit.info_hash,
            peers = selection.len(),
            complete,
            incomplete,
            "announce processed"
        );

        AnnounceOutcome {
            body: success_body(
                self.config.announce_interval.as_secs(),
                self.config.min_interval.as_secs(),
                complete,
                incomplete,
                &selection,
                request.compact,
            ),
            ok: true,
            failure_reason: None,
            audit: Some(audit),
        }
    }

    /// Remove every peer silent for longer than `2 · interval`.
    pub async fn evict_stale(&self) -> usize {
        let eviction = self.eviction_window();
        let mut swarms = self.swarms.write().await;
        let mut evicted = 0;
        swarms.retain(|_, swarm| {
            evicted += swarm.evict_stale(eviction);
            !swarm.is_empty()
        });
        evicted
    }

    /// Snapshot of every swarm for the live telemetry page.
    pub async fn snapshot(&self) -> TrackerSnapshot {
        let swarms = self.swarms.read().await;
        let mut entries: Vec<SwarmSnapshot> = swarms
            .iter()
            .map(|(info_hash, swarm)| swarm.snapshot(info_hash))
            .collect();
        entries.sort_by(|a, b| a.info_hash.cmp(&b.info_hash));
        let total_peers = entries.iter().map(|s| s.peers.len()).sum();
        TrackerSnapshot {
            active_swarms: entries.len(),
            total_peers,
            interval_sec: self.config.announce_interval.as_secs(),
            generated_at: Utc::now(),
            swarms: entries,
        }
    }

    /// Spawn the periodic eviction sweep.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        let period = tracker.config.announce_interval;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            loop {
                tick.tick().await;
                let evicted = tracker.evict_stale().await;
                if evicted > 0 {
                    info!(evicted, "tracker sweep evicted silent peers");
                }
            }
        })
    }

    fn eviction_window(&self) -> chrono::Duration {
        chrono::Duration::seconds((self.config.announce_interval.as_secs() * 2) as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn query(info_hash: &InfoHash, peer: u8, port: u16, left: u64) -> String {
        let mut hash_enc = String::new();
        for byte in info_hash.as_bytes() {
            hash_enc.push_str(&format!("%{byte:02x}"));
        }
        let peer_id: String = (0..20).map(|_| format!("%{peer:02x}")).collect();
        format!(
            "info_hash={hash_enc}&peer_id={peer_id}&port={port}&uploaded=0&downloaded=0&left={left}"
        )
    }

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[tokio::test]
    async fn announce_registers_and_returns_other_peers() {
        let tracker = Tracker::new(TrackerConfig::default());
        let hash = InfoHash([7_u8; 20]);

        let first = tracker.announce(&query(&hash, 1, 6881, 0), ip(1)).await;
        assert!(first.ok);

        let second = tracker.announce(&query(&hash, 2, 6882, 100), ip(2)).await;
        assert!(second.ok);
        let body = String::from_utf8_lossy(&second.body);
        assert!(body.contains("interval"));

        let snapshot = tracker.snapshot().await;
        assert_eq!(snapshot.active_swarms, 1);
        assert_eq!(snapshot.total_peers, 2);
        assert_eq!(snapshot.swarms[0].seeders, 1);
        assert_eq!(snapshot.swarms[0].leechers, 1);
    }

    #[tokio::test]
    async fn stopped_event_removes_the_peer() {
        let tracker = Tracker::new(TrackerConfig::default());
        let hash = InfoHash([9_u8; 20]);

        tracker.announce(&query(&hash, 1, 6881, 0), ip(1)).await;
        let stop = format!("{}&event=stopped", query(&hash, 1, 6881, 0));
        tracker.announce(&stop, ip(1)).await;

        let snapshot = tracker.snapshot().await;
        assert_eq!(snapshot.total_peers, 0);
        assert_eq!(snapshot.active_swarms, 0);
    }

    #[tokio::test]
    async fn malformed_announce_yields_failure_reason() {
        let tracker = Tracker::new(TrackerConfig::default());
        let outcome = tracker.announce("port=6881", ip(1)).await;
        assert!(!outcome.ok);
        let body = String::from_utf8_lossy(&outcome.body);
        assert!(body.contains("failure reason"));
        assert_eq!(tracker.snapshot().await.total_peers, 0);
    }

    #[tokio::test]
    async fn sweep_evicts_silent_peers() {
        let config = TrackerConfig {
            announce_interval: Duration::from_secs(0),
            ..TrackerConfig::default()
        };
        let tracker = Tracker::new(config);
        let hash = InfoHash([3_u8; 20]);
        tracker.announce(&query(&hash, 1, 6881, 0), ip(1)).await;

        // Window is 2 * 0 s, so everything is immediately stale.
        let evicted = tracker.evict_stale().await;
        assert_eq!(evicted, 1);
        assert_eq!(tracker.snapshot().await.active_swarms, 0);
    }
}
